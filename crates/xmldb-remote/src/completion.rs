// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! One-shot bridge from an asynchronous terminal signal to a blocking caller.
//!
//! The producing side (a transport callback, a reader thread) resolves the
//! synchronizer exactly once with [`CompletionSynchronizer::signal_success`] or
//! [`CompletionSynchronizer::signal_failure`]; later signals are ignored. Any
//! number of clones may wait with [`CompletionSynchronizer::await_result`] and
//! all of them observe the same outcome.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Error, Result, Status};

struct State<T> {
    outcome: Option<std::result::Result<T, Status>>,
    interrupted: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// Cloning is cheap; all clones share the same slot.
pub struct CompletionSynchronizer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CompletionSynchronizer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for CompletionSynchronizer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CompletionSynchronizer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("CompletionSynchronizer")
            .field("resolved", &state.outcome.is_some())
            .field("interrupted", &state.interrupted)
            .finish()
    }
}

impl<T> CompletionSynchronizer<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    interrupted: false,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Resolves with a value. Returns `false` when already resolved.
    pub fn signal_success(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolves with a transport failure. Returns `false` when already resolved.
    pub fn signal_failure(&self, status: Status) -> bool {
        self.resolve(Err(status))
    }

    /// Wakes every waiter with [`Error::Interrupted`]. The flag is sticky; the
    /// slot itself stays open so the producer can still resolve it, and a
    /// success that arrives afterwards is still returned.
    pub fn interrupt(&self) {
        let mut state = self.lock();
        state.interrupted = true;
        drop(state);
        self.shared.ready.notify_all();
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().outcome.is_some()
    }

    fn resolve(&self, outcome: std::result::Result<T, Status>) -> bool {
        let mut state = self.lock();
        if state.outcome.is_some() {
            return false;
        }
        state.outcome = Some(outcome);
        drop(state);
        self.shared.ready.notify_all();
        true
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> CompletionSynchronizer<T> {
    /// Blocks until the slot is resolved, the wait is interrupted, or
    /// `timeout` elapses (`None` waits without bound).
    ///
    /// A timeout leaves the slot untouched: a signal arriving later is kept
    /// and seen by the next call.
    pub fn await_result(&self, timeout: Option<Duration>) -> Result<T> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if state.interrupted {
                return match &state.outcome {
                    Some(Ok(value)) => Ok(value.clone()),
                    Some(Err(status)) => Err(Error::Interrupted {
                        transport: Some(status.clone()),
                    }),
                    None => Err(Error::Interrupted { transport: None }),
                };
            }
            match &state.outcome {
                Some(Ok(value)) => return Ok(value.clone()),
                Some(Err(status)) => return Err(Error::Vendor(status.clone())),
                None => {}
            }

            state = match deadline {
                None => self
                    .shared
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout(timeout.unwrap_or_default()));
                    }
                    self.shared
                        .ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use std::thread;

    #[test]
    fn first_signal_wins() {
        let sync = CompletionSynchronizer::new();
        assert!(sync.signal_success(1));
        assert!(!sync.signal_success(2));
        assert!(!sync.signal_failure(Status::internal("late")));
        assert_eq!(sync.await_result(None).unwrap(), 1);
    }

    #[test]
    fn failure_is_raised_as_vendor_error() {
        let sync: CompletionSynchronizer<u32> = CompletionSynchronizer::new();
        sync.signal_failure(Status::unavailable("server went away"));
        let err = sync.await_result(Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, Error::Vendor(ref status) if status.code == StatusCode::Unavailable));
    }

    #[test]
    fn signal_from_another_thread_wakes_the_waiter() {
        let sync = CompletionSynchronizer::new();
        let producer = sync.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.signal_success("done".to_string());
        });
        let value = sync.await_result(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(value, "done");
        handle.join().unwrap();
    }

    #[test]
    fn concurrent_waiters_observe_the_same_outcome() {
        let sync: CompletionSynchronizer<u64> = CompletionSynchronizer::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let sync = sync.clone();
                thread::spawn(move || sync.await_result(Some(Duration::from_secs(5))).unwrap())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        sync.signal_success(42);
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), 42);
        }
    }

    #[test]
    fn timeout_does_not_consume_a_late_signal() {
        let sync = CompletionSynchronizer::new();
        let err = sync
            .await_result(Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(10)));

        sync.signal_success(5u8);
        assert_eq!(sync.await_result(Some(Duration::from_millis(10))).unwrap(), 5);
    }

    #[test]
    fn interrupt_wakes_waiter_and_attaches_transport_failure() {
        let sync: CompletionSynchronizer<u8> = CompletionSynchronizer::new();
        let interrupter = sync.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            interrupter.interrupt();
        });
        let err = sync.await_result(None).unwrap_err();
        assert!(matches!(err, Error::Interrupted { transport: None }));
        handle.join().unwrap();

        sync.signal_failure(Status::internal("boom"));
        sync.interrupt();
        let err = sync.await_result(None).unwrap_err();
        assert!(matches!(
            err,
            Error::Interrupted { transport: Some(ref status) } if status.description == "boom"
        ));
    }
}
