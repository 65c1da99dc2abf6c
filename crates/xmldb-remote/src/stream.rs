// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Pull-based, blocking view of a server stream.
//!
//! The transport pushes [`StreamEvent`]s into a channel from its own context.
//! [`StreamingIter`] pulls them one at a time: [`StreamingIter::has_next`]
//! waits until the next element or the end of the stream is known and parks
//! the element in a single look-ahead slot;
//! [`StreamingIter::next_item`] hands that element out. Nothing is buffered
//! beyond that one slot on the caller side, nothing is retried.
//!
//! The first wait is bounded by the open timeout, which covers the server
//! preparing its answer. Every later wait is bounded by the read timeout.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::{Error, Result, Status};
use crate::messages::StreamItem;

/// What the transport reports for a server stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Item(StreamItem),
    Failed(Status),
    Completed,
}

enum Phase {
    Open,
    Completed,
    Failed(Status),
    Interrupted,
}

pub struct StreamingIter<T> {
    events: Receiver<StreamEvent>,
    extract: fn(StreamItem) -> Option<T>,
    read_timeout: Duration,
    open_timeout: Duration,
    started: bool,
    slot: Option<T>,
    phase: Phase,
    fused: bool,
}

impl<T> std::fmt::Debug for StreamingIter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingIter")
            .field("read_timeout", &self.read_timeout)
            .field("open_timeout", &self.open_timeout)
            .field("buffered", &self.slot.is_some())
            .finish()
    }
}

impl<T> StreamingIter<T> {
    /// `extract` picks the expected variant out of each item; anything else
    /// is an invalid response.
    pub fn new(
        events: Receiver<StreamEvent>,
        extract: fn(StreamItem) -> Option<T>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            events,
            extract,
            read_timeout,
            open_timeout: read_timeout,
            started: false,
            slot: None,
            phase: Phase::Open,
            fused: false,
        }
    }

    /// Bounds the wait for the first event instead of the read timeout.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// `Ok(false)` only on a clean end of stream. A mid-stream transport
    /// failure is raised here (and on every later call), never turned into
    /// a silent end.
    pub fn has_next(&mut self) -> Result<bool> {
        if self.slot.is_some() {
            return Ok(true);
        }
        match &self.phase {
            Phase::Open => {}
            Phase::Completed => return Ok(false),
            Phase::Failed(status) => return Err(Error::Vendor(status.clone())),
            Phase::Interrupted => return Err(Error::Interrupted { transport: None }),
        }

        let wait = if self.started {
            self.read_timeout
        } else {
            self.open_timeout
        };
        let event = self.events.recv_timeout(wait);
        if event.is_ok() {
            self.started = true;
        }
        match event {
            Ok(StreamEvent::Item(item)) => {
                let value = (self.extract)(item)
                    .ok_or_else(|| Error::invalid_response("unexpected stream item"))?;
                self.slot = Some(value);
                Ok(true)
            }
            Ok(StreamEvent::Completed) => {
                self.phase = Phase::Completed;
                Ok(false)
            }
            Ok(StreamEvent::Failed(status)) => {
                self.phase = Phase::Failed(status.clone());
                Err(Error::Vendor(status))
            }
            // The stream may still deliver; the caller decides whether to wait again.
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(wait)),
            Err(RecvTimeoutError::Disconnected) => {
                self.phase = Phase::Interrupted;
                Err(Error::Interrupted { transport: None })
            }
        }
    }

    /// Takes the element confirmed by the last successful `has_next`.
    pub fn next_item(&mut self) -> Result<T> {
        if let Some(value) = self.slot.take() {
            return Ok(value);
        }
        match &self.phase {
            Phase::Failed(status) => Err(Error::Vendor(status.clone())),
            Phase::Interrupted => Err(Error::Interrupted { transport: None }),
            Phase::Open | Phase::Completed => Err(Error::Exhausted),
        }
    }

    /// Drains the stream into a vector, stopping at the first failure.
    pub fn collect_all(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while self.has_next()? {
            out.push(self.next_item()?);
        }
        Ok(out)
    }
}

/// Yields `Err` at most once, then ends.
impl<T> Iterator for StreamingIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        match self.has_next() {
            Ok(true) => Some(self.next_item()),
            Ok(false) => None,
            Err(err) => {
                self.fused = true;
                Some(Err(err))
            }
        }
    }
}
