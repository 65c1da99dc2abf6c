// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use crate::error::Status;
use crate::messages::{Handle, ResourceKind};
use crate::services::ServiceKind;

/// Structured events emitted by the client components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    CallStarted {
        operation: &'static str,
    },
    CallFailed {
        operation: &'static str,
        status: Status,
    },
    StreamOpened {
        operation: &'static str,
    },
    CollectionOpened {
        name: String,
        handle: Handle,
    },
    CollectionMissing {
        name: String,
    },
    CollectionClosed {
        handle: Handle,
    },
    ResourceOpened {
        id: String,
        handle: Handle,
        kind: ResourceKind,
    },
    ResourceClosed {
        handle: Handle,
    },
    DownloadCompleted {
        handle: Handle,
        bytes: u64,
        chunks: u64,
    },
    UploadCompleted {
        handle: Handle,
        bytes: u64,
        chunks: u64,
    },
    UploadCancelled {
        req_id: u64,
    },
    ServiceUnavailable {
        kind: ServiceKind,
        collection: String,
    },
    /// A descriptor `Database` turned down instead of connecting.
    DescriptorRejected {
        descriptor: String,
        reason: String,
    },
    Connected {
        peer: String,
        server_tag: String,
    },
    ConnectionLost {
        reason: String,
    },
    /// A frame whose type has no meaning on the client side.
    UnexpectedFrame {
        msg_type: u16,
        req_id: u64,
    },
}

pub trait ClientEventObserver: Send + Sync {
    fn on_event(&self, event: &ClientEvent);
}

impl<F> ClientEventObserver for F
where
    F: Fn(&ClientEvent) + Send + Sync,
{
    fn on_event(&self, event: &ClientEvent) {
        self(event);
    }
}

pub type SharedClientEventObserver = Arc<dyn ClientEventObserver>;

/// Handed to every component at construction. Defaults to [`TracingObserver`].
#[derive(Clone)]
pub struct ClientEventSink {
    observer: Option<SharedClientEventObserver>,
}

impl Default for ClientEventSink {
    fn default() -> Self {
        Self::with_observer(Arc::new(TracingObserver))
    }
}

impl std::fmt::Debug for ClientEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEventSink")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl ClientEventSink {
    pub fn with_observer(observer: SharedClientEventObserver) -> Self {
        Self {
            observer: Some(observer),
        }
    }

    pub fn disabled() -> Self {
        Self { observer: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.observer.is_some()
    }

    pub fn emit(&self, event: ClientEvent) {
        if let Some(observer) = self.observer.as_ref() {
            observer.on_event(&event);
        }
    }
}

/// Forwards events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl ClientEventObserver for TracingObserver {
    fn on_event(&self, event: &ClientEvent) {
        match event {
            ClientEvent::CallStarted { operation } => {
                tracing::trace!(operation, "call started");
            }
            ClientEvent::CallFailed { operation, status } => {
                tracing::warn!(operation, code = ?status.code, description = %status.description, "call failed");
            }
            ClientEvent::StreamOpened { operation } => {
                tracing::trace!(operation, "stream opened");
            }
            ClientEvent::CollectionOpened { name, handle } => {
                tracing::debug!(name = %name, handle = %handle, "collection opened");
            }
            ClientEvent::CollectionMissing { name } => {
                tracing::warn!(name = %name, "collection not found");
            }
            ClientEvent::CollectionClosed { handle } => {
                tracing::debug!(handle = %handle, "collection closed");
            }
            ClientEvent::ResourceOpened { id, handle, kind } => {
                tracing::debug!(id = %id, handle = %handle, kind = ?kind, "resource opened");
            }
            ClientEvent::ResourceClosed { handle } => {
                tracing::debug!(handle = %handle, "resource closed");
            }
            ClientEvent::DownloadCompleted {
                handle,
                bytes,
                chunks,
            } => {
                tracing::debug!(handle = %handle, bytes, chunks, "download completed");
            }
            ClientEvent::UploadCompleted {
                handle,
                bytes,
                chunks,
            } => {
                tracing::debug!(handle = %handle, bytes, chunks, "upload completed");
            }
            ClientEvent::UploadCancelled { req_id } => {
                tracing::debug!(req_id, "upload cancelled");
            }
            ClientEvent::ServiceUnavailable { kind, collection } => {
                tracing::warn!(?kind, collection = %collection, "service not available");
            }
            ClientEvent::DescriptorRejected { descriptor, reason } => {
                tracing::warn!(descriptor = %descriptor, reason = %reason, "descriptor not accepted");
            }
            ClientEvent::Connected { peer, server_tag } => {
                tracing::debug!(peer = %peer, server_tag = %server_tag, "connected");
            }
            ClientEvent::ConnectionLost { reason } => {
                tracing::debug!(reason = %reason, "connection lost");
            }
            ClientEvent::UnexpectedFrame { msg_type, req_id } => {
                tracing::warn!(msg_type, req_id, "unexpected frame from server");
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Clone, Default)]
pub struct BufferedObserver {
    inner: Arc<Mutex<Vec<ClientEvent>>>,
}

impl BufferedObserver {
    pub fn snapshot(&self) -> Vec<ClientEvent> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ClientEventObserver for BufferedObserver {
    fn on_event(&self, event: &ClientEvent) {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_observer_stores_emitted_events() {
        let observer = BufferedObserver::default();
        let sink = ClientEventSink::with_observer(Arc::new(observer.clone()));
        sink.emit(ClientEvent::CollectionClosed {
            handle: Handle::new("c-1"),
        });

        let events = observer.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            ClientEvent::CollectionClosed {
                handle: Handle::new("c-1")
            }
        );
    }

    #[test]
    fn closure_observer_and_disabled_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer_seen = Arc::clone(&seen);
        let sink = ClientEventSink::with_observer(Arc::new(move |event: &ClientEvent| {
            if let ClientEvent::CallStarted { operation } = event {
                observer_seen
                    .lock()
                    .expect("observer mutex should lock")
                    .push(*operation);
            }
        }));
        sink.emit(ClientEvent::CallStarted {
            operation: "create_id",
        });
        assert_eq!(seen.lock().unwrap().as_slice(), &["create_id"]);

        let disabled = ClientEventSink::disabled();
        assert!(!disabled.is_enabled());
        disabled.emit(ClientEvent::CallStarted {
            operation: "create_id",
        });
        assert!(ClientEventSink::default().is_enabled());
    }
}
