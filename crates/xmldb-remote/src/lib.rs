// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Remote client for hierarchical XML:DB document stores.
//!
//! Exposes a synchronous, handle-based API (collections, resources) over a
//! multiplexed frame protocol with server streams for listings and chunked
//! content transfer in both directions.

pub mod collection;
pub mod completion;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod encoding;
pub mod error;
pub mod events;
pub mod messages;
pub mod protocol;
pub mod resource;
pub mod services;
pub mod session;
pub mod stream;
pub mod tcp;
pub mod testing;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod test_util;

pub use crate::collection::Collection;
pub use crate::completion::CompletionSynchronizer;
pub use crate::config::{
    with_chunk_size, with_client_tag, with_dial_timeout, with_observer, with_read_timeout,
    with_request_timeout, with_upload_timeout, without_events, ClientConfig, ClientOption,
};
pub use crate::connection::{accepts_descriptor, basic_authentication, ConnectionInfo, Properties};
pub use crate::dispatcher::{CallDispatcher, AUTHENTICATION_HEADER};
pub use crate::error::{is_status, Error, Result, Status, StatusCode};
pub use crate::events::{
    BufferedObserver, ClientEvent, ClientEventObserver, ClientEventSink, TracingObserver,
};
pub use crate::messages::{Handle, ResourceKind, SystemInfo, TransferStatus};
pub use crate::resource::Resource;
pub use crate::services::{Configurable, QueryService, ServiceKind};
pub use crate::session::{Database, Session};
pub use crate::stream::StreamingIter;
pub use crate::tcp::{TcpConnector, TcpTransport};
pub use crate::transfer::ChunkWriter;
pub use crate::transport::{Connector, Transport};
