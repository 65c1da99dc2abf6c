// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::completion::CompletionSynchronizer;
use crate::config::ClientConfig;
use crate::connection::ConnectionInfo;
use crate::error::{Result, Status};
use crate::messages::{Handle, Metadata, Reply, Request, StreamRequest, TransferStatus};
use crate::stream::StreamEvent;

/// The call surface a connection offers. Implementations deliver stream
/// events and upload outcomes from their own context; callers block on the
/// receiving side.
pub trait Transport: Send + Sync {
    fn unary(&self, metadata: &Metadata, request: Request) -> std::result::Result<Reply, Status>;

    /// Events arrive in server order and end with exactly one
    /// `Completed` or `Failed`.
    fn server_streaming(
        &self,
        metadata: &Metadata,
        request: StreamRequest,
    ) -> std::result::Result<Receiver<StreamEvent>, Status>;

    /// Opens an upload to `resource`. The transport resolves `completion`
    /// exactly once: with the server's terminal status, or with a failure if
    /// the connection breaks first.
    fn client_streaming(
        &self,
        metadata: &Metadata,
        resource: &Handle,
        completion: CompletionSynchronizer<TransferStatus>,
    ) -> std::result::Result<Box<dyn ChunkSender>, Status>;
}

/// Client half of an upload stream.
///
/// Dropping a sender releases whatever the transport holds for the upload.
/// A sender dropped before `finish` cancels the upload on the server.
pub trait ChunkSender: Send {
    fn send_chunk(&mut self, chunk: &[u8]) -> std::result::Result<(), Status>;

    /// Signals end of input; the answer arrives through the completion. The
    /// sender stays alive until the caller stops waiting for that answer.
    fn finish(&mut self) -> std::result::Result<(), Status>;
}

/// Builds a transport for one descriptor scheme.
pub trait Connector: Send + Sync {
    fn scheme(&self) -> &str;

    fn connect(&self, info: &ConnectionInfo, config: &ClientConfig) -> Result<Arc<dyn Transport>>;
}
