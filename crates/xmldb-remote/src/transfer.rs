// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Chunked content transfer.
//!
//! Downloads ask the server for a stream of chunks of at most `chunk_size`
//! bytes and append them to a sink in arrival order. Uploads open a client
//! stream, send the source in chunks of at most `chunk_size` bytes, signal
//! end of input and then wait for the single terminal status.
//!
//! Chunks carry no index; stream order is the only ordering.

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::completion::CompletionSynchronizer;
use crate::dispatcher::CallDispatcher;
use crate::error::{Error, Result, Status};
use crate::events::{ClientEvent, ClientEventSink};
use crate::messages::{Handle, TransferStatus};
use crate::transport::ChunkSender;

/// Streams the content of `resource` into `sink` and returns the number of
/// bytes written. A failing sink aborts the transfer; bytes already written
/// stay written.
pub fn download(
    dispatcher: &CallDispatcher,
    resource: &Handle,
    chunk_size: usize,
    sink: &mut dyn Write,
) -> Result<u64> {
    let mut chunks = dispatcher.load_resource(resource, chunk_size)?;
    let mut bytes = 0u64;
    let mut count = 0u64;
    while chunks.has_next()? {
        let chunk = chunks.next_item()?;
        sink.write_all(&chunk)?;
        bytes += chunk.len() as u64;
        count += 1;
    }
    sink.flush()?;

    dispatcher.events().emit(ClientEvent::DownloadCompleted {
        handle: resource.clone(),
        bytes,
        chunks: count,
    });
    Ok(bytes)
}

pub fn download_to_vec(
    dispatcher: &CallDispatcher,
    resource: &Handle,
    chunk_size: usize,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    download(dispatcher, resource, chunk_size, &mut buf)?;
    Ok(buf)
}

/// Sends everything `source` yields to `resource`. A failing source cancels
/// the upload; the resource keeps its previous content.
pub fn upload(
    dispatcher: &CallDispatcher,
    resource: &Handle,
    source: &mut dyn Read,
) -> Result<TransferStatus> {
    let mut writer = ChunkWriter::open(dispatcher, resource)?;
    let mut buf = vec![0u8; writer.chunk_size];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::Io(err)),
        };
        writer.send(&buf[..n])?;
    }
    writer.finish()
}

/// Client half of one upload.
///
/// Every `write` is forwarded right away, split into chunks of at most the
/// configured chunk size; nothing is coalesced. [`ChunkWriter::finish`] ends
/// the input and blocks for the server's answer. Dropping the writer before
/// finishing cancels the upload.
pub struct ChunkWriter {
    sender: Option<Box<dyn ChunkSender>>,
    completion: CompletionSynchronizer<TransferStatus>,
    resource: Handle,
    chunk_size: usize,
    upload_timeout: Duration,
    events: ClientEventSink,
    bytes: u64,
    chunks: u64,
}

impl std::fmt::Debug for ChunkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("resource", &self.resource)
            .field("chunk_size", &self.chunk_size)
            .field("bytes", &self.bytes)
            .field("chunks", &self.chunks)
            .finish()
    }
}

impl ChunkWriter {
    pub fn open(dispatcher: &CallDispatcher, resource: &Handle) -> Result<Self> {
        let completion = CompletionSynchronizer::new();
        let sender = dispatcher.open_upload(resource, completion.clone())?;
        let config = dispatcher.config();
        Ok(Self {
            sender: Some(sender),
            completion,
            resource: resource.clone(),
            chunk_size: config.chunk_size,
            upload_timeout: config.upload_timeout,
            events: config.events.clone(),
            bytes: 0,
            chunks: 0,
        })
    }

    /// The degenerate one-byte chunk used by byte-at-a-time writers.
    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.send_chunk(&[byte])
    }

    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(self.chunk_size) {
            self.send_chunk(chunk)?;
        }
        Ok(())
    }

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let sender = self
            .sender
            .as_mut()
            .ok_or_else(|| Error::invalid_resource("upload already finished"))?;
        if let Err(status) = sender.send_chunk(chunk) {
            return Err(self.abort(status));
        }
        self.bytes += chunk.len() as u64;
        self.chunks += 1;
        Ok(())
    }

    /// A broken stream resolves the completion so nobody waits for a status
    /// that will never come.
    fn abort(&mut self, status: Status) -> Error {
        self.sender = None;
        self.completion.signal_failure(status.clone());
        Error::Vendor(status)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes
    }

    /// Signals end of input and waits up to the upload timeout for the
    /// server's terminal status. The sender lives until the wait is over, so
    /// a status that arrives after a timeout finds nobody listening.
    pub fn finish(mut self) -> Result<TransferStatus> {
        if let Some(sender) = self.sender.as_mut() {
            if let Err(status) = sender.finish() {
                return Err(self.abort(status));
            }
        }
        let status = self.completion.await_result(Some(self.upload_timeout))?;
        self.events.emit(ClientEvent::UploadCompleted {
            handle: self.resource.clone(),
            bytes: self.bytes,
            chunks: self.chunks,
        });
        Ok(status)
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.send(buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
