// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Framed TCP transport.
//!
//! One connection carries every call. Each call gets a request id; a reader
//! thread routes incoming frames to the waiting caller, stream channel or
//! upload synchronizer registered under that id.

use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::completion::CompletionSynchronizer;
use crate::config::ClientConfig;
use crate::connection::ConnectionInfo;
use crate::encoding::{decode_msgpack_into, encode_msgpack};
use crate::error::{Error, Result, Status};
use crate::events::{ClientEvent, ClientEventSink};
use crate::messages::{
    Envelope, Handle, Hello, Metadata, Reply, Request, StreamItem, StreamRequest, TransferStatus,
    UploadTarget,
};
use crate::protocol::{
    read_frame, write_frame, Frame, MSG_ERROR, MSG_HELLO, MSG_REPLY, MSG_STREAM_END,
    MSG_STREAM_ITEM, MSG_STREAM_OPEN, MSG_UNARY, MSG_UPLOAD_CHUNK, MSG_UPLOAD_END,
    MSG_UPLOAD_OPEN, MSG_UPLOAD_STATUS, PROTOCOL_VERSION,
};
use crate::stream::StreamEvent;
use crate::transport::{ChunkSender, Connector, Transport};

pub const TCP_SCHEME: &str = "tcp";

enum Route {
    Unary(Sender<std::result::Result<Vec<u8>, Status>>),
    Stream(Sender<StreamEvent>),
    Upload(CompletionSynchronizer<TransferStatus>),
}

impl Route {
    fn fail(self, status: Status) {
        match self {
            Route::Unary(tx) => {
                let _ = tx.send(Err(status));
            }
            Route::Stream(tx) => {
                let _ = tx.send(StreamEvent::Failed(status));
            }
            Route::Upload(completion) => {
                completion.signal_failure(status);
            }
        }
    }
}

struct Shared {
    writer: Mutex<BufWriter<TcpStream>>,
    routes: Mutex<HashMap<u64, Route>>,
    next_req_id: AtomicU64,
    closed: AtomicBool,
    events: ClientEventSink,
}

impl Shared {
    fn routes(&self) -> MutexGuard<'_, HashMap<u64, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, route: Route) -> std::result::Result<u64, Status> {
        let mut routes = self.routes();
        if self.closed.load(Ordering::SeqCst) {
            return Err(Status::unavailable("connection closed"));
        }
        let req_id = self.next_req_id.fetch_add(1, Ordering::SeqCst);
        routes.insert(req_id, route);
        Ok(req_id)
    }

    fn forget(&self, req_id: u64) {
        self.routes().remove(&req_id);
    }

    fn send(&self, msg_type: u16, req_id: u64, payload: &[u8]) -> std::result::Result<(), Status> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_frame(&mut *writer, msg_type, 0, req_id, payload).map_err(transport_status)
    }

    /// Sends the opening frame of a call, dropping the route if that fails.
    fn open(&self, msg_type: u16, route: Route, payload: &[u8]) -> std::result::Result<u64, Status> {
        let req_id = self.register(route)?;
        if let Err(status) = self.send(msg_type, req_id, payload) {
            self.forget(req_id);
            return Err(status);
        }
        Ok(req_id)
    }

    fn dispatch(&self, frame: Frame) {
        let req_id = frame.header.req_id;
        let mut routes = self.routes();
        match frame.header.msg_type {
            MSG_REPLY => {
                if let Some(Route::Unary(tx)) = routes.remove(&req_id) {
                    let _ = tx.send(Ok(frame.payload));
                }
            }
            MSG_STREAM_ITEM => {
                let delivered = match routes.get(&req_id) {
                    Some(Route::Stream(tx)) => {
                        let event = match decode_msgpack_into::<StreamItem>(&frame.payload) {
                            Ok(item) => StreamEvent::Item(item),
                            Err(err) => StreamEvent::Failed(Status::internal(err.to_string())),
                        };
                        let failed = matches!(event, StreamEvent::Failed(_));
                        tx.send(event).is_ok() && !failed
                    }
                    _ => true,
                };
                if !delivered {
                    routes.remove(&req_id);
                }
            }
            MSG_STREAM_END => {
                if let Some(Route::Stream(tx)) = routes.remove(&req_id) {
                    let _ = tx.send(StreamEvent::Completed);
                }
            }
            MSG_UPLOAD_STATUS => {
                if let Some(Route::Upload(completion)) = routes.remove(&req_id) {
                    match decode_msgpack_into::<TransferStatus>(&frame.payload) {
                        Ok(status) => completion.signal_success(status),
                        Err(err) => completion.signal_failure(Status::internal(err.to_string())),
                    };
                }
            }
            MSG_ERROR => {
                if let Some(route) = routes.remove(&req_id) {
                    let status = decode_msgpack_into::<Status>(&frame.payload)
                        .unwrap_or_else(|err| Status::internal(err.to_string()));
                    route.fail(status);
                }
            }
            other => {
                drop(routes);
                self.events.emit(ClientEvent::UnexpectedFrame {
                    msg_type: other,
                    req_id,
                });
            }
        }
    }

    /// Fails every pending call. Later calls are refused.
    fn close(&self, reason: &str) {
        let mut routes = self.routes();
        self.closed.store(true, Ordering::SeqCst);
        for (_, route) in routes.drain() {
            route.fail(Status::unavailable(reason));
        }
    }
}

fn transport_status(err: Error) -> Status {
    match err {
        Error::Vendor(status) => status,
        Error::Io(err) => Status::unavailable(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

fn reader_loop(shared: Arc<Shared>, stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_frame(&mut reader) {
            Ok(frame) => shared.dispatch(frame),
            Err(err) => {
                let reason = format!("connection lost: {err}");
                if !shared.closed.load(Ordering::SeqCst) {
                    shared.events.emit(ClientEvent::ConnectionLost {
                        reason: reason.clone(),
                    });
                }
                shared.close(&reason);
                return;
            }
        }
    }
}

/// Multiplexed connection to a remote store.
pub struct TcpTransport {
    shared: Arc<Shared>,
    request_timeout: Duration,
    peer: SocketAddr,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TcpTransport {
    pub fn dial(addr: &str, config: &ClientConfig) -> Result<Self> {
        let stream = connect(addr, config.dial_timeout)?;
        Self::from_stream(stream, config)
    }

    /// Performs the hello exchange on an established stream and starts the
    /// reader thread.
    pub fn from_stream(stream: TcpStream, config: &ClientConfig) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        stream.set_read_timeout(Some(config.dial_timeout))?;
        let hello = encode_msgpack(&Hello {
            protocol_version: PROTOCOL_VERSION,
            client_tag: config.client_tag.clone(),
        })?;
        let mut handshake = &stream;
        write_frame(&mut handshake, MSG_HELLO, 0, 0, &hello)?;
        let frame = read_frame(&mut handshake)?;
        match frame.header.msg_type {
            MSG_HELLO => {
                let answer: Hello = decode_msgpack_into(&frame.payload)?;
                if answer.protocol_version != PROTOCOL_VERSION {
                    return Err(Error::invalid_response(format!(
                        "protocol version mismatch: client {}, server {}",
                        PROTOCOL_VERSION, answer.protocol_version
                    )));
                }
                config.events.emit(ClientEvent::Connected {
                    peer: peer.to_string(),
                    server_tag: answer.client_tag,
                });
            }
            MSG_ERROR => {
                let status: Status = decode_msgpack_into(&frame.payload)?;
                return Err(Error::Vendor(status));
            }
            other => {
                return Err(Error::invalid_response(format!(
                    "expected hello, got message type {other}"
                )));
            }
        }
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(Some(config.request_timeout))?;

        let read_half = stream.try_clone()?;
        let shared = Arc::new(Shared {
            writer: Mutex::new(BufWriter::new(stream)),
            routes: Mutex::new(HashMap::new()),
            next_req_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            events: config.events.clone(),
        });
        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("xmldb-tcp-reader".to_string())
            .spawn(move || reader_loop(reader_shared, read_half))?;

        Ok(Self {
            shared,
            request_timeout: config.request_timeout,
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Calls, streams and uploads still waiting for the server.
    pub fn pending_calls(&self) -> usize {
        self.shared.routes().len()
    }

    /// Shuts the socket down; pending calls fail with `Unavailable`.
    pub fn close(&self) {
        self.shared.close("connection closed by client");
        let writer = self
            .shared
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _ = writer.get_ref().shutdown(Shutdown::Both);
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for TcpTransport {
    fn unary(&self, metadata: &Metadata, request: Request) -> std::result::Result<Reply, Status> {
        let payload = encode_msgpack(&Envelope {
            metadata: metadata.clone(),
            body: request,
        })
        .map_err(transport_status)?;
        let (tx, rx) = bounded(1);
        let req_id = self.shared.open(MSG_UNARY, Route::Unary(tx), &payload)?;

        match rx.recv_timeout(self.request_timeout) {
            Ok(Ok(reply)) => decode_msgpack_into(&reply).map_err(transport_status),
            Ok(Err(status)) => Err(status),
            Err(RecvTimeoutError::Timeout) => {
                self.shared.forget(req_id);
                Err(Status::deadline_exceeded(format!(
                    "no reply within {:?}",
                    self.request_timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Status::unavailable("connection closed")),
        }
    }

    fn server_streaming(
        &self,
        metadata: &Metadata,
        request: StreamRequest,
    ) -> std::result::Result<Receiver<StreamEvent>, Status> {
        let payload = encode_msgpack(&Envelope {
            metadata: metadata.clone(),
            body: request,
        })
        .map_err(transport_status)?;
        let (tx, rx) = unbounded();
        self.shared
            .open(MSG_STREAM_OPEN, Route::Stream(tx), &payload)?;
        Ok(rx)
    }

    fn client_streaming(
        &self,
        metadata: &Metadata,
        resource: &Handle,
        completion: CompletionSynchronizer<TransferStatus>,
    ) -> std::result::Result<Box<dyn ChunkSender>, Status> {
        let payload = encode_msgpack(&Envelope {
            metadata: metadata.clone(),
            body: UploadTarget {
                resource: resource.clone(),
            },
        })
        .map_err(transport_status)?;
        let req_id = self
            .shared
            .open(MSG_UPLOAD_OPEN, Route::Upload(completion), &payload)?;
        Ok(Box::new(TcpUpload {
            shared: Arc::clone(&self.shared),
            req_id,
            finished: false,
        }))
    }
}

/// Owns the upload route: dropping it stops routing the terminal status.
struct TcpUpload {
    shared: Arc<Shared>,
    req_id: u64,
    finished: bool,
}

impl TcpUpload {
    /// Tells the server to discard what it received so far.
    fn cancel(&self) {
        let status = Status::cancelled("upload cancelled by client");
        if let Ok(payload) = encode_msgpack(&status) {
            let _ = self.shared.send(MSG_ERROR, self.req_id, &payload);
        }
        self.shared
            .events
            .emit(ClientEvent::UploadCancelled { req_id: self.req_id });
    }
}

impl ChunkSender for TcpUpload {
    fn send_chunk(&mut self, chunk: &[u8]) -> std::result::Result<(), Status> {
        self.shared.send(MSG_UPLOAD_CHUNK, self.req_id, chunk)
    }

    fn finish(&mut self) -> std::result::Result<(), Status> {
        self.shared.send(MSG_UPLOAD_END, self.req_id, &[])?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for TcpUpload {
    fn drop(&mut self) {
        let pending = self.shared.routes().remove(&self.req_id).is_some();
        if pending && !self.finished {
            self.cancel();
        }
    }
}

fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let mut last_err = None;
    for candidate in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(match last_err {
        Some(err) => Error::Io(err),
        None => Error::invalid_descriptor(format!("{addr}: no addresses resolved")),
    })
}

/// Connector for `xmldb:tcp://` descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn scheme(&self) -> &str {
        TCP_SCHEME
    }

    fn connect(&self, info: &ConnectionInfo, config: &ClientConfig) -> Result<Arc<dyn Transport>> {
        let transport = TcpTransport::dial(&info.address(), config)?;
        Ok(Arc::new(transport))
    }
}
