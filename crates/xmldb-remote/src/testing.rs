// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! In-memory store and loopback server for tests and examples.

use std::collections::{BTreeMap, HashMap};
use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime};

use crossbeam_channel::{unbounded, Receiver};

use crate::completion::CompletionSynchronizer;
use crate::config::ClientConfig;
use crate::connection::ConnectionInfo;
use crate::encoding::{decode_msgpack_into, encode_msgpack};
use crate::error::{Result, Status};
use crate::messages::{
    system_time_to_millis, CollectionMeta, Envelope, Handle, Hello, Metadata, Reply, Request,
    ResourceKind, ResourceMeta, StreamItem, StreamRequest, SystemInfo, TransferStatus,
    UploadTarget, UNRECOGNIZED_KIND,
};
use crate::protocol::{
    read_frame, write_frame, MSG_ERROR, MSG_HELLO, MSG_REPLY, MSG_STREAM_END, MSG_STREAM_ITEM,
    MSG_STREAM_OPEN, MSG_UNARY, MSG_UPLOAD_CHUNK, MSG_UPLOAD_END, MSG_UPLOAD_OPEN,
    MSG_UPLOAD_STATUS, PROTOCOL_VERSION,
};
use crate::stream::StreamEvent;
use crate::transport::{ChunkSender, Connector, Transport};

pub const MOCK_SCHEME: &str = "mock";
pub const MOCK_SERVER_NAME: &str = "xmldb-mock";
pub const MOCK_SERVER_VERSION: &str = "1.0";

/// Status value the store answers a finished upload with.
pub const STORED: &str = "stored";

/// Collection tree keyed by absolute path (`/db`, `/db/child`).
#[derive(Clone, Debug, Default)]
pub struct MockStore {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    next_handle: u64,
    next_id: u64,
    collections: BTreeMap<String, MockCollection>,
    open_collections: BTreeMap<Handle, String>,
    open_resources: BTreeMap<Handle, (String, String)>,
    collection_closes: BTreeMap<Handle, usize>,
    resource_closes: BTreeMap<Handle, usize>,
    calls: Vec<(String, Metadata)>,
    upload_chunks: Vec<usize>,
    cancelled_uploads: usize,
    fail_next_unary: Option<Status>,
    fail_next_stream: Option<(usize, Status)>,
    fail_next_upload: Option<Status>,
    delay_next_unary: Option<Duration>,
}

#[derive(Clone, Debug)]
struct MockCollection {
    creation_time: u64,
    resources: BTreeMap<String, MockResource>,
}

#[derive(Clone, Debug)]
struct MockResource {
    kind: ResourceKind,
    content: Vec<u8>,
    creation_time: u64,
    last_modification_time: u64,
}

fn now_millis() -> u64 {
    system_time_to_millis(SystemTime::now())
}

fn collection_name(path: &str) -> String {
    match path.trim_end_matches('/').rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "/".to_string(),
    }
}

fn child_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

fn unknown_handle(handle: &Handle) -> Status {
    Status::not_found(format!("unknown handle {handle}"))
}

impl MockState {
    fn allocate_handle(&mut self, prefix: &str) -> Handle {
        self.next_handle += 1;
        Handle::new(format!("{prefix}-{}", self.next_handle))
    }

    fn ensure_collection(&mut self, path: &str) {
        let mut current = String::new();
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.collections
                .entry(current.clone())
                .or_insert_with(|| MockCollection {
                    creation_time: now_millis(),
                    resources: BTreeMap::new(),
                });
        }
    }

    fn collection_path(&self, handle: &Handle) -> std::result::Result<String, Status> {
        self.open_collections
            .get(handle)
            .cloned()
            .ok_or_else(|| unknown_handle(handle))
    }

    fn collection(&self, handle: &Handle) -> std::result::Result<&MockCollection, Status> {
        let path = self.collection_path(handle)?;
        self.collections
            .get(&path)
            .ok_or_else(|| Status::not_found(format!("collection {path} was removed")))
    }

    fn open_collection(&mut self, path: &str) -> CollectionMeta {
        let Some(collection) = self.collections.get(path) else {
            return CollectionMeta::default();
        };
        let creation_time = collection.creation_time;
        let handle = self.allocate_handle("c");
        self.open_collections.insert(handle.clone(), path.to_string());
        CollectionMeta {
            handle,
            name: collection_name(path),
            creation_time,
        }
    }

    fn open_resource(&mut self, path: &str, id: &str) -> ResourceMeta {
        let Some(resource) = self
            .collections
            .get(path)
            .and_then(|collection| collection.resources.get(id))
            .cloned()
        else {
            return ResourceMeta {
                handle: Handle::default(),
                kind: UNRECOGNIZED_KIND,
                creation_time: 0,
                last_modification_time: 0,
            };
        };
        let handle = self.allocate_handle("r");
        self.open_resources
            .insert(handle.clone(), (path.to_string(), id.to_string()));
        ResourceMeta {
            handle,
            kind: resource.kind.code(),
            creation_time: resource.creation_time,
            last_modification_time: resource.last_modification_time,
        }
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.collections
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    fn resource_mut(&mut self, handle: &Handle) -> std::result::Result<&mut MockResource, Status> {
        let (path, id) = self
            .open_resources
            .get(handle)
            .cloned()
            .ok_or_else(|| unknown_handle(handle))?;
        self.collections
            .get_mut(&path)
            .and_then(|collection| collection.resources.get_mut(&id))
            .ok_or_else(|| Status::not_found(format!("resource {id} was removed")))
    }

    fn unary(&mut self, request: Request) -> std::result::Result<Reply, Status> {
        match request {
            Request::SystemInfo => Ok(Reply::SystemInfo(SystemInfo {
                name: MOCK_SERVER_NAME.to_string(),
                version: MOCK_SERVER_VERSION.to_string(),
                properties: BTreeMap::new(),
            })),
            Request::OpenRootCollection { path, .. } => {
                Ok(Reply::Collection(self.open_collection(&path)))
            }
            Request::OpenChildCollection { collection, name } => {
                let path = child_path(&self.collection_path(&collection)?, &name);
                Ok(Reply::Collection(self.open_collection(&path)))
            }
            Request::ResourceCount { collection } => Ok(Reply::Count(
                self.collection(&collection)?.resources.len() as u64,
            )),
            Request::CollectionCount { collection } => {
                let path = self.collection_path(&collection)?;
                Ok(Reply::Count(self.child_names(&path).len() as u64))
            }
            Request::OpenResource { collection, id } => {
                let path = self.collection_path(&collection)?;
                Ok(Reply::Resource(self.open_resource(&path, &id)))
            }
            Request::CloseCollection { collection } => {
                *self.collection_closes.entry(collection.clone()).or_default() += 1;
                self.open_collections
                    .remove(&collection)
                    .map(|_| Reply::Empty)
                    .ok_or_else(|| unknown_handle(&collection))
            }
            Request::CloseResource { resource } => {
                *self.resource_closes.entry(resource.clone()).or_default() += 1;
                self.open_resources
                    .remove(&resource)
                    .map(|_| Reply::Empty)
                    .ok_or_else(|| unknown_handle(&resource))
            }
            Request::RemoveResource { resource } => {
                let (path, id) = self
                    .open_resources
                    .get(&resource)
                    .cloned()
                    .ok_or_else(|| unknown_handle(&resource))?;
                self.collections
                    .get_mut(&path)
                    .and_then(|collection| collection.resources.remove(&id))
                    .map(|_| Reply::Empty)
                    .ok_or_else(|| Status::not_found(format!("resource {id} not found")))
            }
            Request::CreateResource {
                collection,
                id,
                kind,
                content_type,
            } => {
                if content_type != kind.content_type() {
                    return Err(Status::invalid_argument(format!(
                        "content type {content_type} does not match {kind:?}"
                    )));
                }
                let path = self.collection_path(&collection)?;
                let now = now_millis();
                self.collections
                    .get_mut(&path)
                    .ok_or_else(|| Status::not_found(format!("collection {path} was removed")))?
                    .resources
                    .insert(
                        id.clone(),
                        MockResource {
                            kind,
                            content: Vec::new(),
                            creation_time: now,
                            last_modification_time: now,
                        },
                    );
                Ok(Reply::Resource(self.open_resource(&path, &id)))
            }
            Request::CreateId { collection } => {
                self.collection(&collection)?;
                self.next_id += 1;
                Ok(Reply::ResourceId(format!(
                    "{}-{}",
                    uuid::Uuid::new_v4().simple(),
                    self.next_id
                )))
            }
        }
    }

    fn stream_items(&self, request: &StreamRequest) -> std::result::Result<Vec<StreamItem>, Status> {
        match request {
            StreamRequest::ListResources { collection } => Ok(self
                .collection(collection)?
                .resources
                .keys()
                .cloned()
                .map(StreamItem::ResourceId)
                .collect()),
            StreamRequest::ListChildCollections { collection } => {
                let path = self.collection_path(collection)?;
                Ok(self
                    .child_names(&path)
                    .into_iter()
                    .map(StreamItem::CollectionName)
                    .collect())
            }
            StreamRequest::LoadResource {
                resource,
                chunk_size,
            } => {
                if *chunk_size == 0 {
                    return Err(Status::invalid_argument("chunk size must be positive"));
                }
                let (path, id) = self
                    .open_resources
                    .get(resource)
                    .ok_or_else(|| unknown_handle(resource))?;
                let content = &self
                    .collections
                    .get(path)
                    .and_then(|collection| collection.resources.get(id))
                    .ok_or_else(|| Status::not_found(format!("resource {id} was removed")))?
                    .content;
                Ok(content
                    .chunks(*chunk_size as usize)
                    .map(|chunk| StreamItem::Chunk(chunk.to_vec()))
                    .collect())
            }
        }
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `path` and all of its ancestors.
    pub fn with_collection(self, path: &str) -> Self {
        self.state().ensure_collection(path);
        self
    }

    pub fn with_resource(
        self,
        path: &str,
        id: &str,
        kind: ResourceKind,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        let mut state = self.state();
        state.ensure_collection(path);
        let now = now_millis();
        if let Some(collection) = state.collections.get_mut(path) {
            collection.resources.insert(
                id.to_string(),
                MockResource {
                    kind,
                    content: content.into(),
                    creation_time: now,
                    last_modification_time: now,
                },
            );
        }
        drop(state);
        self
    }

    pub fn resource_content(&self, path: &str, id: &str) -> Option<Vec<u8>> {
        self.state()
            .collections
            .get(path)
            .and_then(|collection| collection.resources.get(id))
            .map(|resource| resource.content.clone())
    }

    /// The next unary call fails with `status` instead of running.
    pub fn fail_next_unary(&self, status: Status) {
        self.state().fail_next_unary = Some(status);
    }

    /// The next server stream delivers at most `after` items, then `status`.
    pub fn fail_next_stream(&self, after: usize, status: Status) {
        self.state().fail_next_stream = Some((after, status));
    }

    /// The next upload is answered with `status` instead of being stored.
    pub fn fail_next_upload(&self, status: Status) {
        self.state().fail_next_upload = Some(status);
    }

    /// The next unary call sleeps before answering.
    pub fn delay_next_unary(&self, delay: Duration) {
        self.state().delay_next_unary = Some(delay);
    }

    pub fn collection_close_calls(&self, handle: &Handle) -> usize {
        self.state()
            .collection_closes
            .get(handle)
            .copied()
            .unwrap_or(0)
    }

    pub fn resource_close_calls(&self, handle: &Handle) -> usize {
        self.state()
            .resource_closes
            .get(handle)
            .copied()
            .unwrap_or(0)
    }

    /// Operation name and metadata of every call received, in order.
    pub fn recorded_calls(&self) -> Vec<(String, Metadata)> {
        self.state().calls.clone()
    }

    pub fn upload_chunk_sizes(&self) -> Vec<usize> {
        self.state().upload_chunks.clone()
    }

    /// Uploads dropped before their end of input arrived.
    pub fn cancelled_uploads(&self) -> usize {
        self.state().cancelled_uploads
    }

    fn record(&self, operation: &str, metadata: &Metadata) -> MutexGuard<'_, MockState> {
        let mut state = self.state();
        state
            .calls
            .push((operation.to_string(), metadata.clone()));
        state
    }
}

impl Transport for MockStore {
    fn unary(&self, metadata: &Metadata, request: Request) -> std::result::Result<Reply, Status> {
        let delay = {
            let mut state = self.record(request.operation(), metadata);
            if let Some(status) = state.fail_next_unary.take() {
                return Err(status);
            }
            state.delay_next_unary.take()
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.state().unary(request)
    }

    fn server_streaming(
        &self,
        metadata: &Metadata,
        request: StreamRequest,
    ) -> std::result::Result<Receiver<StreamEvent>, Status> {
        let mut state = self.record(request.operation(), metadata);
        let (tx, rx) = unbounded();
        match state.stream_items(&request) {
            Ok(mut items) => {
                let failure = state.fail_next_stream.take();
                if let Some((after, _)) = &failure {
                    items.truncate(*after);
                }
                for item in items {
                    let _ = tx.send(StreamEvent::Item(item));
                }
                let end = match failure {
                    Some((_, status)) => StreamEvent::Failed(status),
                    None => StreamEvent::Completed,
                };
                let _ = tx.send(end);
            }
            Err(status) => {
                let _ = tx.send(StreamEvent::Failed(status));
            }
        }
        Ok(rx)
    }

    fn client_streaming(
        &self,
        metadata: &Metadata,
        resource: &Handle,
        completion: CompletionSynchronizer<TransferStatus>,
    ) -> std::result::Result<Box<dyn ChunkSender>, Status> {
        let state = self.record("store_resource", metadata);
        if !state.open_resources.contains_key(resource) {
            return Err(unknown_handle(resource));
        }
        drop(state);
        Ok(Box::new(MockUpload {
            store: self.clone(),
            resource: resource.clone(),
            content: Vec::new(),
            completion,
            finished: false,
        }))
    }
}

struct MockUpload {
    store: MockStore,
    resource: Handle,
    content: Vec<u8>,
    completion: CompletionSynchronizer<TransferStatus>,
    finished: bool,
}

impl ChunkSender for MockUpload {
    fn send_chunk(&mut self, chunk: &[u8]) -> std::result::Result<(), Status> {
        self.store.state().upload_chunks.push(chunk.len());
        self.content.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(&mut self) -> std::result::Result<(), Status> {
        if self.finished {
            return Err(Status::failed_precondition("upload already finished"));
        }
        self.finished = true;
        let content = std::mem::take(&mut self.content);
        let mut state = self.store.state();
        if let Some(status) = state.fail_next_upload.take() {
            self.completion.signal_failure(status);
            return Ok(());
        }
        let bytes = content.len() as u64;
        match state.resource_mut(&self.resource) {
            Ok(stored) => {
                stored.content = content;
                stored.last_modification_time = now_millis();
                self.completion.signal_success(TransferStatus {
                    status: STORED.to_string(),
                    bytes,
                });
            }
            Err(status) => {
                self.completion.signal_failure(status);
            }
        }
        Ok(())
    }
}

impl Drop for MockUpload {
    fn drop(&mut self) {
        if !self.finished {
            self.store.state().cancelled_uploads += 1;
            self.completion
                .signal_failure(Status::cancelled("upload dropped before end of input"));
        }
    }
}

/// Hands out the shared store for `xmldb:mock://` descriptors.
#[derive(Clone, Debug, Default)]
pub struct MockConnector {
    store: MockStore,
}

impl MockConnector {
    pub fn new(store: MockStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MockStore {
        &self.store
    }
}

impl Connector for MockConnector {
    fn scheme(&self) -> &str {
        MOCK_SCHEME
    }

    fn connect(&self, _info: &ConnectionInfo, _config: &ClientConfig) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(self.store.clone()))
    }
}

/// Loopback server speaking the frame protocol in front of a [`MockStore`].
#[derive(Debug)]
pub struct TestServer {
    addr: SocketAddr,
    stopped: Arc<AtomicBool>,
}

impl TestServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `xmldb:tcp://127.0.0.1:<port><path>`.
    pub fn descriptor(&self, path: &str) -> String {
        format!("xmldb:tcp://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Wake the accept loop so it sees the flag.
        let _ = TcpStream::connect(self.addr);
    }
}

pub fn spawn_tcp_server(store: MockStore) -> Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let stopped = Arc::new(AtomicBool::new(false));
    let accept_stopped = Arc::clone(&stopped);
    thread::Builder::new()
        .name("xmldb-mock-accept".to_string())
        .spawn(move || {
            for stream in listener.incoming() {
                if accept_stopped.load(Ordering::SeqCst) {
                    return;
                }
                let Ok(stream) = stream else { continue };
                let store = store.clone();
                let _ = thread::Builder::new()
                    .name("xmldb-mock-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = serve_connection(store, stream) {
                            tracing::debug!(error = %err, "mock connection ended");
                        }
                    });
            }
        })?;
    Ok(TestServer { addr, stopped })
}

type SharedWriter = Arc<Mutex<TcpStream>>;

fn send_frame(writer: &SharedWriter, msg_type: u16, req_id: u64, payload: &[u8]) -> Result<()> {
    let mut stream = writer.lock().unwrap_or_else(PoisonError::into_inner);
    write_frame(&mut *stream, msg_type, 0, req_id, payload)
}

fn send_status(writer: &SharedWriter, req_id: u64, status: &Status) -> Result<()> {
    send_frame(writer, MSG_ERROR, req_id, &encode_msgpack(status)?)
}

fn serve_connection(store: MockStore, stream: TcpStream) -> Result<()> {
    let writer: SharedWriter = Arc::new(Mutex::new(stream.try_clone()?));
    let mut reader = BufReader::new(stream);
    let mut uploads: HashMap<u64, (Box<dyn ChunkSender>, CompletionSynchronizer<TransferStatus>)> =
        HashMap::new();

    loop {
        let frame = read_frame(&mut reader)?;
        let req_id = frame.header.req_id;
        match frame.header.msg_type {
            MSG_HELLO => {
                let hello: Hello = decode_msgpack_into(&frame.payload)?;
                tracing::trace!(client_tag = %hello.client_tag, "mock hello");
                let answer = encode_msgpack(&Hello {
                    protocol_version: PROTOCOL_VERSION,
                    client_tag: MOCK_SERVER_NAME.to_string(),
                })?;
                send_frame(&writer, MSG_HELLO, req_id, &answer)?;
            }
            MSG_UNARY => {
                let envelope: Envelope<Request> = decode_msgpack_into(&frame.payload)?;
                match store.unary(&envelope.metadata, envelope.body) {
                    Ok(reply) => send_frame(&writer, MSG_REPLY, req_id, &encode_msgpack(&reply)?)?,
                    Err(status) => send_status(&writer, req_id, &status)?,
                }
            }
            MSG_STREAM_OPEN => {
                let envelope: Envelope<StreamRequest> = decode_msgpack_into(&frame.payload)?;
                match store.server_streaming(&envelope.metadata, envelope.body) {
                    Ok(events) => {
                        let writer = Arc::clone(&writer);
                        thread::spawn(move || forward_stream(&writer, req_id, events));
                    }
                    Err(status) => send_status(&writer, req_id, &status)?,
                }
            }
            MSG_UPLOAD_OPEN => {
                let envelope: Envelope<UploadTarget> = decode_msgpack_into(&frame.payload)?;
                let completion = CompletionSynchronizer::new();
                match store.client_streaming(
                    &envelope.metadata,
                    &envelope.body.resource,
                    completion.clone(),
                ) {
                    Ok(sender) => {
                        uploads.insert(req_id, (sender, completion));
                    }
                    Err(status) => send_status(&writer, req_id, &status)?,
                }
            }
            MSG_UPLOAD_CHUNK => {
                if let Some((sender, _)) = uploads.get_mut(&req_id) {
                    if let Err(status) = sender.send_chunk(&frame.payload) {
                        uploads.remove(&req_id);
                        send_status(&writer, req_id, &status)?;
                    }
                }
            }
            MSG_UPLOAD_END => {
                if let Some((mut sender, completion)) = uploads.remove(&req_id) {
                    if let Err(status) = sender.finish() {
                        completion.signal_failure(status);
                    }
                    match completion.await_result(None) {
                        Ok(status) => {
                            send_frame(&writer, MSG_UPLOAD_STATUS, req_id, &encode_msgpack(&status)?)?
                        }
                        Err(err) => {
                            let status = err
                                .status()
                                .cloned()
                                .unwrap_or_else(|| Status::internal(err.to_string()));
                            send_status(&writer, req_id, &status)?;
                        }
                    }
                }
            }
            MSG_ERROR => {
                // The client gave up on an upload; nothing is stored and no
                // answer is owed.
                uploads.remove(&req_id);
            }
            other => {
                let status = Status::invalid_argument(format!("unexpected message type {other}"));
                send_status(&writer, req_id, &status)?;
            }
        }
    }
}

/// Relays one stream to the client. An item that cannot be framed ends the
/// stream with an error status so the client is not left waiting.
fn forward_stream(writer: &SharedWriter, req_id: u64, events: Receiver<StreamEvent>) {
    for event in events.iter() {
        let sent = match event {
            StreamEvent::Item(item) => encode_msgpack(&item)
                .and_then(|payload| send_frame(writer, MSG_STREAM_ITEM, req_id, &payload)),
            StreamEvent::Completed => {
                let _ = send_frame(writer, MSG_STREAM_END, req_id, &[]);
                return;
            }
            StreamEvent::Failed(status) => {
                let _ = send_status(writer, req_id, &status);
                return;
            }
        };
        if let Err(err) = sent {
            let _ = send_status(writer, req_id, &Status::internal(err.to_string()));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> Metadata {
        Metadata::new()
    }

    fn open_root(store: &MockStore, path: &str) -> CollectionMeta {
        match store
            .unary(
                &meta(),
                Request::OpenRootCollection {
                    path: path.into(),
                    info: BTreeMap::new(),
                },
            )
            .unwrap()
        {
            Reply::Collection(meta) => meta,
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn unknown_paths_open_as_absent() {
        let store = MockStore::new().with_collection("/db/child");
        assert!(!open_root(&store, "/db").is_absent());
        assert_eq!(open_root(&store, "/db/child").name, "child");
        assert!(open_root(&store, "/nope").is_absent());
    }

    #[test]
    fn unknown_resource_has_unrecognized_kind() {
        let store = MockStore::new().with_collection("/db");
        let root = open_root(&store, "/db");
        let reply = store
            .unary(
                &meta(),
                Request::OpenResource {
                    collection: root.handle,
                    id: "missing.xml".into(),
                },
            )
            .unwrap();
        let Reply::Resource(resource) = reply else {
            panic!("expected resource meta");
        };
        assert!(resource.handle.is_empty());
        assert_eq!(resource.kind, UNRECOGNIZED_KIND);
    }

    #[test]
    fn load_resource_splits_content_by_chunk_size() {
        let store = MockStore::new().with_resource("/db", "a.bin", ResourceKind::Binary, vec![7u8; 10]);
        let root = open_root(&store, "/db");
        let Reply::Resource(resource) = store
            .unary(
                &meta(),
                Request::OpenResource {
                    collection: root.handle,
                    id: "a.bin".into(),
                },
            )
            .unwrap()
        else {
            panic!("expected resource meta");
        };

        let events: Vec<_> = store
            .server_streaming(
                &meta(),
                StreamRequest::LoadResource {
                    resource: resource.handle,
                    chunk_size: 4,
                },
            )
            .unwrap()
            .iter()
            .collect();
        let sizes: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Item(StreamItem::Chunk(chunk)) => Some(chunk.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(events.last(), Some(&StreamEvent::Completed));
    }

    #[test]
    fn injected_unary_failure_applies_once() {
        let store = MockStore::new().with_collection("/db");
        store.fail_next_unary(Status::unavailable("down"));
        assert!(store.unary(&meta(), Request::SystemInfo).is_err());
        assert!(store.unary(&meta(), Request::SystemInfo).is_ok());
        assert_eq!(store.recorded_calls().len(), 2);
    }

    #[test]
    fn unframeable_item_ends_the_stream_with_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let writer: SharedWriter = Arc::new(Mutex::new(server));

        let (tx, rx) = unbounded();
        let oversized = vec![0u8; crate::protocol::MAX_FRAME_SIZE as usize];
        tx.send(StreamEvent::Item(StreamItem::Chunk(oversized))).unwrap();
        tx.send(StreamEvent::Completed).unwrap();
        forward_stream(&writer, 3, rx);

        let frame = read_frame(&mut client).unwrap();
        assert_eq!(frame.header.msg_type, MSG_ERROR);
        assert_eq!(frame.header.req_id, 3);
        let status: Status = decode_msgpack_into(&frame.payload).unwrap();
        assert_eq!(status.code, crate::error::StatusCode::Internal);
        assert!(status.description.contains("exceeds maximum"));
    }
}
