// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::completion::CompletionSynchronizer;
use crate::config::ClientConfig;
use crate::error::{Error, Result, Status};
use crate::events::{ClientEvent, ClientEventSink};
use crate::messages::{
    CollectionMeta, Handle, Metadata, Reply, Request, ResourceKind, ResourceMeta, StreamItem,
    StreamRequest, SystemInfo, TransferStatus,
};
use crate::stream::StreamingIter;
use crate::transport::{ChunkSender, Transport};

/// Metadata key of the credential attached to every call.
pub const AUTHENTICATION_HEADER: &str = "authentication";

/// Supplies the current credential string for each call.
pub type HeaderSupplier = Arc<dyn Fn() -> String + Send + Sync>;

/// Issues calls against a transport and turns every transport status into
/// [`Error::Vendor`].
pub struct CallDispatcher {
    transport: Arc<dyn Transport>,
    credentials: HeaderSupplier,
    config: ClientConfig,
}

impl std::fmt::Debug for CallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CallDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: HeaderSupplier,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            credentials,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn events(&self) -> &ClientEventSink {
        &self.config.events
    }

    fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(AUTHENTICATION_HEADER.to_string(), (self.credentials)());
        metadata
    }

    fn failed(&self, operation: &'static str, status: Status) -> Error {
        self.config.events.emit(ClientEvent::CallFailed {
            operation,
            status: status.clone(),
        });
        Error::Vendor(status)
    }

    pub fn invoke(&self, request: Request) -> Result<Reply> {
        let operation = request.operation();
        self.config
            .events
            .emit(ClientEvent::CallStarted { operation });
        self.transport
            .unary(&self.metadata(), request)
            .map_err(|status| self.failed(operation, status))
    }

    pub fn invoke_streaming<T>(
        &self,
        request: StreamRequest,
        extract: fn(StreamItem) -> Option<T>,
    ) -> Result<StreamingIter<T>> {
        let operation = request.operation();
        self.config
            .events
            .emit(ClientEvent::CallStarted { operation });
        let events = self
            .transport
            .server_streaming(&self.metadata(), request)
            .map_err(|status| self.failed(operation, status))?;
        self.config
            .events
            .emit(ClientEvent::StreamOpened { operation });
        Ok(
            StreamingIter::new(events, extract, self.config.read_timeout)
                .with_open_timeout(self.config.request_timeout.max(self.config.read_timeout)),
        )
    }

    /// Opens the client half of an upload bound to `completion`.
    pub fn open_upload(
        &self,
        resource: &Handle,
        completion: CompletionSynchronizer<TransferStatus>,
    ) -> Result<Box<dyn ChunkSender>> {
        let operation = "store_resource";
        self.config
            .events
            .emit(ClientEvent::CallStarted { operation });
        self.transport
            .client_streaming(&self.metadata(), resource, completion)
            .map_err(|status| self.failed(operation, status))
    }

    pub fn system_info(&self) -> Result<SystemInfo> {
        match self.invoke(Request::SystemInfo)? {
            Reply::SystemInfo(info) => Ok(info),
            other => Err(unexpected("system_info", &other)),
        }
    }

    pub fn open_root_collection(
        &self,
        path: &str,
        info: BTreeMap<String, String>,
    ) -> Result<CollectionMeta> {
        let request = Request::OpenRootCollection {
            path: path.to_string(),
            info,
        };
        collection_reply("open_root_collection", self.invoke(request)?)
    }

    pub fn open_child_collection(&self, collection: &Handle, name: &str) -> Result<CollectionMeta> {
        let request = Request::OpenChildCollection {
            collection: collection.clone(),
            name: name.to_string(),
        };
        collection_reply("open_child_collection", self.invoke(request)?)
    }

    pub fn resource_count(&self, collection: &Handle) -> Result<u64> {
        let request = Request::ResourceCount {
            collection: collection.clone(),
        };
        count_reply("resource_count", self.invoke(request)?)
    }

    pub fn collection_count(&self, collection: &Handle) -> Result<u64> {
        let request = Request::CollectionCount {
            collection: collection.clone(),
        };
        count_reply("collection_count", self.invoke(request)?)
    }

    pub fn list_resources(&self, collection: &Handle) -> Result<StreamingIter<String>> {
        self.invoke_streaming(
            StreamRequest::ListResources {
                collection: collection.clone(),
            },
            |item| match item {
                StreamItem::ResourceId(id) => Some(id),
                _ => None,
            },
        )
    }

    pub fn list_child_collections(&self, collection: &Handle) -> Result<StreamingIter<String>> {
        self.invoke_streaming(
            StreamRequest::ListChildCollections {
                collection: collection.clone(),
            },
            |item| match item {
                StreamItem::CollectionName(name) => Some(name),
                _ => None,
            },
        )
    }

    pub fn load_resource(
        &self,
        resource: &Handle,
        chunk_size: usize,
    ) -> Result<StreamingIter<Vec<u8>>> {
        let chunk_size = u32::try_from(chunk_size)
            .map_err(|_| Error::invalid_resource(format!("chunk size {chunk_size} too large")))?;
        self.invoke_streaming(
            StreamRequest::LoadResource {
                resource: resource.clone(),
                chunk_size,
            },
            |item| match item {
                StreamItem::Chunk(bytes) => Some(bytes),
                _ => None,
            },
        )
    }

    pub fn open_resource(&self, collection: &Handle, id: &str) -> Result<ResourceMeta> {
        let request = Request::OpenResource {
            collection: collection.clone(),
            id: id.to_string(),
        };
        resource_reply("open_resource", self.invoke(request)?)
    }

    pub fn create_resource(
        &self,
        collection: &Handle,
        id: &str,
        kind: ResourceKind,
    ) -> Result<ResourceMeta> {
        let request = Request::CreateResource {
            collection: collection.clone(),
            id: id.to_string(),
            kind,
            content_type: kind.content_type().to_string(),
        };
        resource_reply("create_resource", self.invoke(request)?)
    }

    pub fn close_collection(&self, collection: &Handle) -> Result<()> {
        self.invoke(Request::CloseCollection {
            collection: collection.clone(),
        })?;
        Ok(())
    }

    pub fn close_resource(&self, resource: &Handle) -> Result<()> {
        self.invoke(Request::CloseResource {
            resource: resource.clone(),
        })?;
        Ok(())
    }

    pub fn remove_resource(&self, resource: &Handle) -> Result<()> {
        self.invoke(Request::RemoveResource {
            resource: resource.clone(),
        })?;
        Ok(())
    }

    pub fn create_id(&self, collection: &Handle) -> Result<String> {
        let request = Request::CreateId {
            collection: collection.clone(),
        };
        match self.invoke(request)? {
            Reply::ResourceId(id) => Ok(id),
            other => Err(unexpected("create_id", &other)),
        }
    }
}

fn unexpected(operation: &str, reply: &Reply) -> Error {
    Error::invalid_response(format!("{operation}: unexpected reply {reply:?}"))
}

fn collection_reply(operation: &str, reply: Reply) -> Result<CollectionMeta> {
    match reply {
        Reply::Collection(meta) => Ok(meta),
        other => Err(unexpected(operation, &other)),
    }
}

fn resource_reply(operation: &str, reply: Reply) -> Result<ResourceMeta> {
    match reply {
        Reply::Resource(meta) => Ok(meta),
        other => Err(unexpected(operation, &other)),
    }
}

fn count_reply(operation: &str, reply: Reply) -> Result<u64> {
    match reply {
        Reply::Count(count) => Ok(count),
        other => Err(unexpected(operation, &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BufferedObserver;
    use crate::stream::StreamEvent;
    use crossbeam_channel::Receiver;
    use std::sync::Mutex;

    /// Answers every unary call with the same reply and remembers metadata.
    struct FixedReply {
        reply: std::result::Result<Reply, Status>,
        seen: Mutex<Vec<Metadata>>,
    }

    impl Transport for FixedReply {
        fn unary(&self, metadata: &Metadata, _request: Request) -> std::result::Result<Reply, Status> {
            self.seen.lock().unwrap().push(metadata.clone());
            self.reply.clone()
        }

        fn server_streaming(
            &self,
            _metadata: &Metadata,
            _request: StreamRequest,
        ) -> std::result::Result<Receiver<StreamEvent>, Status> {
            Err(Status::unavailable("no streams here"))
        }

        fn client_streaming(
            &self,
            _metadata: &Metadata,
            _resource: &Handle,
            _completion: CompletionSynchronizer<TransferStatus>,
        ) -> std::result::Result<Box<dyn ChunkSender>, Status> {
            Err(Status::unavailable("no uploads here"))
        }
    }

    fn dispatcher(
        reply: std::result::Result<Reply, Status>,
    ) -> (CallDispatcher, Arc<FixedReply>, BufferedObserver) {
        let transport = Arc::new(FixedReply {
            reply,
            seen: Mutex::new(Vec::new()),
        });
        let observer = BufferedObserver::default();
        let config = ClientConfig {
            events: ClientEventSink::with_observer(Arc::new(observer.clone())),
            ..ClientConfig::default()
        };
        let dispatcher = CallDispatcher::new(
            transport.clone(),
            Arc::new(|| "Basic Z3Vlc3Q=".to_string()),
            config,
        );
        (dispatcher, transport, observer)
    }

    #[test]
    fn attaches_credentials_to_every_call() {
        let (dispatcher, transport, _) = dispatcher(Ok(Reply::Count(3)));
        assert_eq!(dispatcher.resource_count(&Handle::new("c-1")).unwrap(), 3);
        assert_eq!(dispatcher.collection_count(&Handle::new("c-1")).unwrap(), 3);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for metadata in seen.iter() {
            assert_eq!(
                metadata.get(AUTHENTICATION_HEADER).map(String::as_str),
                Some("Basic Z3Vlc3Q=")
            );
        }
    }

    #[test]
    fn mismatched_reply_is_invalid_response() {
        let (dispatcher, _, _) = dispatcher(Ok(Reply::Count(3)));
        assert!(matches!(
            dispatcher.system_info(),
            Err(Error::InvalidResponse(_))
        ));
        assert!(matches!(
            dispatcher.create_id(&Handle::new("c-1")),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn status_becomes_vendor_error_and_event() {
        let (dispatcher, _, observer) = dispatcher(Err(Status::not_found("gone")));
        let err = dispatcher.close_resource(&Handle::new("r-9")).unwrap_err();
        assert!(matches!(err, Error::Vendor(ref status) if status.description == "gone"));

        let err = dispatcher.list_resources(&Handle::new("c-1")).unwrap_err();
        assert!(err.is_vendor());

        let events = observer.snapshot();
        assert!(events.contains(&ClientEvent::CallStarted {
            operation: "close_resource"
        }));
        assert!(events.contains(&ClientEvent::CallFailed {
            operation: "list_resources",
            status: Status::unavailable("no streams here"),
        }));
    }
}
