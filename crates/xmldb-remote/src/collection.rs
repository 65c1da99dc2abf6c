// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::dispatcher::CallDispatcher;
use crate::error::{Error, Result};
use crate::events::ClientEvent;
use crate::messages::{millis_to_system_time, CollectionMeta, Handle, ResourceKind, TransferStatus};
use crate::resource::Resource;
use crate::services::{Configurable, PropertyBag, QueryService, ServiceKind};
use crate::stream::StreamingIter;
use crate::transfer;

pub(crate) struct CollectionNode {
    dispatcher: Arc<CallDispatcher>,
    meta: CollectionMeta,
    parent: Option<Weak<CollectionNode>>,
    open: AtomicBool,
    properties: PropertyBag,
}

/// An open collection on the server.
///
/// Clones share the node, so closing any clone closes them all. Equality is
/// by server handle. A child keeps only a weak link to its parent.
#[derive(Clone)]
pub struct Collection(Arc<CollectionNode>);

impl Collection {
    pub(crate) fn open(
        dispatcher: Arc<CallDispatcher>,
        meta: CollectionMeta,
        parent: Option<&Collection>,
    ) -> Self {
        dispatcher.events().emit(ClientEvent::CollectionOpened {
            name: meta.name.clone(),
            handle: meta.handle.clone(),
        });
        Self(Arc::new(CollectionNode {
            dispatcher,
            meta,
            parent: parent.map(|parent| Arc::downgrade(&parent.0)),
            open: AtomicBool::new(true),
            properties: PropertyBag::default(),
        }))
    }

    pub(crate) fn from_node(node: Arc<CollectionNode>) -> Self {
        Self(node)
    }

    pub(crate) fn downgrade(&self) -> Weak<CollectionNode> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn shared_dispatcher(&self) -> Arc<CallDispatcher> {
        Arc::clone(&self.0.dispatcher)
    }

    fn dispatcher(&self) -> &CallDispatcher {
        &self.0.dispatcher
    }

    pub fn name(&self) -> &str {
        &self.0.meta.name
    }

    pub fn handle(&self) -> &Handle {
        &self.0.meta.handle
    }

    pub fn creation_time(&self) -> SystemTime {
        millis_to_system_time(self.0.meta.creation_time)
    }

    /// `None` for a root collection, or once the parent has been dropped.
    pub fn parent_collection(&self) -> Option<Collection> {
        self.0
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Collection)
    }

    pub fn child_collection_count(&self) -> Result<u64> {
        self.dispatcher().collection_count(self.handle())
    }

    pub fn list_child_collections(&self) -> Result<Vec<String>> {
        self.dispatcher()
            .list_child_collections(self.handle())?
            .collect_all()
    }

    /// `Ok(None)` when the server has no child of that name.
    pub fn child_collection(&self, name: &str) -> Result<Option<Collection>> {
        let meta = self.dispatcher().open_child_collection(self.handle(), name)?;
        if meta.is_absent() {
            self.dispatcher()
                .events()
                .emit(ClientEvent::CollectionMissing {
                    name: name.to_string(),
                });
            return Ok(None);
        }
        Ok(Some(Collection::open(self.shared_dispatcher(), meta, Some(self))))
    }

    pub fn resource_count(&self) -> Result<u64> {
        self.dispatcher().resource_count(self.handle())
    }

    pub fn list_resources(&self) -> Result<Vec<String>> {
        self.resources()?.collect_all()
    }

    /// Lazy view of the resource ids. The first step may block up to the
    /// request timeout, each later step up to the read timeout. A timeout
    /// leaves the stream open, so `has_next` can be called again.
    pub fn resources(&self) -> Result<StreamingIter<String>> {
        self.dispatcher().list_resources(self.handle())
    }

    /// Creates `id` on the server. An empty id asks the server for a fresh
    /// one first.
    pub fn create_resource(&self, id: &str, kind: ResourceKind) -> Result<Resource> {
        let id = if id.is_empty() {
            self.create_id()?
        } else {
            id.to_string()
        };
        let meta = self.dispatcher().create_resource(self.handle(), &id, kind)?;
        Resource::open(self, id, meta)?
            .ok_or_else(|| Error::invalid_resource("server returned an empty handle"))
    }

    /// `Ok(None)` when the lookup names no resource. A kind the client does
    /// not know is an invalid resource.
    pub fn resource(&self, id: &str) -> Result<Option<Resource>> {
        let meta = self.dispatcher().open_resource(self.handle(), id)?;
        Resource::open(self, id.to_string(), meta)
    }

    pub fn remove_resource(&self, resource: &Resource) -> Result<()> {
        self.dispatcher().remove_resource(resource.handle())
    }

    /// Uploads the locally set content of `resource`.
    pub fn store_resource(&self, resource: &Resource) -> Result<TransferStatus> {
        let mut content: &[u8] = resource
            .cached_content()
            .ok_or_else(|| Error::invalid_resource(format!("{} has no content", resource.id())))?;
        self.store_from(resource, &mut content)
    }

    pub fn store_from(&self, resource: &Resource, source: &mut dyn Read) -> Result<TransferStatus> {
        transfer::upload(self.dispatcher(), resource.handle(), source)
    }

    pub fn create_id(&self) -> Result<String> {
        self.dispatcher().create_id(self.handle())
    }

    pub fn is_open(&self) -> bool {
        self.0.open.load(Ordering::SeqCst)
    }

    /// The first caller to close issues the remote close; everyone else is a
    /// no-op. The collection counts as closed even if that call fails.
    pub fn close(&self) -> Result<()> {
        if self
            .0
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.dispatcher().close_collection(self.handle())?;
        self.dispatcher()
            .events()
            .emit(ClientEvent::CollectionClosed {
                handle: self.handle().clone(),
            });
        Ok(())
    }

    pub fn service(&self, kind: ServiceKind) -> Option<QueryService> {
        match kind {
            ServiceKind::XQuery => Some(QueryService::new(self.clone())),
            ServiceKind::CollectionManagement
            | ServiceKind::PermissionManagement
            | ServiceKind::UserPrincipalLookup => {
                self.dispatcher()
                    .events()
                    .emit(ClientEvent::ServiceUnavailable {
                        kind,
                        collection: self.to_string(),
                    });
                None
            }
        }
    }
}

impl Configurable for Collection {
    fn properties(&self) -> &PropertyBag {
        &self.0.properties
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.handle() == other.handle()
    }
}

impl Eq for Collection {}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name())
            .field("handle", self.handle())
            .field("open", &self.is_open())
            .finish()
    }
}
