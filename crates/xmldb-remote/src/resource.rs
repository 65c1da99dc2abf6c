// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::collection::{Collection, CollectionNode};
use crate::dispatcher::CallDispatcher;
use crate::error::{Error, Result};
use crate::events::ClientEvent;
use crate::messages::{millis_to_system_time, Handle, ResourceKind, ResourceMeta};
use crate::transfer;

/// An open resource.
///
/// Content is fetched from the server on every read unless it was set
/// locally. Setters take `&mut self`; only [`Resource::close`] is meant to be
/// raced.
pub struct Resource {
    id: String,
    handle: Handle,
    kind: ResourceKind,
    creation_time: SystemTime,
    last_modification_time: SystemTime,
    content: Option<Vec<u8>>,
    open: AtomicBool,
    parent: Weak<CollectionNode>,
    dispatcher: Arc<CallDispatcher>,
}

impl Resource {
    /// Turns lookup metadata into a resource. An unknown kind code is an
    /// error; an empty handle means nothing was found.
    pub(crate) fn open(parent: &Collection, id: String, meta: ResourceMeta) -> Result<Option<Self>> {
        let kind = ResourceKind::from_code(meta.kind).ok_or_else(|| {
            Error::invalid_resource(format!("{id}: unrecognized resource kind {}", meta.kind))
        })?;
        if meta.handle.is_empty() {
            return Ok(None);
        }

        let dispatcher = parent.shared_dispatcher();
        dispatcher.events().emit(ClientEvent::ResourceOpened {
            id: id.clone(),
            handle: meta.handle.clone(),
            kind,
        });
        Ok(Some(Self {
            id,
            handle: meta.handle,
            kind,
            creation_time: millis_to_system_time(meta.creation_time),
            last_modification_time: millis_to_system_time(meta.last_modification_time),
            content: None,
            open: AtomicBool::new(true),
            parent: parent.downgrade(),
            dispatcher,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn creation_time(&self) -> SystemTime {
        self.creation_time
    }

    pub fn last_modification_time(&self) -> SystemTime {
        self.last_modification_time
    }

    pub fn set_last_modification(&mut self, time: SystemTime) {
        self.last_modification_time = time;
    }

    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = Some(content.into());
    }

    pub fn set_content_from(&mut self, source: &mut dyn Read) -> Result<()> {
        let mut content = Vec::new();
        source.read_to_end(&mut content)?;
        self.content = Some(content);
        Ok(())
    }

    /// Whether content was set locally.
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    pub(crate) fn cached_content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    pub fn content(&self) -> Result<Vec<u8>> {
        match &self.content {
            Some(content) => Ok(content.clone()),
            None => transfer::download_to_vec(
                &self.dispatcher,
                &self.handle,
                self.dispatcher.config().chunk_size,
            ),
        }
    }

    /// Writes the content to `sink` and returns the byte count.
    pub fn content_to(&self, sink: &mut dyn Write) -> Result<u64> {
        match &self.content {
            Some(content) => {
                sink.write_all(content)?;
                Ok(content.len() as u64)
            }
            None => transfer::download(
                &self.dispatcher,
                &self.handle,
                self.dispatcher.config().chunk_size,
                sink,
            ),
        }
    }

    pub fn content_as_string(&self) -> Result<String> {
        String::from_utf8(self.content()?)
            .map_err(|err| Error::invalid_resource(format!("{}: {err}", self.id)))
    }

    /// `None` once the owning collection has been dropped.
    pub fn parent_collection(&self) -> Option<Collection> {
        self.parent.upgrade().map(Collection::from_node)
    }

    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    pub fn close(&self) -> Result<()> {
        if self
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.dispatcher.close_resource(&self.handle)?;
        self.dispatcher.events().emit(ClientEvent::ResourceClosed {
            handle: self.handle.clone(),
        });
        Ok(())
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("cached", &self.content.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}
