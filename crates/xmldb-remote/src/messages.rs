// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Per-call metadata sent alongside every request.
pub type Metadata = BTreeMap<String, String>;

/// Opaque identifier issued by the server for an open collection or resource.
///
/// Two handles are equal when their identifiers are equal, regardless of
/// which local object holds them. The empty handle is the "nothing there"
/// sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ResourceKind {
    Xml,
    Binary,
}

/// Kind code the server uses for a lookup that matched nothing usable.
pub const UNRECOGNIZED_KIND: u8 = u8::MAX;

impl ResourceKind {
    pub fn code(self) -> u8 {
        match self {
            ResourceKind::Xml => 0,
            ResourceKind::Binary => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ResourceKind::Xml),
            1 => Some(ResourceKind::Binary),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ResourceKind::Xml => "text/xml",
            ResourceKind::Binary => "application/octet-stream",
        }
    }
}

impl From<ResourceKind> for u8 {
    fn from(kind: ResourceKind) -> Self {
        kind.code()
    }
}

impl TryFrom<u8> for ResourceKind {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        ResourceKind::from_code(code).ok_or_else(|| format!("unknown resource kind {code}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub handle: Handle,
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub creation_time: u64,
}

impl CollectionMeta {
    /// Collection lookups answer "not found" with an empty name.
    pub fn is_absent(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub handle: Handle,
    /// Raw kind code; see [`ResourceKind::from_code`].
    pub kind: u8,
    pub creation_time: u64,
    pub last_modification_time: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Terminal answer of the server to an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    pub status: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol_version: u16,
    pub client_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub metadata: Metadata,
    pub body: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub resource: Handle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    SystemInfo,
    OpenRootCollection {
        path: String,
        info: BTreeMap<String, String>,
    },
    OpenChildCollection {
        collection: Handle,
        name: String,
    },
    ResourceCount {
        collection: Handle,
    },
    CollectionCount {
        collection: Handle,
    },
    OpenResource {
        collection: Handle,
        id: String,
    },
    CloseCollection {
        collection: Handle,
    },
    CloseResource {
        resource: Handle,
    },
    RemoveResource {
        resource: Handle,
    },
    CreateResource {
        collection: Handle,
        id: String,
        kind: ResourceKind,
        content_type: String,
    },
    CreateId {
        collection: Handle,
    },
}

impl Request {
    pub fn operation(&self) -> &'static str {
        match self {
            Request::SystemInfo => "system_info",
            Request::OpenRootCollection { .. } => "open_root_collection",
            Request::OpenChildCollection { .. } => "open_child_collection",
            Request::ResourceCount { .. } => "resource_count",
            Request::CollectionCount { .. } => "collection_count",
            Request::OpenResource { .. } => "open_resource",
            Request::CloseCollection { .. } => "close_collection",
            Request::CloseResource { .. } => "close_resource",
            Request::RemoveResource { .. } => "remove_resource",
            Request::CreateResource { .. } => "create_resource",
            Request::CreateId { .. } => "create_id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    SystemInfo(SystemInfo),
    Collection(CollectionMeta),
    Resource(ResourceMeta),
    Count(u64),
    ResourceId(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamRequest {
    ListResources { collection: Handle },
    ListChildCollections { collection: Handle },
    LoadResource { resource: Handle, chunk_size: u32 },
}

impl StreamRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            StreamRequest::ListResources { .. } => "list_resources",
            StreamRequest::ListChildCollections { .. } => "list_child_collections",
            StreamRequest::LoadResource { .. } => "load_resource",
        }
    }
}

/// One message of a server stream. Chunk order is the stream order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamItem {
    ResourceId(String),
    CollectionName(String),
    Chunk(#[serde(with = "serde_bytes")] Vec<u8>),
}

pub fn millis_to_system_time(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

pub fn system_time_to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_identifier() {
        assert_eq!(Handle::new("c-1"), Handle::new(String::from("c-1")));
        assert_ne!(Handle::new("c-1"), Handle::new("c-2"));
        assert!(Handle::default().is_empty());
    }

    #[test]
    fn resource_kind_codes_are_closed() {
        assert_eq!(ResourceKind::from_code(ResourceKind::Xml.code()), Some(ResourceKind::Xml));
        assert_eq!(
            ResourceKind::from_code(ResourceKind::Binary.code()),
            Some(ResourceKind::Binary)
        );
        assert_eq!(ResourceKind::from_code(UNRECOGNIZED_KIND), None);
        assert!(ResourceKind::try_from(7u8).is_err());
        assert_eq!(ResourceKind::Xml.content_type(), "text/xml");
    }

    #[test]
    fn absent_collection_is_signalled_by_empty_name() {
        assert!(CollectionMeta::default().is_absent());
        let meta = CollectionMeta {
            handle: Handle::new("h"),
            name: "db".into(),
            creation_time: 0,
        };
        assert!(!meta.is_absent());
    }

    #[test]
    fn epoch_millis_convert_to_system_time() {
        let time = millis_to_system_time(1_700_000_000_123);
        assert_eq!(system_time_to_millis(time), 1_700_000_000_123);
        assert_eq!(system_time_to_millis(UNIX_EPOCH), 0);
    }
}
