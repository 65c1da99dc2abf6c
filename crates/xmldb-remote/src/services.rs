// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::collection::Collection;
use crate::error::{Error, Result};

/// Thread-safe string property store.
#[derive(Debug, Default)]
pub struct PropertyBag {
    inner: Mutex<BTreeMap<String, String>>,
}

impl PropertyBag {
    pub fn get(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// `None` removes the property.
    pub fn set(&self, name: &str, value: Option<&str>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(value) => {
                inner.insert(name.to_string(), value.to_string());
            }
            None => {
                inner.remove(name);
            }
        }
    }
}

pub trait Configurable {
    fn properties(&self) -> &PropertyBag;

    fn property(&self, name: &str) -> Option<String> {
        self.properties().get(name)
    }

    fn property_or(&self, name: &str, default: &str) -> String {
        self.property(name).unwrap_or_else(|| default.to_string())
    }

    fn set_property(&self, name: &str, value: Option<&str>) {
        self.properties().set(name, value)
    }
}

/// Services a collection may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    XQuery,
    CollectionManagement,
    PermissionManagement,
    UserPrincipalLookup,
}

pub const XQUERY_SERVICE_NAME: &str = "XQueryService";
pub const XQUERY_SERVICE_VERSION: &str = "1.0";

const NAMESPACES_UNSUPPORTED: &str = "namespace management is not supported";
const QUERIES_UNSUPPORTED: &str = "query execution is not supported";

/// Query service bound to a collection. Only the surface exists; namespace
/// management and query execution are not available through this client.
#[derive(Debug)]
pub struct QueryService {
    collection: Collection,
    properties: PropertyBag,
}

impl QueryService {
    pub(crate) fn new(collection: Collection) -> Self {
        Self {
            collection,
            properties: PropertyBag::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        XQUERY_SERVICE_NAME
    }

    pub fn version(&self) -> &'static str {
        XQUERY_SERVICE_VERSION
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn set_collection(&mut self, collection: Collection) -> Result<()> {
        if !collection.is_open() {
            return Err(Error::invalid_collection(format!(
                "{collection} is closed"
            )));
        }
        self.collection = collection;
        Ok(())
    }

    pub fn set_namespace(&self, _prefix: &str, _uri: &str) -> Result<()> {
        Err(Error::NotImplemented(NAMESPACES_UNSUPPORTED))
    }

    pub fn namespace(&self, _prefix: &str) -> Result<String> {
        Err(Error::NotImplemented(NAMESPACES_UNSUPPORTED))
    }

    pub fn remove_namespace(&self, _prefix: &str) -> Result<()> {
        Err(Error::NotImplemented(NAMESPACES_UNSUPPORTED))
    }

    pub fn clear_namespaces(&self) -> Result<()> {
        Err(Error::NotImplemented(NAMESPACES_UNSUPPORTED))
    }

    pub fn query(&self, _query: &str) -> Result<Vec<String>> {
        Err(Error::NotImplemented(QUERIES_UNSUPPORTED))
    }

    pub fn query_resource(&self, _id: &str, _query: &str) -> Result<Vec<String>> {
        Err(Error::NotImplemented(QUERIES_UNSUPPORTED))
    }
}

impl Configurable for QueryService {
    fn properties(&self) -> &PropertyBag {
        &self.properties
    }
}
