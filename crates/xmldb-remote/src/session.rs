// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crate::collection::Collection;
use crate::config::{ClientConfig, ClientOption};
use crate::connection::{ConnectionInfo, Properties};
use crate::dispatcher::{CallDispatcher, HeaderSupplier};
use crate::error::{Error, Result};
use crate::events::{ClientEvent, ClientEventSink};
use crate::messages::SystemInfo;
use crate::services::{Configurable, PropertyBag};
use crate::tcp::TcpConnector;
use crate::transport::{Connector, Transport};

/// A connection to one database: the parsed descriptor plus the dispatcher
/// every collection opened through it shares.
pub struct Session {
    info: ConnectionInfo,
    dispatcher: Arc<CallDispatcher>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("descriptor", &self.info)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connects over TCP.
    pub fn connect(
        descriptor: &str,
        properties: Properties,
        opts: impl IntoIterator<Item = ClientOption>,
    ) -> Result<Self> {
        Self::connect_with(&TcpConnector, descriptor, properties, opts)
    }

    pub fn connect_with(
        connector: &dyn Connector,
        descriptor: &str,
        properties: Properties,
        opts: impl IntoIterator<Item = ClientOption>,
    ) -> Result<Self> {
        let info = ConnectionInfo::parse(descriptor, properties)?;
        if info.scheme != connector.scheme() {
            return Err(Error::invalid_descriptor(format!(
                "{descriptor}: scheme {} is not {}",
                info.scheme,
                connector.scheme()
            )));
        }
        let config = session_config(&info, opts)?;
        let transport = connector.connect(&info, &config)?;
        Self::from_transport(transport, info, config)
    }

    /// Builds a session on an already connected transport.
    pub fn from_transport(
        transport: Arc<dyn Transport>,
        info: ConnectionInfo,
        config: ClientConfig,
    ) -> Result<Self> {
        let header = info.authentication()?;
        let credentials: HeaderSupplier = Arc::new(move || header.clone());
        Ok(Self {
            info,
            dispatcher: Arc::new(CallDispatcher::new(transport, credentials, config)),
        })
    }

    pub fn descriptor(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn config(&self) -> &ClientConfig {
        self.dispatcher.config()
    }

    pub fn system_info(&self) -> Result<SystemInfo> {
        self.dispatcher.system_info()
    }

    /// Opens the collection named by the descriptor path. `Ok(None)` when the
    /// server does not know it.
    pub fn root_collection(&self) -> Result<Option<Collection>> {
        let meta = self
            .dispatcher
            .open_root_collection(&self.info.db_path, self.info.info())?;
        if meta.is_absent() {
            self.dispatcher
                .events()
                .emit(ClientEvent::CollectionMissing {
                    name: self.info.db_path.clone(),
                });
            return Ok(None);
        }
        Ok(Some(Collection::open(
            Arc::clone(&self.dispatcher),
            meta,
            None,
        )))
    }
}

fn session_config(
    info: &ConnectionInfo,
    opts: impl IntoIterator<Item = ClientOption>,
) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_options(opts)?;
    if let Some(chunk_size) = info.chunk_size()? {
        config.chunk_size = chunk_size;
        config.validate()?;
    }
    Ok(config)
}

/// Driver entry point: picks a connector by descriptor scheme.
pub struct Database {
    connectors: Vec<Arc<dyn Connector>>,
    options: Vec<ClientOption>,
    properties: PropertyBag,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            connectors: vec![Arc::new(TcpConnector)],
            options: Vec::new(),
            properties: PropertyBag::default(),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let schemes: Vec<&str> = self.connectors.iter().map(|c| c.scheme()).collect();
        f.debug_struct("Database")
            .field("schemes", &schemes)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options applied to every session this database opens.
    pub fn with_options(opts: impl IntoIterator<Item = ClientOption>) -> Self {
        Self {
            options: opts.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Adds a connector, replacing any registered for the same scheme.
    pub fn register_connector(&mut self, connector: Arc<dyn Connector>) {
        self.connectors
            .retain(|existing| existing.scheme() != connector.scheme());
        self.connectors.push(connector);
    }

    pub fn name(&self) -> &str {
        ""
    }

    pub fn conformance_level(&self) -> &str {
        ""
    }

    /// The sink configured by this database's options. Options that do not
    /// validate fall back to the default sink.
    fn events(&self) -> ClientEventSink {
        ClientConfig::from_options(self.options.iter().cloned())
            .map(|config| config.events)
            .unwrap_or_default()
    }

    fn reject(&self, descriptor: &str, reason: String) -> Result<Option<Collection>> {
        self.events().emit(ClientEvent::DescriptorRejected {
            descriptor: descriptor.to_string(),
            reason,
        });
        Ok(None)
    }

    fn connector_for(&self, scheme: &str) -> Option<&Arc<dyn Connector>> {
        self.connectors
            .iter()
            .find(|connector| connector.scheme() == scheme)
    }

    pub fn accepts_uri(&self, descriptor: &str) -> bool {
        match ConnectionInfo::parse(descriptor, Properties::new()) {
            Ok(info) => self.connector_for(&info.scheme).is_some(),
            Err(_) => false,
        }
    }

    /// Connects and opens the root collection. A descriptor this database
    /// does not accept yields `Ok(None)`.
    pub fn get_collection(
        &self,
        descriptor: &str,
        properties: Properties,
    ) -> Result<Option<Collection>> {
        let info = match ConnectionInfo::parse(descriptor, properties) {
            Ok(info) => info,
            Err(err) => return self.reject(descriptor, err.to_string()),
        };
        let Some(connector) = self.connector_for(&info.scheme) else {
            return self.reject(descriptor, format!("no connector for scheme {}", info.scheme));
        };

        let config = session_config(&info, self.options.iter().cloned())?;
        let transport = connector.connect(&info, &config)?;
        let session = Session::from_transport(transport, info, config)?;
        session.system_info()?;
        session.root_collection()
    }
}

impl Configurable for Database {
    fn properties(&self) -> &PropertyBag {
        &self.properties
    }
}
