// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use base64::Engine;
use url::Url;

use crate::config::CHUNK_SIZE_PROPERTY;
use crate::error::{Error, Result};
use crate::protocol::DEFAULT_PORT;

/// String property bag accompanying a connection descriptor.
pub type Properties = BTreeMap<String, String>;

pub const DESCRIPTOR_PREFIX: &str = "xmldb:";
pub const USER_PROPERTY: &str = "user";
pub const PASSWORD_PROPERTY: &str = "password";

/// Parsed form of `xmldb:<scheme>://<host>[:<port>]/<db-path>`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub properties: Properties,
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("properties", &self.info())
            .finish()
    }
}

impl ConnectionInfo {
    pub fn parse(descriptor: &str, properties: Properties) -> Result<Self> {
        let rest = descriptor.strip_prefix(DESCRIPTOR_PREFIX).ok_or_else(|| {
            Error::invalid_descriptor(format!("{descriptor}: missing {DESCRIPTOR_PREFIX} prefix"))
        })?;
        let url = Url::parse(rest)
            .map_err(|err| Error::invalid_descriptor(format!("{descriptor}: {err}")))?;

        let host = url
            .host_str()
            .filter(|host| !host.trim().is_empty())
            .ok_or_else(|| Error::invalid_descriptor(format!("{descriptor}: missing host")))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(Error::invalid_descriptor(format!(
                "{descriptor}: port must be positive"
            )));
        }
        let db_path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port,
            db_path,
            properties,
        })
    }

    /// `host:port`, suitable for socket address resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The value of the per-call authentication header.
    pub fn authentication(&self) -> Result<String> {
        let user = match self.properties.get(USER_PROPERTY) {
            Some(user) => user.clone(),
            None => whoami::username(),
        };
        basic_authentication(
            &user,
            self.properties.get(PASSWORD_PROPERTY).map(String::as_str),
        )
    }

    /// Properties forwarded when opening the root collection. The password
    /// only travels in the authentication header.
    pub fn info(&self) -> Properties {
        self.properties
            .iter()
            .filter(|(key, _)| key.as_str() != PASSWORD_PROPERTY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn chunk_size(&self) -> Result<Option<usize>> {
        self.properties
            .get(CHUNK_SIZE_PROPERTY)
            .map(|raw| {
                raw.trim().parse::<usize>().map_err(|err| {
                    Error::invalid_descriptor(format!("{CHUNK_SIZE_PROPERTY}={raw}: {err}"))
                })
            })
            .transpose()
    }
}

/// `Basic base64(user[:password])`.
pub fn basic_authentication(user: &str, password: Option<&str>) -> Result<String> {
    if user.contains(':') {
        return Err(Error::InvalidCredentials(
            "user name cannot contain a colon".to_string(),
        ));
    }
    let credentials = match password {
        Some(password) => format!("{user}:{password}"),
        None => user.to_string(),
    };
    Ok(format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes())
    ))
}

pub fn accepts_descriptor(descriptor: &str) -> bool {
    ConnectionInfo::parse(descriptor, Properties::new()).is_ok()
}
