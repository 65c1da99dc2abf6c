// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::events::{ClientEventSink, SharedClientEventObserver};
use crate::protocol::{
    DEFAULT_CHUNK_SIZE, DEFAULT_DIAL_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_UPLOAD_TIMEOUT, MAX_CHUNK_SIZE,
};

pub const DEFAULT_CLIENT_TAG: &str = "xmldb-remote";

/// Connection property that overrides the chunk size.
pub const CHUNK_SIZE_PROPERTY: &str = "chunk-size";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Upper bound for one content chunk, both directions.
    pub chunk_size: usize,
    /// Wait for the next element of a server stream.
    pub read_timeout: Duration,
    /// Wait for the terminal status of an upload.
    pub upload_timeout: Duration,
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
    pub client_tag: String,
    pub events: ClientEventSink,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client_tag: DEFAULT_CLIENT_TAG.to_string(),
            events: ClientEventSink::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_options(opts: impl IntoIterator<Item = ClientOption>) -> Result<Self> {
        let mut config = Self::default();
        for opt in opts {
            opt.apply(&mut config);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::invalid_descriptor(format!(
                "chunk size {} outside 1..={}",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ClientOption(Arc<dyn Fn(&mut ClientConfig) + Send + Sync>);

impl ClientOption {
    pub fn new(apply: impl Fn(&mut ClientConfig) + Send + Sync + 'static) -> Self {
        Self(Arc::new(apply))
    }

    pub fn apply(&self, config: &mut ClientConfig) {
        (self.0)(config)
    }
}

impl std::fmt::Debug for ClientOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClientOption(..)")
    }
}

pub fn with_chunk_size(chunk_size: usize) -> ClientOption {
    ClientOption::new(move |config| config.chunk_size = chunk_size)
}

pub fn with_read_timeout(timeout: Duration) -> ClientOption {
    ClientOption::new(move |config| config.read_timeout = timeout)
}

pub fn with_upload_timeout(timeout: Duration) -> ClientOption {
    ClientOption::new(move |config| config.upload_timeout = timeout)
}

pub fn with_dial_timeout(timeout: Duration) -> ClientOption {
    ClientOption::new(move |config| config.dial_timeout = timeout)
}

pub fn with_request_timeout(timeout: Duration) -> ClientOption {
    ClientOption::new(move |config| config.request_timeout = timeout)
}

pub fn with_client_tag(tag: impl Into<String>) -> ClientOption {
    let tag = tag.into();
    ClientOption::new(move |config| config.client_tag = tag.clone())
}

pub fn with_observer(observer: SharedClientEventObserver) -> ClientOption {
    ClientOption::new(move |config| {
        config.events = ClientEventSink::with_observer(Arc::clone(&observer))
    })
}

pub fn without_events() -> ClientOption {
    ClientOption::new(|config| config.events = ClientEventSink::disabled())
}
