//! Instance registration payloads and the endpoints derived from them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;

/// Why a registration payload could not be turned into a record
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not a valid service record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("host is empty")]
    EmptyHost,

    #[error("port must be between 1 and 65535")]
    ZeroPort,
}

/// Decoded instance registration written by nerve
///
/// Only `host` and `port` are interpreted; anything else the agent writes
/// (`name`, `weight`, `labels`, ...) is kept as-is in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub host: String,
    pub port: u16,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ServiceRecord {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            extra: serde_json::Map::new(),
        }
    }

    /// Decode a raw node payload.
    ///
    /// Missing or unusable `host`/`port` is an error, never a default.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(raw)?;
        let mut record: Self = serde_json::from_str(text)?;

        record.host = record.host.trim().to_string();
        if record.host.is_empty() {
            return Err(DecodeError::EmptyHost);
        }
        if record.port == 0 {
            return Err(DecodeError::ZeroPort);
        }

        Ok(record)
    }

    /// `host:port`, with IPv6 literals bracketed so the result stays parseable
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// One address handed to the aggregation host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// `host:port`
    pub address: String,
    pub cluster: String,
    /// Always true; discovery has no notion of a known-down endpoint
    pub live: bool,
}

impl Endpoint {
    #[must_use]
    pub fn new(record: &ServiceRecord, cluster: impl Into<String>) -> Self {
        Self {
            address: record.authority(),
            cluster: cluster.into(),
            live: true,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (cluster={}, live={})", self.address, self.cluster, self.live)
    }
}
