//! Active verification that an instance exposes the monitoring contract
//!
//! One GET per candidate per pass, no retries. Anything short of a 200 whose
//! body says `"hystrix": true` excludes the candidate for this pass only.

use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use url::Url;

use nerve_core::HealthConfig;

use crate::error::{Error, Result};
use crate::record::ServiceRecord;
use crate::walker::Candidate;

/// Body of a health response; unknown fields are ignored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(rename = "hystrix", default)]
    pub supports_monitoring: bool,
}

/// Result of probing one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Eligible,
    /// 200, but the service does not advertise monitoring support
    Unsupported,
    UnexpectedStatus(u16),
    /// Connection refused, timeout, bad URL, ...
    Transport(String),
    MalformedBody(String),
}

impl ProbeOutcome {
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Health filter shared across passes.
///
/// Holds a pooled HTTP client; cloning is cheap and clones share the pool.
#[derive(Debug, Clone)]
pub struct HealthFilter {
    client: Client,
    protocol: String,
    path: String,
    max_concurrent_probes: usize,
}

impl HealthFilter {
    pub fn new(config: &HealthConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            protocol: config.protocol.clone(),
            path: config.normalized_path(),
            max_concurrent_probes: config.max_concurrent_probes.max(1),
        })
    }

    /// `<protocol>://<host>:<port><path>` for `record`
    pub fn health_url(&self, record: &ServiceRecord) -> Result<Url> {
        let raw = format!("{}://{}{}", self.protocol, record.authority(), self.path);
        Url::parse(&raw).map_err(|e| Error::Probe(format!("Invalid health URL {raw}: {e}")))
    }

    /// Probe one instance. Never fails; failures are outcomes.
    pub async fn probe(&self, record: &ServiceRecord) -> ProbeOutcome {
        let url = match self.health_url(record) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(service = %record, error = %e, "Cannot build health URL");
                return ProbeOutcome::Transport(e.to_string());
            }
        };
        tracing::debug!(service = %record, url = %url, "Checking monitoring support");

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(service = %record, url = %url, error = %e, "Error getting health data");
                return ProbeOutcome::Transport(e.to_string());
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(service = %record, url = %url, status = status.as_u16(), "Health check failed");
            return ProbeOutcome::UnexpectedStatus(status.as_u16());
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(service = %record, url = %url, error = %e, "Error reading health body");
                return ProbeOutcome::Transport(e.to_string());
            }
        };

        match serde_json::from_slice::<HealthReport>(&body) {
            Ok(report) if report.supports_monitoring => ProbeOutcome::Eligible,
            Ok(_) => {
                tracing::debug!(service = %record, url = %url, "Service does not support monitoring");
                ProbeOutcome::Unsupported
            }
            Err(e) => {
                tracing::warn!(service = %record, url = %url, error = %e, "Malformed health body");
                ProbeOutcome::MalformedBody(e.to_string())
            }
        }
    }

    pub async fn is_eligible(&self, record: &ServiceRecord) -> bool {
        self.probe(record).await.is_eligible()
    }

    /// Probe every candidate with bounded concurrency and keep the eligible ones.
    ///
    /// Returns the kept candidates and the number excluded.
    pub async fn filter(&self, candidates: Vec<Candidate>) -> (Vec<Candidate>, usize) {
        let total = candidates.len();
        let permits = Semaphore::new(self.max_concurrent_probes);
        let permits = &permits;

        let probed = join_all(candidates.into_iter().map(|candidate| async move {
            // never closed, so acquire cannot fail
            let _permit = permits.acquire().await;
            let outcome = self.probe(&candidate.record).await;
            (candidate, outcome)
        }))
        .await;

        let kept: Vec<Candidate> = probed
            .into_iter()
            .filter(|(_, outcome)| outcome.is_eligible())
            .map(|(candidate, _)| candidate)
            .collect();
        let excluded = total - kept.len();

        (kept, excluded)
    }
}
