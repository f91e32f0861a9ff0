//! The discovery provider consumed by the aggregation host

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use nerve_core::Config;

use crate::error::{Error, Result};
use crate::health::HealthFilter;
use crate::record::Endpoint;
use crate::store::{CoordinationStore, ZooKeeperStore};
use crate::walker::{TreeLayout, TreeWalker};

/// Resolves the live, monitorable endpoints registered under the root path.
///
/// Built from one configuration snapshot. Every call to [`discover`] is a
/// full re-resolution with its own store session; nothing is cached between
/// calls, so concurrent calls are independent.
///
/// [`discover`]: NerveDiscovery::discover
pub struct NerveDiscovery {
    store: Arc<dyn CoordinationStore>,
    walker: TreeWalker,
    /// `None` when health verification is disabled
    health: Option<HealthFilter>,
    cluster: String,
    deadline: Option<Duration>,
}

impl NerveDiscovery {
    /// Provider over an arbitrary store
    pub fn new(store: Arc<dyn CoordinationStore>, config: &Config) -> Result<Self> {
        if config.discovery.cluster_name.is_empty() {
            return Err(Error::Configuration(
                "cluster name must not be empty".to_string(),
            ));
        }

        let health = if config.health.enabled {
            Some(HealthFilter::new(&config.health)?)
        } else {
            None
        };

        Ok(Self {
            store,
            walker: TreeWalker::new(
                TreeLayout::from_config(&config.zookeeper),
                config.discovery.service_failure_policy,
            ),
            health,
            cluster: config.discovery.cluster_name.clone(),
            deadline: config.discovery.deadline(),
        })
    }

    /// Provider over the configured ZooKeeper ensemble
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            Arc::new(ZooKeeperStore::from_config(&config.zookeeper)),
            config,
        )
    }

    #[must_use]
    pub fn verifies_health(&self) -> bool {
        self.health.is_some()
    }

    /// Run one discovery pass
    pub async fn discover(&self) -> Result<Vec<Endpoint>> {
        self.discover_until(&CancellationToken::new()).await
    }

    /// Run one discovery pass, abandoning it when `cancel` fires or the
    /// configured deadline passes.
    ///
    /// The store session is closed before this returns, whatever the outcome;
    /// in-flight probes of an abandoned pass are dropped, not awaited.
    /// The result is sorted by address and free of duplicates.
    pub async fn discover_until(&self, cancel: &CancellationToken) -> Result<Vec<Endpoint>> {
        let started = Instant::now();
        let deadline = self.deadline.map(|d| started + d);

        let session = tokio::select! {
            biased;
            e = interrupted(cancel, deadline) => return Err(e),
            session = self.store.connect() => session?,
        };

        let walked = tokio::select! {
            biased;
            e = interrupted(cancel, deadline) => Err(e),
            walked = self.walker.walk(session.as_ref()) => walked,
        };
        session.close().await;
        let (candidates, stats) = walked?;

        let (kept, ineligible) = match &self.health {
            Some(filter) => tokio::select! {
                biased;
                e = interrupted(cancel, deadline) => return Err(e),
                filtered = filter.filter(candidates) => filtered,
            },
            None => (candidates, 0),
        };

        let mut endpoints: Vec<Endpoint> = kept
            .iter()
            .map(|candidate| Endpoint::new(&candidate.record, &self.cluster))
            .collect();
        endpoints.sort();
        endpoints.dedup();

        tracing::info!(
            root = %self.walker.layout().root_path,
            services = stats.services,
            skipped_services = stats.skipped_services,
            nodes = stats.nodes,
            dropped_nodes = stats.dropped_nodes,
            ineligible,
            endpoints = endpoints.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Discovery pass complete"
        );

        Ok(endpoints)
    }
}

/// Resolves once the pass must stop, with the reason
async fn interrupted(cancel: &CancellationToken, deadline: Option<Instant>) -> Error {
    match deadline {
        Some(at) => tokio::select! {
            () = cancel.cancelled() => Error::Cancelled,
            () = tokio::time::sleep_until(at) => {
                Error::Timeout("discovery deadline exceeded".to_string())
            }
        },
        None => {
            cancel.cancelled().await;
            Error::Cancelled
        }
    }
}
