//! Long-running host around the discovery provider
//!
//! The host owns the provider built from the current configuration
//! snapshot, re-resolves endpoints on a fixed period and swaps the provider
//! whenever the configuration file changes.

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nerve_core::{bootstrap::load_config, Config};
use nerve_discovery::{Endpoint, Error, NerveDiscovery};

/// Builds a provider from a configuration snapshot
pub type ProviderFactory =
    Arc<dyn Fn(&Config) -> nerve_discovery::Result<NerveDiscovery> + Send + Sync>;

struct Snapshot {
    config: Config,
    discovery: Arc<NerveDiscovery>,
}

struct Shared {
    config_path: Option<String>,
    factory: ProviderFactory,
    snapshot: RwLock<Snapshot>,
    endpoints: RwLock<Vec<Endpoint>>,
}

impl Shared {
    /// Re-read the configuration and rebuild the provider if it changed.
    ///
    /// File reads run on the blocking pool. A snapshot that fails to load or
    /// validate leaves the current provider in place.
    async fn reload(&self) -> bool {
        let path = self.config_path.clone();
        let loaded = tokio::task::spawn_blocking(move || load_config(path.as_deref())).await;

        let config = match loaded {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to reload configuration, keeping previous snapshot");
                return false;
            }
            Err(e) => {
                error!(error = %e, "Configuration reload task failed, keeping previous snapshot");
                return false;
            }
        };

        if self.snapshot.read().config == config {
            return false;
        }

        match (self.factory)(&config) {
            Ok(discovery) => {
                info!(
                    cluster = %config.discovery.cluster_name,
                    root = %config.zookeeper.root_service_path,
                    verifies_health = discovery.verifies_health(),
                    "Configuration changed, discovery provider rebuilt"
                );
                *self.snapshot.write() = Snapshot {
                    config,
                    discovery: Arc::new(discovery),
                };
                true
            }
            Err(e) => {
                warn!(error = %e, "Rejected new configuration, keeping previous snapshot");
                false
            }
        }
    }

    fn publish(&self, endpoints: Vec<Endpoint>) {
        let mut current = self.endpoints.write();

        let before: BTreeSet<&str> = current.iter().map(|e| e.address.as_str()).collect();
        let after: BTreeSet<&str> = endpoints.iter().map(|e| e.address.as_str()).collect();
        let added = after.difference(&before).count();
        let removed = before.difference(&after).count();

        if added > 0 || removed > 0 {
            info!(
                endpoints = endpoints.len(),
                added,
                removed,
                "Monitored endpoints changed"
            );
        }

        *current = endpoints;
    }

    fn poll_interval(&self) -> Duration {
        self.snapshot.read().config.discovery.poll_interval()
    }

    fn discovery(&self) -> Arc<NerveDiscovery> {
        self.snapshot.read().discovery.clone()
    }
}

/// Periodic discovery with lifecycle hooks.
///
/// `init` runs the first pass immediately and keeps polling in the
/// background; `stop` abandons any pass in flight and waits for the loop.
pub struct DiscoveryHost {
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryHost {
    /// Start polling the configured ZooKeeper ensemble
    pub fn init(config_path: Option<String>, config: Config) -> Result<Self> {
        Self::init_with(config_path, config, Arc::new(NerveDiscovery::from_config))
    }

    /// Start polling with providers built by `factory`
    pub fn init_with(
        config_path: Option<String>,
        config: Config,
        factory: ProviderFactory,
    ) -> Result<Self> {
        let discovery = factory(&config)
            .map_err(|e| anyhow::anyhow!("Failed to build discovery provider: {e}"))?;

        info!(
            cluster = %config.discovery.cluster_name,
            hosts = %config.zookeeper.hosts,
            poll_interval_secs = config.discovery.poll_interval_secs,
            verifies_health = discovery.verifies_health(),
            "Discovery host starting"
        );

        let shared = Arc::new(Shared {
            config_path,
            factory,
            snapshot: RwLock::new(Snapshot {
                config,
                discovery: Arc::new(discovery),
            }),
            endpoints: RwLock::new(Vec::new()),
        });
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(Self::poll_loop(shared.clone(), cancel_token.clone()));

        Ok(Self {
            shared,
            cancel_token,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Endpoints of the last successful pass
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.shared.endpoints.read().clone()
    }

    /// Configuration snapshot the current provider was built from
    #[must_use]
    pub fn config(&self) -> Config {
        self.shared.snapshot.read().config.clone()
    }

    /// Stop polling. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel_token.cancel();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Discovery poll loop ended abnormally: {}", e);
            }
            info!("Discovery host stopped");
        }
    }

    async fn poll_loop(shared: Arc<Shared>, cancel_token: CancellationToken) {
        let mut period = shared.poll_interval();
        let mut timer = interval_at(Instant::now(), period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut first = true;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("Discovery poll loop shutting down");
                    return;
                }
                _ = timer.tick() => {
                    if !std::mem::take(&mut first) {
                        shared.reload().await;
                    }

                    let discovery = shared.discovery();
                    match discovery.discover_until(&cancel_token).await {
                        Ok(endpoints) => shared.publish(endpoints),
                        Err(Error::Cancelled) => return,
                        Err(e) => error!(error = %e, "Discovery pass failed, retrying next period"),
                    }

                    let next = shared.poll_interval();
                    if next != period {
                        info!(poll_interval_secs = next.as_secs(), "Poll interval changed");
                        period = next;
                        timer = interval_at(Instant::now() + period, period);
                        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
            }
        }
    }
}

impl Drop for DiscoveryHost {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
