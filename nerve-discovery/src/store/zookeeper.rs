//! ZooKeeper-backed store

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use zookeeper_client as zk;

use nerve_core::ZookeeperConfig;

use super::{CoordinationStore, EventGate, LoggingObserver, NodeStat, SessionObserver, StoreEvent, StoreSession};
use crate::error::{Error, Result};

/// Opens one ZooKeeper session per discovery pass
pub struct ZooKeeperStore {
    hosts: String,
    session_timeout: Duration,
    observer: Arc<dyn SessionObserver>,
}

impl ZooKeeperStore {
    #[must_use]
    pub fn new(hosts: impl Into<String>, session_timeout: Duration) -> Self {
        Self {
            hosts: hosts.into(),
            session_timeout,
            observer: Arc::new(LoggingObserver),
        }
    }

    #[must_use]
    pub fn from_config(config: &ZookeeperConfig) -> Self {
        Self::new(config.hosts.clone(), config.session_timeout())
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }
}

#[async_trait]
impl CoordinationStore for ZooKeeperStore {
    async fn connect(&self) -> Result<Box<dyn StoreSession>> {
        tracing::debug!(hosts = %self.hosts, "Connecting to zookeeper");

        let client = timeout(
            self.session_timeout,
            zk::Client::connector()
                .session_timeout(self.session_timeout)
                .connect(&self.hosts),
        )
        .await
        .map_err(|_| Error::Timeout(format!("Connecting to zookeeper {} timed out", self.hosts)))?
        .map_err(|e| Error::Session(format!("Failed to connect to zookeeper {}: {e}", self.hosts)))?;

        let gate = EventGate::new(self.observer.clone());
        let watches = CancellationToken::new();
        spawn_state_observer(&client, gate.clone(), watches.clone());

        Ok(Box::new(ZooKeeperSession {
            client: Mutex::new(Some(client)),
            gate,
            watches,
            hosts: self.hosts.clone(),
        }))
    }
}

/// Report session state transitions until the session closes
fn spawn_state_observer(client: &zk::Client, gate: EventGate, watches: CancellationToken) {
    let mut states = client.state_watcher();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = watches.cancelled() => return,
                state = states.changed() => {
                    gate.deliver(&StoreEvent::SessionState {
                        state: format!("{state:?}"),
                    });
                    if matches!(
                        state,
                        zk::SessionState::Expired | zk::SessionState::Closed | zk::SessionState::AuthFailed
                    ) {
                        return;
                    }
                }
            }
        }
    });
}

struct ZooKeeperSession {
    client: Mutex<Option<zk::Client>>,
    gate: EventGate,
    /// Cancels pending watch and state observer tasks
    watches: CancellationToken,
    hosts: String,
}

impl ZooKeeperSession {
    fn client(&self) -> Result<zk::Client> {
        self.client
            .lock()
            .clone()
            .ok_or_else(|| Error::Session("zookeeper session is closed".to_string()))
    }

    fn shutdown(&self) {
        let Some(client) = self.client.lock().take() else {
            return;
        };
        self.gate.close();
        self.watches.cancel();
        // dropping the last handle closes the session
        drop(client);
        tracing::debug!(hosts = %self.hosts, "Closed zookeeper session");
    }
}

fn node_stat(stat: &zk::Stat) -> NodeStat {
    NodeStat {
        version: stat.version,
        modified_txid: stat.mzxid,
    }
}

fn read_error(path: &str, err: zk::Error) -> Error {
    match err {
        zk::Error::NoNode => Error::NoNode(path.to_string()),
        other => Error::Session(format!("Failed to read {path}: {other}")),
    }
}

#[async_trait]
impl StoreSession for ZooKeeperSession {
    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let client = self.client()?;
        client.list_children(path).await.map_err(|e| match e {
            zk::Error::NoNode => Error::NoNode(path.to_string()),
            other => Error::Listing {
                path: path.to_string(),
                message: other.to_string(),
            },
        })
    }

    async fn exists(&self, path: &str) -> Result<Option<NodeStat>> {
        let client = self.client()?;
        let (stat, watcher) = client
            .check_and_watch_stat(path)
            .await
            .map_err(|e| read_error(path, e))?;

        let gate = self.gate.clone();
        let cancelled = self.watches.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                event = watcher.changed() => {
                    gate.deliver(&StoreEvent::NodeChanged {
                        path: event.path.clone(),
                        kind: format!("{:?}", event.event_type),
                    });
                }
            }
        });

        Ok(stat.as_ref().map(node_stat))
    }

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat)> {
        let client = self.client()?;
        let (data, stat) = client.get_data(path).await.map_err(|e| read_error(path, e))?;
        Ok((data, node_stat(&stat)))
    }

    async fn close(&self) {
        self.shutdown();
    }
}

impl Drop for ZooKeeperSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
