//! In-process coordination store
//!
//! Mirrors the parts of ZooKeeper semantics discovery relies on: implicit
//! parents, per-node versions, one-shot watches. Failure injection hooks
//! let callers simulate an unreachable ensemble, a broken subtree, or a node
//! deleted between `exists` and `get_data`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{CoordinationStore, EventGate, LoggingObserver, NodeStat, SessionObserver, StoreEvent, StoreSession};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct MemoryNode {
    data: Vec<u8>,
    stat: NodeStat,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, MemoryNode>,
    last_txid: i64,
    unreachable: bool,
    failing_listings: HashSet<String>,
    vanishing: HashSet<String>,
    watches: Vec<(String, EventGate)>,
    sessions_opened: usize,
    sessions_closed: usize,
}

impl Tree {
    fn next_txid(&mut self) -> i64 {
        self.last_txid += 1;
        self.last_txid
    }

    fn ensure_node(&mut self, path: &str) {
        if path == "/" || self.nodes.contains_key(path) {
            return;
        }
        if let Some(parent) = parent_of(path) {
            self.ensure_node(parent);
        }
        let txid = self.next_txid();
        self.nodes.insert(
            path.to_string(),
            MemoryNode {
                data: Vec::new(),
                stat: NodeStat {
                    version: 0,
                    modified_txid: txid,
                },
            },
        );
    }

    /// Remove and return the gates watching `path`; watches are one-shot
    fn take_watches(&mut self, path: &str) -> Vec<EventGate> {
        let mut fired = Vec::new();
        self.watches.retain(|(watched, gate)| {
            if gate.is_closed() {
                return false;
            }
            if watched == path {
                fired.push(gate.clone());
                return false;
            }
            true
        });
        fired
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

/// Shared in-memory tree; clones see the same data
#[derive(Clone)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
    observer: Arc<dyn SessionObserver>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_observer(Arc::new(LoggingObserver))
    }

    #[must_use]
    pub fn with_observer(observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::default())),
            observer,
        }
    }

    /// Create or overwrite `path`, creating missing parents
    pub fn put(&self, path: &str, data: impl Into<Vec<u8>>) {
        let (fired, kind) = {
            let mut tree = self.tree.lock();
            if let Some(parent) = parent_of(path) {
                tree.ensure_node(parent);
            }
            let txid = tree.next_txid();
            let kind = match tree.nodes.get_mut(path) {
                Some(node) => {
                    node.data = data.into();
                    node.stat.version += 1;
                    node.stat.modified_txid = txid;
                    "NodeDataChanged"
                }
                None => {
                    tree.nodes.insert(
                        path.to_string(),
                        MemoryNode {
                            data: data.into(),
                            stat: NodeStat {
                                version: 0,
                                modified_txid: txid,
                            },
                        },
                    );
                    "NodeCreated"
                }
            };
            (tree.take_watches(path), kind)
        };
        Self::fire(&fired, path, kind);
    }

    /// Delete `path` and everything below it
    pub fn remove(&self, path: &str) {
        let fired = {
            let mut tree = self.tree.lock();
            let prefix = format!("{}/", path.trim_end_matches('/'));
            tree.nodes
                .retain(|existing, _| existing != path && !existing.starts_with(&prefix));
            tree.take_watches(path)
        };
        Self::fire(&fired, path, "NodeDeleted");
    }

    /// Make every subsequent `connect` fail
    pub fn set_unreachable(&self, unreachable: bool) {
        self.tree.lock().unreachable = unreachable;
    }

    /// Make listing the children of `path` fail
    pub fn fail_listing(&self, path: &str) {
        self.tree.lock().failing_listings.insert(path.to_string());
    }

    /// Let `exists` see `path` but make the following read miss it,
    /// as if the node was deleted in between
    pub fn vanish_on_read(&self, path: &str) {
        self.tree.lock().vanishing.insert(path.to_string());
    }

    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        self.tree.lock().sessions_opened
    }

    #[must_use]
    pub fn sessions_closed(&self) -> usize {
        self.tree.lock().sessions_closed
    }

    /// Sessions opened and not yet closed
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        let tree = self.tree.lock();
        tree.sessions_opened - tree.sessions_closed
    }

    fn fire(gates: &[EventGate], path: &str, kind: &str) {
        let event = StoreEvent::NodeChanged {
            path: path.to_string(),
            kind: kind.to_string(),
        };
        for gate in gates {
            gate.deliver(&event);
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn StoreSession>> {
        let mut tree = self.tree.lock();
        if tree.unreachable {
            return Err(Error::Session("memory store is unreachable".to_string()));
        }
        tree.sessions_opened += 1;

        Ok(Box::new(MemorySession {
            tree: self.tree.clone(),
            gate: EventGate::new(self.observer.clone()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySession {
    tree: Arc<Mutex<Tree>>,
    gate: EventGate,
    closed: AtomicBool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Session("session is closed".to_string()));
        }
        Ok(())
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.gate.close();
        let mut tree = self.tree.lock();
        tree.sessions_closed += 1;
        tree.watches.retain(|(_, gate)| !gate.is_closed());
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        let tree = self.tree.lock();

        if tree.failing_listings.contains(path) {
            return Err(Error::Listing {
                path: path.to_string(),
                message: "injected listing failure".to_string(),
            });
        }
        if path != "/" && !tree.nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }

        Ok(tree
            .nodes
            .keys()
            .filter(|candidate| parent_of(candidate) == Some(path))
            .filter_map(|candidate| candidate.rsplit('/').next())
            .map(ToString::to_string)
            .collect())
    }

    async fn exists(&self, path: &str) -> Result<Option<NodeStat>> {
        self.ensure_open()?;
        let mut tree = self.tree.lock();
        tree.watches.push((path.to_string(), self.gate.clone()));
        Ok(tree.nodes.get(path).map(|node| node.stat))
    }

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat)> {
        self.ensure_open()?;
        let tree = self.tree.lock();
        if tree.vanishing.contains(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        tree.nodes
            .get(path)
            .map(|node| (node.data.clone(), node.stat))
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }

    async fn close(&self) {
        self.shutdown();
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
