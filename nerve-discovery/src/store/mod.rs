//! Read-only access to the coordination store
//!
//! Discovery only needs three calls (list children, stat with a watch, read
//! data), scoped to a session that lives for exactly one pass.

pub mod memory;
pub mod zookeeper;

pub use memory::MemoryStore;
pub use zookeeper::ZooKeeperStore;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// Version snapshot of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStat {
    /// Data version, bumped on every write to the node
    pub version: i32,
    /// Transaction id of the last modification
    pub modified_txid: i64,
}

/// Something the store reported while a session was open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A watch registered on `path` fired
    NodeChanged { path: String, kind: String },
    /// The session moved to a new state (disconnected, expired, ...)
    SessionState { state: String },
}

/// Hook for store events.
///
/// Discovery is a one-shot poll and never reacts to these; the hook exists so
/// the session still registers interest and operators can see the churn.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}

/// Default observer: log and move on
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_event(&self, event: &StoreEvent) {
        tracing::debug!(?event, "Event received from coordination store");
    }
}

/// Forwards events to an observer until the owning session closes.
///
/// Shared by every watch of one session; anything delivered after
/// [`EventGate::close`] is dropped.
#[derive(Clone)]
pub struct EventGate {
    observer: Arc<dyn SessionObserver>,
    closed: Arc<AtomicBool>,
}

impl EventGate {
    #[must_use]
    pub fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            observer,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn deliver(&self, event: &StoreEvent) {
        if self.closed.load(Ordering::Acquire) {
            tracing::trace!(?event, "Dropping event for closed session");
            return;
        }
        self.observer.on_event(event);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Factory for per-pass sessions
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Open a new session; failure here fails the whole pass
    async fn connect(&self) -> Result<Box<dyn StoreSession>>;
}

/// One open session against the store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreSession: Send + Sync {
    /// Names (not paths) of the children of `path`
    async fn list_children(&self, path: &str) -> Result<Vec<String>>;

    /// Stat of `path`, or `None` if it does not exist. Registers a watch.
    async fn exists(&self, path: &str) -> Result<Option<NodeStat>>;

    /// Payload and stat of `path`; `Error::NoNode` if it is gone
    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat)>;

    /// End the session. Idempotent; later events are not delivered.
    async fn close(&self);
}

/// Join path segments with a single separator between them
#[must_use]
pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_matches('/');
    format!("{parent}/{child}")
}
