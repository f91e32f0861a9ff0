//! Endpoint discovery over a nerve-populated ZooKeeper tree
//!
//! A pass walks `<root>/<service>/<suffix>/<instance>`, decodes each instance
//! registration and optionally keeps only instances whose health endpoint
//! advertises monitoring support.

pub mod error;
pub mod health;
pub mod provider;
pub mod record;
pub mod store;
pub mod walker;

pub use error::{Error, Result};
pub use health::{HealthFilter, HealthReport, ProbeOutcome};
pub use provider::NerveDiscovery;
pub use record::{Endpoint, ServiceRecord};
pub use store::{
    CoordinationStore, LoggingObserver, MemoryStore, NodeStat, SessionObserver, StoreEvent,
    StoreSession, ZooKeeperStore,
};
pub use walker::{Candidate, TreeLayout, TreeWalker, WalkStats};
