//! Shared configuration and logging for the nerve discovery provider.

pub mod bootstrap;
pub mod config;
pub mod logging;

pub use config::{
    Config, DiscoveryConfig, HealthConfig, LoggingConfig, ServiceFailurePolicy, ZookeeperConfig,
};
