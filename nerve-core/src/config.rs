use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Discovery configuration snapshot
///
/// A value of this type is immutable once handed to a provider. Reloading
/// produces a new snapshot rather than mutating the old one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub zookeeper: ZookeeperConfig,
    pub discovery: DiscoveryConfig,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZookeeperConfig {
    /// Comma separated ensemble, e.g. "zk1:2181,zk2:2181"
    pub hosts: String,
    pub session_timeout_ms: u64,
    /// Parent of one child node per service name
    pub root_service_path: String,
    /// Segment under each service holding the instance registrations
    pub services_suffix_path: String,
}

impl Default for ZookeeperConfig {
    fn default() -> Self {
        Self {
            hosts: String::new(),
            session_timeout_ms: 3000,
            root_service_path: "/nerve/services".to_string(),
            services_suffix_path: "services".to_string(),
        }
    }
}

impl ZookeeperConfig {
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

/// What to do when listing one service's instances fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFailurePolicy {
    /// Fail the whole discovery pass
    #[default]
    FailFast,
    /// Log the failure and carry on with the remaining services
    SkipService,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Tag applied to every endpoint of a pass
    pub cluster_name: String,
    pub service_failure_policy: ServiceFailurePolicy,
    /// Overall bound for one pass (session + probes); unbounded when unset
    pub deadline_ms: Option<u64>,
    /// Interval used by the `watch` host loop
    pub poll_interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cluster_name: "Default".to_string(),
            service_failure_policy: ServiceFailurePolicy::FailFast,
            deadline_ms: None,
            poll_interval_secs: 30,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Active health verification of discovered instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// When false every well-formed registration is returned unprobed
    pub enabled: bool,
    pub path: String,
    /// "http" or "https"
    pub protocol: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_concurrent_probes: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
            protocol: "http".to_string(),
            connect_timeout_ms: 500,
            read_timeout_ms: 1000,
            max_concurrent_probes: 16,
        }
    }
}

impl HealthConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Health path with a guaranteed leading separator
    #[must_use]
    pub fn normalized_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty"
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Build a snapshot from defaults, then `config_file` if it exists, then
    /// `NERVE__*` environment variables; later sources win.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // NERVE__ZOOKEEPER__HOSTS, NERVE__HEALTH__ENABLED, ...
        builder = builder.add_source(
            Environment::with_prefix("NERVE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Defaults overlaid with the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the snapshot for settings discovery cannot run with.
    ///
    /// Every violation is reported, not only the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let zk = &self.zookeeper;
        if zk.hosts.split(',').all(|h| h.trim().is_empty()) {
            errors.push("zookeeper.hosts must name at least one server".to_string());
        }
        if zk.session_timeout_ms == 0 {
            errors.push("zookeeper.session_timeout_ms must be positive".to_string());
        }
        if !zk.root_service_path.starts_with('/') {
            errors.push(format!(
                "zookeeper.root_service_path must be absolute, got '{}'",
                zk.root_service_path
            ));
        }
        if zk.services_suffix_path.trim_matches('/').is_empty() {
            errors.push("zookeeper.services_suffix_path must not be empty".to_string());
        }

        if self.discovery.cluster_name.is_empty() {
            errors.push("discovery.cluster_name must not be empty".to_string());
        }
        if self.discovery.deadline_ms == Some(0) {
            errors.push("discovery.deadline_ms must be positive when set".to_string());
        }
        if self.discovery.poll_interval_secs == 0 {
            errors.push("discovery.poll_interval_secs must be positive".to_string());
        }

        let health = &self.health;
        if !matches!(health.protocol.as_str(), "http" | "https") {
            errors.push(format!(
                "health.protocol must be http or https, got '{}'",
                health.protocol
            ));
        }
        if health.connect_timeout_ms == 0 || health.read_timeout_ms == 0 {
            errors.push("health timeouts must be positive".to_string());
        }
        if health.max_concurrent_probes == 0 {
            errors.push("health.max_concurrent_probes must be positive".to_string());
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be json or pretty, got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
