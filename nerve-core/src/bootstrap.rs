//! Configuration loading

use anyhow::Result;
use std::path::Path;

use crate::Config;

/// Default file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "nerve.yaml";

/// Resolve which configuration file to read, if any.
///
/// Search order:
/// 1. explicit path (e.g. a `--config` flag), which must exist
/// 2. `NERVE_CONFIG_PATH` environment variable, skipped if missing
/// 3. `./nerve.yaml`, skipped if missing
pub fn resolve_config_path(explicit: Option<&str>) -> Result<Option<String>> {
    if let Some(path) = explicit {
        if !Path::new(path).exists() {
            return Err(anyhow::anyhow!("Configuration file {path} does not exist"));
        }
        return Ok(Some(path.to_string()));
    }

    Ok(std::env::var("NERVE_CONFIG_PATH")
        .ok()
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            Path::new(DEFAULT_CONFIG_FILE)
                .exists()
                .then(|| DEFAULT_CONFIG_FILE.to_string())
        }))
}

/// Load and validate a configuration snapshot.
///
/// Unlike a missing file, an unreadable or invalid one is an error: a
/// discovery pass against the wrong tree is worse than no pass at all.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config = match resolve_config_path(explicit)? {
        Some(path) => {
            tracing::debug!(path = %path, "Loading configuration file");
            Config::from_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
        }
        None => Config::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration from environment: {e}"))?,
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            tracing::error!("Config validation error: {}", error);
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_validates() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "health:\n  protocol: ftp").unwrap();

        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(err.to_string().contains("health.protocol"));
    }

    #[test]
    fn test_load_config_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "zookeeper:\n  hosts: \"localhost:2181\"").unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.zookeeper.hosts, "localhost:2181");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("typo.yaml");
        let missing = missing.to_str().unwrap();

        let err = resolve_config_path(Some(missing)).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(load_config(Some(missing)).is_err());
    }

    #[test]
    fn test_existing_explicit_file_is_used() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let path = file.path().to_str().unwrap();

        assert_eq!(resolve_config_path(Some(path)).unwrap().as_deref(), Some(path));
    }
}
