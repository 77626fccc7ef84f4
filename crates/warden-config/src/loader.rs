use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::WardenConfig;

/// Loads the Warden configuration from disk with env-var overrides.
pub struct ConfigLoader {
    config: Arc<RwLock<WardenConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > WARDEN_CONFIG env > ./warden.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("WARDEN_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("warden.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> warden_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<WardenConfig>(&raw).map_err(|e| {
                warden_core::WardenError::Config(format!(
                    "failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            WardenConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Validate config — log warnings, fail on errors
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(warden_core::WardenError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> WardenConfig {
        self.config.read().clone()
    }

    /// Path the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (WARDEN_STORE_PATH, WARDEN_LOG_LEVEL, etc.)
    fn apply_env_overrides(mut config: WardenConfig) -> WardenConfig {
        if let Ok(v) = std::env::var("WARDEN_STORE_PATH") {
            config.store.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WARDEN_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("WARDEN_GOVERNOR_CAPACITY") {
            if let Ok(capacity) = v.parse::<f64>() {
                config.governor.capacity = capacity;
            }
        }
        if let Ok(v) = std::env::var("WARDEN_GOVERNOR_REFILL_PER_MINUTE") {
            if let Ok(refill) = v.parse::<f64>() {
                config.governor.refill_per_minute = refill;
            }
        }
        if let Ok(v) = std::env::var("WARDEN_CONFIDENCE_HALF_LIFE_HOURS") {
            if let Ok(hours) = v.parse::<f64>() {
                config.confidence.half_life_hours = hours;
            }
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> warden_core::Result<()> {
        if !self.config_path.exists() {
            return Err(warden_core::WardenError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = toml::from_str::<WardenConfig>(&raw).map_err(|e| {
            warden_core::WardenError::Config(format!(
                "failed to parse {}: {}",
                self.config_path.display(),
                e
            ))
        })?;
        let new_config = Self::apply_env_overrides(new_config);
        if let Err(e) = new_config.validate() {
            return Err(warden_core::WardenError::Config(e));
        }
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.get().governor.capacity, 10.0);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[governor]\ncapacity = 3.0\nrefill_per_minute = 6.0").unwrap();
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        let config = loader.get();
        assert_eq!(config.governor.capacity, 3.0);
        assert_eq!(config.governor.refill_per_minute, 6.0);
        assert_eq!(config.governor.cost_per_run, 1.0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[governor]\ncapacity = -1.0").unwrap();
        assert!(ConfigLoader::load(Some(&path)).is_err());
    }

    #[test]
    fn reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "[governor]\ncapacity = 5.0\n").unwrap();
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.get().governor.capacity, 5.0);

        std::fs::write(&path, "[governor]\ncapacity = 7.0\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().governor.capacity, 7.0);
    }
}
