//! Configuration Loader
//!
//! Environment-aware layering on top of the `config` crate. Later layers win:
//!
//! 1. compiled defaults ([`EventLoopConfig::default`])
//! 2. `<dir>/event_loop.toml`
//! 3. `<dir>/event_loop.<environment>.toml`
//! 4. `EVENT_LOOP__<SECTION>__<KEY>` environment variables
//!
//! Both files are optional.

use super::error::{ConfigResult, ConfigurationError};
use super::EventLoopConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "EVENT_LOOP";
/// Separator between prefix, section and key in override variables
pub const ENV_SEPARATOR: &str = "__";
pub const BASE_FILE_NAME: &str = "event_loop";

pub struct ConfigManager {
    config: EventLoopConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load from the default directory with environment auto-detection.
    ///
    /// A missing default directory is not an error; defaults and
    /// environment overrides still apply.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let directory = Self::default_config_directory();
        Self::build(&directory, &environment, true).map(Arc::new)
    }

    /// Load from an explicit directory and environment, including
    /// environment variable overrides
    pub fn load_from_dir(dir: impl AsRef<Path>, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        let dir = dir.as_ref();
        Self::require_directory(dir)?;
        Self::build(dir, environment, true).map(Arc::new)
    }

    /// Load only the file layers, ignoring the process environment
    pub fn load_files(dir: impl AsRef<Path>, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        let dir = dir.as_ref();
        Self::require_directory(dir)?;
        Self::build(dir, environment, false).map(Arc::new)
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: EventLoopConfig, environment: &str) -> ConfigResult<ConfigManager> {
        config.validate()?;
        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        })
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// `EVENT_LOOP_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        env::var("EVENT_LOOP_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .map(|value| value.trim().to_lowercase())
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "development".to_string())
    }

    /// `EVENT_LOOP_CONFIG_DIR`, or `./config`
    pub fn default_config_directory() -> PathBuf {
        env::var("EVENT_LOOP_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn require_directory(dir: &Path) -> ConfigResult<()> {
        if dir.is_dir() {
            Ok(())
        } else {
            Err(ConfigurationError::DirectoryNotFound {
                path: dir.to_path_buf(),
            })
        }
    }

    fn build(dir: &Path, environment: &str, with_env_vars: bool) -> ConfigResult<ConfigManager> {
        let base_path = dir.join(format!("{BASE_FILE_NAME}.toml"));
        let env_path = dir.join(format!("{BASE_FILE_NAME}.{environment}.toml"));

        debug!(
            environment = environment,
            base = %base_path.display(),
            overrides = %env_path.display(),
            "Loading event loop configuration"
        );

        let defaults = Config::try_from(&EventLoopConfig::default())
            .map_err(|e| ConfigurationError::load_error("defaults", e))?;

        let mut builder = Config::builder()
            .add_source(defaults)
            .add_source(
                File::from(base_path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                File::from(env_path)
                    .format(FileFormat::Toml)
                    .required(false),
            );

        if with_env_vars {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let merged = builder
            .build()
            .map_err(|e| ConfigurationError::load_error(dir.display().to_string(), e))?;
        let config: EventLoopConfig = merged
            .try_deserialize()
            .map_err(ConfigurationError::deserialize_error)?;

        config.validate()?;

        info!(
            environment = environment,
            database = %config.database.redacted_url(),
            claim_batch = config.claim.max_batch_size,
            stale_after_seconds = config.watchdog.stale_after_seconds,
            "Configuration loaded"
        );

        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: dir.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_directory_is_reported() {
        let err = ConfigManager::load_files("/definitely/not/here", "test")
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::DirectoryNotFound { .. }));
    }

    #[test]
    fn test_empty_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::load_files(dir.path(), "test").unwrap();
        assert_eq!(manager.config(), &EventLoopConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("event_loop.toml"),
            "[claim]\nmax_batch_size = 25\n\n[watchdog]\nstale_after_seconds = 60\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("event_loop.production.toml"),
            "[claim]\nmax_batch_size = 250\n",
        )
        .unwrap();

        let manager = ConfigManager::load_files(dir.path(), "production").unwrap();
        assert_eq!(manager.config().claim.max_batch_size, 250);
        assert_eq!(manager.config().watchdog.stale_after_seconds, 60);
        assert_eq!(manager.config().claim.worker_id_prefix, "worker");
    }
}
