//! Service configuration and discovery.
//!
//! Configuration is looked up in this order, first hit wins:
//! 1. Current directory: `./lxcapi.toml` or `./.lxcapi/config.toml`
//! 2. User config: `~/.lxcapi/config.toml`
//! 3. System config: `/etc/lxcapi/config.toml`
//! 4. Built-in defaults

use crate::container::LockPolicy;
use crate::env;
use crate::runtime::{ContainerRuntime, LxcRuntime, MemoryRuntime, RuntimeBackend};
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How a request behaves when the container it targets is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockPolicyKind {
    /// Wait up to `timeout_ms` for the lock
    #[default]
    Wait,
    /// Report busy immediately
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub policy: LockPolicyKind,
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            policy: LockPolicyKind::Wait,
            timeout_ms: env::lock::DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl LockConfig {
    pub fn to_lock_policy(&self) -> LockPolicy {
        match self.policy {
            LockPolicyKind::Wait => LockPolicy::Wait {
                timeout: Duration::from_millis(self.timeout_ms),
            },
            LockPolicyKind::FailFast => LockPolicy::FailFast,
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP gateway binds to
    pub listen_addr: String,
    /// Container path handed to every LXC tool invocation
    pub lxcpath: PathBuf,
    pub runtime: RuntimeBackend,
    /// Grace period for stop before the runtime kills the container
    pub stop_timeout_secs: u64,
    /// Reconcile the registry with the runtime before serving
    pub reconcile_on_startup: bool,
    /// Tracing filter used when `RUST_LOG` is unset
    pub log_filter: String,
    pub lock: LockConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: env::DEFAULT_LISTEN_ADDR.to_string(),
            lxcpath: PathBuf::from(env::DEFAULT_LXC_PATH),
            runtime: RuntimeBackend::default(),
            stop_timeout_secs: env::runtime::DEFAULT_STOP_TIMEOUT_SECS,
            reconcile_on_startup: true,
            log_filter: env::DEFAULT_LOG_FILTER.to_string(),
            lock: LockConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write config file {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("Invalid listen_addr '{}'", self.listen_addr))
    }

    /// Reject settings the service cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr()?;
        if self.lxcpath.as_os_str().is_empty() {
            bail!("lxcpath must not be empty");
        }
        if self.lock.policy == LockPolicyKind::Wait && self.lock.timeout_ms == 0 {
            bail!("lock.timeout_ms must be greater than zero with the wait policy");
        }
        Ok(())
    }

    /// Instantiate the configured runtime backend.
    ///
    /// Does not check that the backend is usable; call
    /// [`ContainerRuntime::health_check`] for that.
    pub async fn build_runtime(&self) -> anyhow::Result<Arc<dyn ContainerRuntime>> {
        match self.runtime {
            RuntimeBackend::Lxc => Ok(Arc::new(LxcRuntime::new(
                &self.lxcpath,
                self.stop_timeout_secs,
            ))),
            RuntimeBackend::Memory => Ok(Arc::new(MemoryRuntime::new())),
            #[cfg(feature = "docker")]
            RuntimeBackend::Docker => {
                let runtime = crate::runtime::DockerRuntime::connect(self.stop_timeout_secs)
                    .await
                    .context("Failed to connect to the Docker runtime")?;
                Ok(Arc::new(runtime))
            }
            #[cfg(not(feature = "docker"))]
            RuntimeBackend::Docker => {
                bail!("the docker runtime requires building with the `docker` feature")
            }
        }
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load the explicit config file if given, otherwise the first one found
    /// in the discovery hierarchy, otherwise defaults.
    ///
    /// Returns the config and the file it came from.
    pub fn load(config_override: Option<&Path>) -> anyhow::Result<(ServiceConfig, Option<PathBuf>)> {
        if let Some(path) = config_override {
            return Ok((ServiceConfig::from_toml_file(path)?, Some(path.to_path_buf())));
        }

        match Self::find_config_file() {
            Some(path) => Ok((ServiceConfig::from_toml_file(&path)?, Some(path))),
            None => Ok((ServiceConfig::default(), None)),
        }
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::first_existing(Self::get_config_candidates())
    }

    fn first_existing(candidates: Vec<PathBuf>) -> Option<PathBuf> {
        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Get list of configuration file candidates in priority order
    pub fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from(env::SYSTEM_CONFIG_FILE));

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Write a default config file, to `path` or `~/.lxcapi/config.toml`.
    ///
    /// An existing file is left alone unless `force` is set.
    pub fn init_config(path: Option<&Path>, force: bool) -> anyhow::Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let home_dir =
                    Self::get_home_dir().context("Could not determine home directory")?;
                env::user_config_file_path(&home_dir)
            }
        };

        if config_path.exists() && !force {
            bail!(
                "Configuration file already exists: {:?} (use --force to overwrite)",
                config_path
            );
        }

        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        ServiceConfig::default().to_toml_file(&config_path)?;
        info!("Created default configuration file: {:?}", config_path);
        Ok(config_path)
    }

    /// Print the discovery hierarchy and the effective configuration.
    pub fn show_discovery_info(config_override: Option<&Path>) -> anyhow::Result<()> {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "✓ EXISTS"
            } else if candidate.exists() {
                "✗ NOT A FILE"
            } else {
                "✗ NOT FOUND"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        let (config, source) = Self::load(config_override)?;
        println!();
        match source {
            Some(path) => println!("Active configuration: {:?}", path),
            None => println!("Active configuration: Built-in defaults"),
        }
        println!();
        print!("{}", config.to_toml_string()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.listen_addr().unwrap().port(), 8090);
        assert_eq!(config.lxcpath, PathBuf::from("/var/lib/lxc"));
        assert_eq!(config.runtime, RuntimeBackend::Lxc);
        assert!(config.reconcile_on_startup);
        assert_eq!(
            config.lock.to_lock_policy(),
            LockPolicy::Wait {
                timeout: Duration::from_millis(5_000)
            }
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ServiceConfig::from_toml_str(
            r#"
runtime = "memory"

[lock]
policy = "fail-fast"
"#,
        )
        .unwrap();

        assert_eq!(config.runtime, RuntimeBackend::Memory);
        assert_eq!(config.lock.to_lock_policy(), LockPolicy::FailFast);
        assert_eq!(config.listen_addr, env::DEFAULT_LISTEN_ADDR);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ServiceConfig::from_toml_str(r#"listen_addr = "not an address""#).is_err());
        assert!(ServiceConfig::from_toml_str(r#"runtime = "qemu""#).is_err());
        assert!(ServiceConfig::from_toml_str("[lock]\ntimeout_ms = 0").is_err());
    }

    #[test]
    fn test_toml_file_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lxcapi.toml");

        let mut config = ServiceConfig::default();
        config.lxcpath = PathBuf::from("/srv/lxc");
        config.stop_timeout_secs = 30;
        config.to_toml_file(&path).unwrap();

        assert_eq!(ServiceConfig::from_toml_file(&path).unwrap(), config);
    }

    #[test]
    fn test_first_existing_candidate_wins() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.toml");
        let second = temp_dir.path().join("second.toml");
        let third = temp_dir.path().join("third.toml");
        fs::write(&second, "").unwrap();
        fs::write(&third, "").unwrap();

        assert_eq!(
            ConfigDiscovery::first_existing(vec![missing, second.clone(), third]),
            Some(second)
        );
        // Directories are not config files
        assert_eq!(
            ConfigDiscovery::first_existing(vec![temp_dir.path().to_path_buf()]),
            None
        );
    }

    #[test]
    fn test_load_with_override() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        fs::write(&path, "stop_timeout_secs = 3\n").unwrap();

        let (config, source) = ConfigDiscovery::load(Some(&path)).unwrap();
        assert_eq!(config.stop_timeout_secs, 3);
        assert_eq!(source, Some(path));
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let created = ConfigDiscovery::init_config(Some(&path), false).unwrap();
        assert_eq!(created, path);
        assert_eq!(
            ServiceConfig::from_toml_file(&path).unwrap(),
            ServiceConfig::default()
        );

        assert!(ConfigDiscovery::init_config(Some(&path), false).is_err());
        assert!(ConfigDiscovery::init_config(Some(&path), true).is_ok());
    }

    #[tokio::test]
    async fn test_build_memory_runtime() {
        let config = ServiceConfig {
            runtime: RuntimeBackend::Memory,
            ..Default::default()
        };
        let runtime = config.build_runtime().await.unwrap();
        assert_eq!(runtime.runtime_type(), "memory");
    }
}
