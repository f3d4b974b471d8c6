//! Environment constants and path utilities for lxcapi.
//!
//! This module centralizes the hardcoded paths, file names and defaults used
//! throughout the service, making them easier to maintain and modify.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const APP_DIR_NAME: &str = ".lxcapi";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "lxcapi.toml";

/// System-wide configuration file (Unix-like systems)
pub const SYSTEM_CONFIG_FILE: &str = "/etc/lxcapi/config.toml";

/// Default LXC container path, as compiled into most LXC distributions
pub const DEFAULT_LXC_PATH: &str = "/var/lib/lxc";

/// Default listen address of the HTTP gateway
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8090";

/// Default tracing filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "lxcapi=info,tower_http=info";

/// Label attached to containers created through the Docker backend
pub const MANAGED_LABEL: &str = "lxcapi.managed";

/// Runtime-related defaults
pub mod runtime {
    /// Seconds a container is given to shut down before it is killed
    pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

    /// Default LXC template when a create request does not name one
    pub const DEFAULT_LXC_TEMPLATE: &str = "download";

    /// LXC tools the LXC backend shells out to
    pub const LXC_TOOLS: &[&str] = &["lxc-create", "lxc-start", "lxc-stop", "lxc-destroy", "lxc-ls"];
}

/// Registry lock defaults
pub mod lock {
    /// Milliseconds a request waits for a busy container before giving up
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
}

/// Build the application directory path from a base directory
pub fn app_dir_path(base: &Path) -> PathBuf {
    base.join(APP_DIR_NAME)
}

/// Build the local config file path (`./.lxcapi/config.toml`)
pub fn local_config_file_path(base: &Path) -> PathBuf {
    app_dir_path(base).join(CONFIG_FILE_NAME)
}

/// Build the user config directory path (`~/.lxcapi`)
pub fn user_config_dir_path(home: &Path) -> PathBuf {
    app_dir_path(home)
}

/// Build the user config file path (`~/.lxcapi/config.toml`)
pub fn user_config_file_path(home: &Path) -> PathBuf {
    user_config_dir_path(home).join(CONFIG_FILE_NAME)
}
