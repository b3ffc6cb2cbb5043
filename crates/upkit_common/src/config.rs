//! upkit configuration
//!
//! Config file: $UPKIT_CONFIG, ~/.config/upkit/config.toml or
//! /etc/upkit/config.toml. Every key is optional.
//!
//! ```toml
//! [keepalive]
//! refresh_interval_secs = 60
//!
//! [kernel]
//! package_manager = "dnf5"
//! version_package = "kernel-helper"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment override for the config path
pub const CONFIG_ENV: &str = "UPKIT_CONFIG";

/// Sudo keepalive timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Seconds between silent refreshes
    pub refresh_interval_secs: u64,
    /// How long the operator gets to type a password
    pub validate_timeout_secs: u64,
    /// Deadline for one `sudo -n true`
    pub refresh_timeout_secs: u64,
    /// How long `stop()` waits for the refresh thread
    pub stop_timeout_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            validate_timeout_secs: 60,
            refresh_timeout_secs: 5,
            stop_timeout_secs: 2,
        }
    }
}

/// Where the kernel gate looks for a pending kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Package manager queried by the probe
    pub package_manager: String,
    /// Package pattern passed to `check-upgrade`
    pub probe_pattern: String,
    /// Metapackage whose pending version is shown to the operator
    pub version_package: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            package_manager: "dnf5".to_string(),
            probe_pattern: "kernel*".to_string(),
            version_package: "kernel-helper".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Spinner repaint cadence
    pub tick_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { tick_ms: 100 }
    }
}

impl ProgressConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Binary names for the OS package managers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub dnf: String,
    pub apt: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            dnf: "dnf".to_string(),
            apt: "apt".to_string(),
        }
    }
}

/// Main upkit configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpkitConfig {
    #[serde(default)]
    pub keepalive: KeepaliveConfig,

    #[serde(default)]
    pub kernel: KernelConfig,

    #[serde(default)]
    pub progress: ProgressConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

impl UpkitConfig {
    /// User config path: ~/.config/upkit/config.toml
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("upkit").join("config.toml"))
    }

    /// System config path: /etc/upkit/config.toml
    pub fn system_config_path() -> PathBuf {
        PathBuf::from("/etc/upkit/config.toml")
    }

    /// Load configuration
    ///
    /// Priority:
    /// 1. $UPKIT_CONFIG (must exist when set)
    /// 2. User config (~/.config/upkit/config.toml)
    /// 3. System config (/etc/upkit/config.toml)
    /// 4. Defaults
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load_from(Path::new(&path));
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                return Self::load_from(&user_path);
            }
        }

        let system_path = Self::system_config_path();
        if system_path.exists() {
            return Self::load_from(&system_path);
        }

        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: UpkitConfig = toml::from_str(contents)?;
        Ok(config)
    }
}
