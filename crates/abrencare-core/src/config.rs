//! Client configuration management.
//!
//! This module handles loading and saving the client configuration, which
//! selects the backend origin, the credential store backend and the request
//! timeouts, and remembers the last used username.
//!
//! Configuration is stored at `~/.config/abrencare/config.json`. Environment
//! variables override individual fields after loading.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "abrencare";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Production API origin.
pub const PRODUCTION_BASE_URL: &str = "https://api.abrencare.app";

/// Port the development backend listens on.
const DEV_PORT: u16 = 8000;

/// Host alias the Android emulator uses for the development machine.
const ANDROID_EMULATOR_HOST: &str = "10.0.2.2";

/// The iOS simulator shares the host's network stack.
const IOS_SIMULATOR_HOST: &str = "localhost";

/// LAN address of the development machine, used by physical devices.
const DEFAULT_LAN_HOST: &str = "192.168.1.100";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on the best-effort logout call.
/// Short enough that logging out never feels stuck on a dead network.
const DEFAULT_LOGOUT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    #[default]
    Development,
    Production,
}

/// Runtime platform, used only to pick a development origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    AndroidEmulator,
    IosSimulator,
    #[default]
    Device,
}

/// Which credential store backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// OS keychain via `keyring`
    #[default]
    Keyring,
    /// Encrypted JSON file in the data directory
    File,
    /// Process memory only; nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub build_mode: BuildMode,
    pub platform: Platform,
    pub lan_host: String,
    /// Explicit origin; bypasses the build-mode policy when set.
    pub base_url: Option<String>,
    pub store: StoreBackend,
    pub request_timeout_secs: u64,
    pub logout_timeout_secs: u64,
    pub last_username: Option<String>,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
    /// Passphrase for the encrypted file store. Normally supplied through
    /// `ABRENCARE_STORE_PASSPHRASE` and never written back to disk.
    #[serde(skip_serializing)]
    pub store_passphrase: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build_mode: BuildMode::default(),
            platform: Platform::default(),
            lan_host: DEFAULT_LAN_HOST.to_string(),
            base_url: None,
            store: StoreBackend::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            logout_timeout_secs: DEFAULT_LOGOUT_TIMEOUT_SECS,
            last_username: None,
            log_dir: None,
            store_passphrase: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the encrypted credential file.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Apply `ABRENCARE_*` overrides. Unparseable values are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ABRENCARE_BASE_URL").filter(|s| !s.is_empty()) {
            self.base_url = Some(url);
        }
        if let Some(host) = lookup("ABRENCARE_LAN_HOST").filter(|s| !s.is_empty()) {
            self.lan_host = host;
        }
        if let Some(mode) = lookup("ABRENCARE_BUILD_MODE") {
            match parse_enum(&mode) {
                Some(mode) => self.build_mode = mode,
                None => warn!(value = %mode, "Ignoring unknown ABRENCARE_BUILD_MODE"),
            }
        }
        if let Some(platform) = lookup("ABRENCARE_PLATFORM") {
            match parse_enum(&platform) {
                Some(platform) => self.platform = platform,
                None => warn!(value = %platform, "Ignoring unknown ABRENCARE_PLATFORM"),
            }
        }
        if let Some(store) = lookup("ABRENCARE_STORE") {
            match parse_enum(&store) {
                Some(store) => self.store = store,
                None => warn!(value = %store, "Ignoring unknown ABRENCARE_STORE"),
            }
        }
        if let Some(passphrase) = lookup("ABRENCARE_STORE_PASSPHRASE") {
            self.store_passphrase = Some(passphrase);
        }
    }

    /// Resolve the backend origin.
    ///
    /// Development builds talk to a backend on the developer's machine, reached
    /// differently per platform; production builds always use the fixed origin.
    pub fn base_url(&self) -> String {
        if let Some(ref url) = self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.build_mode {
            BuildMode::Production => PRODUCTION_BASE_URL.to_string(),
            BuildMode::Development => {
                let host = match self.platform {
                    Platform::AndroidEmulator => ANDROID_EMULATOR_HOST,
                    Platform::IosSimulator => IOS_SIMULATOR_HOST,
                    Platform::Device => self.lan_host.as_str(),
                };
                format!("http://{}:{}", host, DEV_PORT)
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_secs(self.logout_timeout_secs)
    }
}

/// Parse a snake_case variant name ("android_emulator", "production", ...).
fn parse_enum<T: serde::de::DeserializeOwned>(value: &str) -> Option<T> {
    let normalized = value.trim().to_lowercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(normalized)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_for(mode: BuildMode, platform: Platform) -> Config {
        Config {
            build_mode: mode,
            platform,
            ..Config::default()
        }
    }

    #[test]
    fn test_base_url_development_per_platform() {
        assert_eq!(
            config_for(BuildMode::Development, Platform::AndroidEmulator).base_url(),
            "http://10.0.2.2:8000"
        );
        assert_eq!(
            config_for(BuildMode::Development, Platform::IosSimulator).base_url(),
            "http://localhost:8000"
        );
        assert_eq!(
            config_for(BuildMode::Development, Platform::Device).base_url(),
            "http://192.168.1.100:8000"
        );
    }

    #[test]
    fn test_base_url_production_ignores_platform() {
        for platform in [Platform::AndroidEmulator, Platform::IosSimulator, Platform::Device] {
            assert_eq!(
                config_for(BuildMode::Production, platform).base_url(),
                PRODUCTION_BASE_URL
            );
        }
    }

    #[test]
    fn test_explicit_base_url_wins() {
        let mut config = config_for(BuildMode::Production, Platform::Device);
        config.base_url = Some("http://127.0.0.1:9000/api/".to_string());
        assert_eq!(config.base_url(), "http://127.0.0.1:9000/api");
    }

    #[test]
    fn test_apply_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ABRENCARE_BUILD_MODE", "production"),
            ("ABRENCARE_PLATFORM", "ios-simulator"),
            ("ABRENCARE_STORE", "FILE"),
            ("ABRENCARE_LAN_HOST", "10.1.1.5"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.build_mode, BuildMode::Production);
        assert_eq!(config.platform, Platform::IosSimulator);
        assert_eq!(config.store, StoreBackend::File);
        assert_eq!(config.lan_host, "10.1.1.5");
    }

    #[test]
    fn test_apply_env_ignores_garbage() {
        let mut config = Config::default();
        config.apply_env(|key| (key == "ABRENCARE_BUILD_MODE").then(|| "staging".to_string()));
        assert_eq!(config.build_mode, BuildMode::Development);
    }

    #[test]
    fn test_passphrase_not_serialized() {
        let config = Config {
            store_passphrase: Some("secret".to_string()),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"platform": "android_emulator"}"#).unwrap();
        assert_eq!(config.platform, Platform::AndroidEmulator);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.logout_timeout(), Duration::from_secs(5));
    }
}
