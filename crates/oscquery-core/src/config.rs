//! Configuration for an OSCQuery service.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $OSCQUERY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/oscquery/config.toml
//!   3. ~/.config/oscquery/config.toml

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OscQueryConfig {
    pub service: ServiceConfig,
    pub discovery: DiscoveryConfig,
    /// Endpoints registered at startup.
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Instance name advertised over mDNS and reported as HOST_INFO.NAME.
    pub name: String,
    /// Address the HTTP server binds and advertises.
    pub host_ip: IpAddr,
    /// HTTP port. 0 = pick a free port.
    pub http_port: u16,
    /// OSC port to advertise. 0 = don't advertise an OSC service.
    pub osc_port: u16,
    /// Advertise the OSCQuery service as soon as HTTP is up.
    pub advertise: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// TTL applied to a discovered peer when none is given.
    pub default_ttl_secs: u64,
    /// Upper bound on any peer TTL. Refresh runs at half this interval.
    pub max_ttl_secs: u64,
}

/// One endpoint declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub path: String,
    pub osc_type: String,
    /// `none`, `read`, `write` or `readwrite`.
    #[serde(default = "default_access")]
    pub access: String,
    /// Initial value as a JSON array, e.g. `[0.5]`.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "oscquery".to_string(),
            host_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: 0,
            osc_port: 0,
            advertise: true,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 60,
            max_ttl_secs: 60,
        }
    }
}

fn default_access() -> String {
    "readwrite".to_string()
}

impl DiscoveryConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("oscquery")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl OscQueryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            OscQueryConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("OSCQUERY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&OscQueryConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply OSCQUERY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("OSCQUERY_SERVICE__NAME") {
            self.service.name = v;
        }
        if let Some(v) = lookup("OSCQUERY_SERVICE__HOST_IP") {
            match v.parse() {
                Ok(ip) => self.service.host_ip = ip,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid OSCQUERY_SERVICE__HOST_IP"),
            }
        }
        if let Some(v) = lookup("OSCQUERY_SERVICE__HTTP_PORT") {
            if let Ok(p) = v.parse() {
                self.service.http_port = p;
            }
        }
        if let Some(v) = lookup("OSCQUERY_SERVICE__OSC_PORT") {
            if let Ok(p) = v.parse() {
                self.service.osc_port = p;
            }
        }
        if let Some(v) = lookup("OSCQUERY_DISCOVERY__ENABLED") {
            self.discovery.enabled = v == "true" || v == "1";
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_values() {
        let config = OscQueryConfig::default();
        assert_eq!(config.service.http_port, 0);
        assert_eq!(config.service.osc_port, 0);
        assert!(config.service.advertise);
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.max_ttl(), Duration::from_secs(60));
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn overrides_apply_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("OSCQUERY_SERVICE__NAME", "Lights"),
            ("OSCQUERY_SERVICE__HOST_IP", "192.168.0.7"),
            ("OSCQUERY_SERVICE__HTTP_PORT", "8080"),
            ("OSCQUERY_SERVICE__OSC_PORT", "not-a-port"),
            ("OSCQUERY_DISCOVERY__ENABLED", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = OscQueryConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.service.name, "Lights");
        assert_eq!(config.service.host_ip, "192.168.0.7".parse::<IpAddr>().unwrap());
        assert_eq!(config.service.http_port, 8080);
        assert_eq!(config.service.osc_port, 0);
        assert!(!config.discovery.enabled);
    }

    #[test]
    fn parses_endpoints_from_toml() {
        let text = r#"
            [service]
            name = "Avatar"
            osc_port = 9000

            [[endpoints]]
            path = "/avatar/parameters/Foo"
            osc_type = "f"
            value = [0.5]
            description = "foo level"

            [[endpoints]]
            path = "/avatar/change"
            osc_type = "s"
            access = "read"
        "#;
        let config: OscQueryConfig = toml::from_str(text).unwrap();
        assert_eq!(config.service.name, "Avatar");
        assert_eq!(config.service.osc_port, 9000);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[0].access, "readwrite");
        assert_eq!(config.endpoints[0].value, Some(serde_json::json!([0.5])));
        assert_eq!(config.endpoints[1].access, "read");
        assert!(config.endpoints[1].value.is_none());
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("oscquery-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("OSCQUERY_CONFIG", config_path.to_str().unwrap());
        }

        let path = OscQueryConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = OscQueryConfig::from_file(&path).expect("load should succeed");
        assert_eq!(config.service.name, "oscquery");
        assert_eq!(config.discovery.default_ttl_secs, 60);

        unsafe {
            std::env::remove_var("OSCQUERY_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
