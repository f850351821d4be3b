//! Configuration Vault – reads/writes `~/.gridshield/config.toml`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use gridshield_runtime::ShieldConfig;
use serde::{Deserialize, Serialize};

/// Persisted user configuration stored in `~/.gridshield/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the vendor cloud control API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Cloud API bearer token (stored as plain text – the vault restricts
    /// file permissions to the owner on unix).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// When `true`, dispatch against a simulated device instead of the cloud.
    #[serde(default = "default_simulate")]
    pub simulate: bool,

    /// Simulated device answer latency, in milliseconds.
    #[serde(default = "default_simulate_latency_ms")]
    pub simulate_latency_ms: u64,

    /// Simulated device fails every n-th call (0 = never fail).
    #[serde(default)]
    pub simulate_fail_every: u32,

    /// Maximum admitted-but-unpurged requests.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Minimum spacing between dispatch attempts, in milliseconds.
    #[serde(default = "default_min_dispatch_interval_ms")]
    pub min_dispatch_interval_ms: u64,

    /// Per-attempt cloud call timeout, in seconds.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    /// Retries after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base retry backoff, in seconds (the n-th backoff is `base × n`).
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Settled-request retention before purge, in seconds.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Smallest accepted export limit, in watts.
    #[serde(default)]
    pub export_limit_min: u32,

    /// Largest accepted export limit, in watts.
    #[serde(default = "default_export_limit_max")]
    pub export_limit_max: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base_url", &self.api_base_url)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("simulate", &self.simulate)
            .field("simulate_latency_ms", &self.simulate_latency_ms)
            .field("simulate_fail_every", &self.simulate_fail_every)
            .field("capacity", &self.capacity)
            .field("min_dispatch_interval_ms", &self.min_dispatch_interval_ms)
            .field("dispatch_timeout_secs", &self.dispatch_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("backoff_base_secs", &self.backoff_base_secs)
            .field("retention_secs", &self.retention_secs)
            .field("export_limit_min", &self.export_limit_min)
            .field("export_limit_max", &self.export_limit_max)
            .finish()
    }
}

fn default_api_base_url() -> String {
    "https://api.example-energy.io".to_string()
}
fn default_simulate() -> bool {
    true
}
fn default_simulate_latency_ms() -> u64 {
    750
}
fn default_capacity() -> usize {
    50
}
fn default_min_dispatch_interval_ms() -> u64 {
    2000
}
fn default_dispatch_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    5
}
fn default_retention_secs() -> u64 {
    60
}
fn default_export_limit_max() -> u32 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: String::new(),
            simulate: default_simulate(),
            simulate_latency_ms: default_simulate_latency_ms(),
            simulate_fail_every: 0,
            capacity: default_capacity(),
            min_dispatch_interval_ms: default_min_dispatch_interval_ms(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            retention_secs: default_retention_secs(),
            export_limit_min: 0,
            export_limit_max: default_export_limit_max(),
        }
    }
}

impl Config {
    /// Translate the persisted knobs into the runtime configuration.
    pub fn to_shield_config(&self) -> ShieldConfig {
        ShieldConfig {
            capacity: self.capacity,
            min_dispatch_interval: Duration::from_millis(self.min_dispatch_interval_ms),
            dispatch_timeout: Duration::from_secs(self.dispatch_timeout_secs),
            max_retries: self.max_retries,
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            retention: Duration::from_secs(self.retention_secs),
            export_limit_range: self.export_limit_min..=self.export_limit_max,
            ..ShieldConfig::default()
        }
    }
}

/// Return the path to `~/.gridshield/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".gridshield").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `GRIDSHIELD_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `GRIDSHIELD_API_URL` | `api_base_url` |
/// | `GRIDSHIELD_API_KEY` | `api_key` |
/// | `GRIDSHIELD_SIMULATE` | `simulate` (`"1"`/`"true"` or `"0"`/`"false"`) |
/// | `GRIDSHIELD_MAX_RETRIES` | `max_retries` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("GRIDSHIELD_API_URL") {
        cfg.api_base_url = v;
    }
    if let Ok(v) = std::env::var("GRIDSHIELD_API_KEY") {
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("GRIDSHIELD_SIMULATE") {
        match v.as_str() {
            "1" | "true" => cfg.simulate = true,
            "0" | "false" => cfg.simulate = false,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("GRIDSHIELD_MAX_RETRIES")
        && let Ok(retries) = v.parse::<u32>() {
            cfg.max_retries = retries;
        }
}

/// Save the config to disk, creating `~/.gridshield/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Write the file with owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
