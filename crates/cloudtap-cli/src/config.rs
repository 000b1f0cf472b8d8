//! Configuration Vault – reads/writes `~/.cloudtap/config.toml`.

use std::fs;
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cloudtap_middleware::DispatchConfig;
use cloudtap_perception::ColorOffsets;
use cloudtap_types::CloudError;
use serde::{Deserialize, Serialize};

/// Persisted user configuration stored in `~/.cloudtap/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Topic the subscriber listens on.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Pause between dispatch iterations, in milliseconds.
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Samples taken per wake-up.  Absent or 0 drains the queue fully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_samples_per_wake: Option<usize>,

    /// Decoded batches per second.  Absent or 0 disables the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batches_per_second: Option<u32>,

    /// Byte displacement of R, G and B from the packed color field.
    #[serde(default)]
    pub color_offsets: ColorOffsets,

    /// Frames per second produced by the built-in publisher.
    #[serde(default = "default_synthetic_rate_hz")]
    pub synthetic_rate_hz: u32,

    /// Points per synthetic frame.
    #[serde(default = "default_synthetic_points")]
    pub synthetic_points: usize,
}

fn default_topic() -> String {
    "TVL-PREC7670/LivePointCloudTest".to_string()
}
fn default_idle_sleep_ms() -> u64 {
    10
}
fn default_synthetic_rate_hz() -> u32 {
    10
}
fn default_synthetic_points() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            idle_sleep_ms: default_idle_sleep_ms(),
            max_samples_per_wake: None,
            max_batches_per_second: None,
            color_offsets: ColorOffsets::default(),
            synthetic_rate_hz: default_synthetic_rate_hz(),
            synthetic_points: default_synthetic_points(),
        }
    }
}

impl Config {
    /// Dispatch loop settings derived from this config.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            idle_sleep: Duration::from_millis(self.idle_sleep_ms),
            max_samples_per_wake: self.max_samples_per_wake.and_then(NonZeroUsize::new),
            max_batches_per_second: self.max_batches_per_second.and_then(NonZeroU32::new),
            color_offsets: self.color_offsets,
        }
    }
}

/// Return the path to `~/.cloudtap/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".cloudtap").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, CloudError> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, CloudError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| CloudError::Config(format!("Failed to read {}: {e}", path.display())))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| CloudError::Config(format!("Failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `CLOUDTAP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CLOUDTAP_TOPIC` | `topic` |
/// | `CLOUDTAP_IDLE_SLEEP_MS` | `idle_sleep_ms` |
/// | `CLOUDTAP_MAX_SAMPLES_PER_WAKE` | `max_samples_per_wake` |
/// | `CLOUDTAP_MAX_BATCHES_PER_SECOND` | `max_batches_per_second` |
/// | `CLOUDTAP_COLOR_OFFSET_R` | `color_offsets.r` |
/// | `CLOUDTAP_COLOR_OFFSET_G` | `color_offsets.g` |
/// | `CLOUDTAP_COLOR_OFFSET_B` | `color_offsets.b` |
/// | `CLOUDTAP_SYNTHETIC_RATE_HZ` | `synthetic_rate_hz` |
/// | `CLOUDTAP_SYNTHETIC_POINTS` | `synthetic_points` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CLOUDTAP_TOPIC") {
        cfg.topic = v;
    }
    if let Ok(v) = std::env::var("CLOUDTAP_IDLE_SLEEP_MS")
        && let Ok(ms) = v.parse()
    {
        cfg.idle_sleep_ms = ms;
    }
    if let Ok(v) = std::env::var("CLOUDTAP_MAX_SAMPLES_PER_WAKE")
        && let Ok(n) = v.parse()
    {
        cfg.max_samples_per_wake = Some(n);
    }
    if let Ok(v) = std::env::var("CLOUDTAP_MAX_BATCHES_PER_SECOND")
        && let Ok(n) = v.parse()
    {
        cfg.max_batches_per_second = Some(n);
    }
    if let Ok(v) = std::env::var("CLOUDTAP_COLOR_OFFSET_R")
        && let Ok(offset) = v.parse()
    {
        cfg.color_offsets.r = offset;
    }
    if let Ok(v) = std::env::var("CLOUDTAP_COLOR_OFFSET_G")
        && let Ok(offset) = v.parse()
    {
        cfg.color_offsets.g = offset;
    }
    if let Ok(v) = std::env::var("CLOUDTAP_COLOR_OFFSET_B")
        && let Ok(offset) = v.parse()
    {
        cfg.color_offsets.b = offset;
    }
    if let Ok(v) = std::env::var("CLOUDTAP_SYNTHETIC_RATE_HZ")
        && let Ok(hz) = v.parse()
    {
        cfg.synthetic_rate_hz = hz;
    }
    if let Ok(v) = std::env::var("CLOUDTAP_SYNTHETIC_POINTS")
        && let Ok(n) = v.parse()
    {
        cfg.synthetic_points = n;
    }
}

/// Save the config to disk, creating `~/.cloudtap/` if necessary.
pub fn save(cfg: &Config) -> Result<(), CloudError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), CloudError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CloudError::Config(format!("Failed to create config directory: {e}")))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                CloudError::Config(format!("Failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| CloudError::Config(format!("Failed to serialize config: {e}")))?;
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
            .map_err(|e| CloudError::Config(format!("Failed to write {}: {e}", path.display())))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| CloudError::Config(format!("Failed to write {}: {e}", path.display())))?;
    Ok(())
}
