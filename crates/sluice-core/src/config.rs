use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per part (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
    /// Minimum wait after a provider rate-limit signal, in seconds.
    /// Provider hints shorter than this are rounded up.
    pub rate_limit_floor_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
            rate_limit_floor_secs: 5,
        }
    }
}

/// Retry parameters for archive relocation (optional section in config.toml).
/// Tiering failures are usually transient volume I/O, so the defaults are lenient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieringConfig {
    /// Maximum relocation attempts before the job fails.
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff between attempts.
    pub base_delay_secs: f64,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_secs: 0.5,
        }
    }
}

/// Global configuration loaded from `~/.config/sluice/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Part size in bytes (each part is one range fetch).
    pub part_size: u64,
    /// Maximum simultaneous range fetches across all jobs.
    pub max_total_fetches: usize,
    /// Maximum of that budget a single job may consume.
    pub max_fetches_per_job: usize,
    /// Fast volume for in-progress parts and assembly.
    pub scratch_dir: PathBuf,
    /// Capacity volume for finished files.
    pub archive_dir: PathBuf,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Optional tiering retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub tiering: Option<TieringConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            part_size: 32 * 1024 * 1024,
            max_total_fetches: 6,
            max_fetches_per_job: 4,
            scratch_dir: PathBuf::from("scratch"),
            archive_dir: PathBuf::from("archive"),
            retry: None,
            tiering: None,
        }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy::from_config(&self.retry.clone().unwrap_or_default())
    }

    /// Tiering retry knobs as (max_attempts, base_delay).
    pub fn tiering_retry(&self) -> (u32, Duration) {
        let t = self.tiering.clone().unwrap_or_default();
        (
            t.max_attempts.max(1),
            Duration::from_secs_f64(t.base_delay_secs.max(0.0)),
        )
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("sluice")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
///
/// The initial default file places the scratch volume under the XDG state
/// directory and the archive volume under the XDG data directory; deployments
/// with a real fast/slow volume split are expected to edit both.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let mut default_cfg = EngineConfig::default();
        if let Ok(xdg_dirs) = xdg::BaseDirectories::with_prefix("sluice") {
            default_cfg.scratch_dir = xdg_dirs.get_state_home().join("scratch");
            default_cfg.archive_dir = xdg_dirs.get_data_home().join("archive");
        }
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}
