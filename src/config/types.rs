use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// File name of the checkpoint written inside a service save directory
pub const CHECKPOINT_FILE_NAME: &str = "crawl_checkpoint.json";

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harvester: HarvesterConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Builds a configuration that stores images and the checkpoint under `dir`
    ///
    /// All tuning sections keep their defaults.
    pub fn for_save_dir(dir: &Path) -> Self {
        Self {
            harvester: HarvesterConfig::default(),
            fetch: FetchConfig::default(),
            dedup: DedupConfig::default(),
            output: OutputConfig::for_save_dir(dir),
        }
    }

    /// Returns a copy of this configuration redirected to `dir`
    pub fn with_save_dir(&self, dir: &Path) -> Self {
        Self {
            output: OutputConfig::for_save_dir(dir),
            ..self.clone()
        }
    }
}

/// Pipeline and enumeration behavior
#[derive(Debug, Clone, Deserialize)]
pub struct HarvesterConfig {
    /// Number of candidates processed concurrently
    #[serde(rename = "max-concurrent-downloads", default = "default_workers")]
    pub max_concurrent_downloads: u32,

    /// Candidates whose declared width or height is below this are dropped (pixels)
    #[serde(rename = "min-declared-dimension", default = "default_min_dimension")]
    pub min_declared_dimension: u32,

    /// Attempts made for one enumeration step before the candidate is skipped
    #[serde(rename = "enumeration-retries", default = "default_retries")]
    pub enumeration_retries: u32,

    /// Fixed delay between enumeration attempts (milliseconds)
    #[serde(rename = "enumeration-backoff-ms", default = "default_backoff_ms")]
    pub enumeration_backoff_ms: u64,
}

impl HarvesterConfig {
    pub fn enumeration_backoff(&self) -> Duration {
        Duration::from_millis(self.enumeration_backoff_ms)
    }
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_workers(),
            min_declared_dimension: default_min_dimension(),
            enumeration_retries: default_retries(),
            enumeration_backoff_ms: default_backoff_ms(),
        }
    }
}

/// Image download settings
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Whole-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Payloads smaller than this are treated as placeholders (bytes)
    #[serde(rename = "min-image-bytes", default = "default_min_bytes")]
    pub min_image_bytes: usize,

    /// Payloads larger than this are abandoned while downloading (bytes)
    #[serde(rename = "max-image-bytes", default = "default_max_bytes")]
    pub max_image_bytes: usize,

    /// User-Agent header sent with every image request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            min_image_bytes: default_min_bytes(),
            max_image_bytes: default_max_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

/// Near-duplicate detection settings
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Signatures closer than this many bits are near-duplicates
    #[serde(rename = "near-duplicate-threshold", default = "default_threshold")]
    pub near_duplicate_threshold: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: default_threshold(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving one `<content-hash>.jpg` per accepted image
    #[serde(rename = "image-dir")]
    pub image_dir: String,

    /// Path to the JSON checkpoint file
    #[serde(rename = "checkpoint-path")]
    pub checkpoint_path: String,
}

impl OutputConfig {
    pub fn for_save_dir(dir: &Path) -> Self {
        Self {
            image_dir: dir.display().to_string(),
            checkpoint_path: dir.join(CHECKPOINT_FILE_NAME).display().to_string(),
        }
    }
}

fn default_workers() -> u32 {
    4
}

fn default_min_dimension() -> u32 {
    50
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_min_bytes() -> usize {
    1024
}

fn default_max_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_threshold() -> u32 {
    5
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}
