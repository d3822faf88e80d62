use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitConfig,
    pub media: MediaConfig,
    pub jobs: JobsConfig,
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Honour `X-Forwarded-For` / `X-Real-IP` when resolving the client address.
    /// Only enable behind a reverse proxy that overwrites these headers.
    pub trust_forwarded_headers: bool,
    pub max_body_bytes: usize,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            trust_forwarded_headers: false,
            max_body_bytes: 1024 * 1024,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Shared counter store URL. Empty selects the per-process fallback.
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key_prefix: "reelforge:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Generation quotas, applied identically to the network-address and
/// client-session identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub hourly: u32,
    pub daily: u32,
    pub weekly: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            hourly: 5,
            daily: 20,
            weekly: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Where the upload validator leaves accepted files.
    pub uploads_dir: PathBuf,
    /// Character overlay sources, one `{character}.webm` per character.
    pub avatars_dir: PathBuf,
    /// Root of `temp/` (in-flight renders) and `output/` (finished videos).
    pub work_dir: PathBuf,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub default_fps: u32,
    pub max_fps: u32,
    pub max_duration_secs: f64,
    pub max_slides: usize,
    /// Overlay edge length in pixels at scale 1.0.
    pub avatar_base_size: u32,
    pub avatar_baseline_bpm: f64,
    pub default_bpm: f64,
    pub tempo_min: f64,
    pub tempo_max: f64,
    pub encoder_timeout_multiplier: f64,
    pub encoder_timeout_floor_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            uploads_dir: PathBuf::from("./data/uploads"),
            avatars_dir: PathBuf::from("./data/avatars"),
            work_dir: PathBuf::from("./data/work"),
            canvas_width: 1080,
            canvas_height: 1920,
            default_fps: 30,
            max_fps: 60,
            max_duration_secs: 180.0,
            max_slides: 30,
            avatar_base_size: 480,
            avatar_baseline_bpm: 120.0,
            default_bpm: 120.0,
            tempo_min: 0.5,
            tempo_max: 2.0,
            encoder_timeout_multiplier: 10.0,
            encoder_timeout_floor_secs: 120,
        }
    }
}

impl MediaConfig {
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.work_dir.join("temp")
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("output")
    }

    /// Upper bound on a single encoder run for a timeline of `total_secs`.
    #[must_use]
    pub fn encoder_timeout(&self, total_secs: f64) -> Duration {
        let scaled = Duration::from_secs_f64((total_secs * self.encoder_timeout_multiplier).max(0.0));
        scaled.max(Duration::from_secs(self.encoder_timeout_floor_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// How long a finished job stays observable before it is reclaimed.
    pub terminal_grace_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            terminal_grace_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub artifact_ttl_secs: u64,
    pub session_idle_secs: u64,
    pub sweep_interval_secs: u64,
    /// Age threshold for in-flight render directories.
    pub temp_max_age_secs: u64,
    /// Age threshold for finished outputs and uploads.
    pub max_file_age_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            artifact_ttl_secs: 600,
            session_idle_secs: 300,
            sweep_interval_secs: 120,
            temp_max_age_secs: 3600,
            max_file_age_secs: 7200,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // REELFORGE_SERVER__HTTP_PORT, REELFORGE_REDIS__URL, ...
        builder = builder.add_source(
            Environment::with_prefix("REELFORGE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check every setting and return all violations at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }

        let rl = &self.rate_limit;
        if rl.hourly == 0 || rl.daily == 0 || rl.weekly == 0 {
            errors.push("rate_limit ceilings must all be at least 1".to_string());
        }
        if rl.hourly > rl.daily || rl.daily > rl.weekly {
            errors.push("rate_limit ceilings must satisfy hourly <= daily <= weekly".to_string());
        }

        let media = &self.media;
        if media.canvas_width == 0 || media.canvas_height == 0 {
            errors.push("media canvas dimensions must be non-zero".to_string());
        }
        if media.canvas_width % 2 != 0 || media.canvas_height % 2 != 0 {
            errors.push("media canvas dimensions must be even".to_string());
        }
        if media.default_fps == 0 || media.default_fps > media.max_fps {
            errors.push("media.default_fps must be within 1..=max_fps".to_string());
        }
        if media.max_duration_secs <= 0.0 {
            errors.push("media.max_duration_secs must be positive".to_string());
        }
        if media.max_slides == 0 {
            errors.push("media.max_slides must be at least 1".to_string());
        }
        if media.avatar_baseline_bpm <= 0.0 || media.default_bpm <= 0.0 {
            errors.push("media BPM settings must be positive".to_string());
        }
        if media.tempo_min <= 0.0 || media.tempo_min > media.tempo_max {
            errors.push("media tempo bounds must satisfy 0 < tempo_min <= tempo_max".to_string());
        }
        if media.encoder_timeout_multiplier <= 0.0 {
            errors.push("media.encoder_timeout_multiplier must be positive".to_string());
        }

        let lc = &self.lifecycle;
        if lc.artifact_ttl_secs == 0 || lc.session_idle_secs == 0 || lc.sweep_interval_secs == 0 {
            errors.push("lifecycle durations must be non-zero".to_string());
        }
        if lc.temp_max_age_secs > lc.max_file_age_secs {
            errors.push("lifecycle.temp_max_age_secs must not exceed max_file_age_secs".to_string());
        }
        let longest_render = media.encoder_timeout(media.max_duration_secs).as_secs();
        if lc.temp_max_age_secs <= longest_render {
            errors.push(format!(
                "lifecycle.temp_max_age_secs must exceed the longest encoder run ({longest_render}s)"
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
