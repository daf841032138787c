use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `COURSEDRIP__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub send_window: SendWindowConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

/// Knobs for the periodic runner.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum due enrollments processed per run.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Trailing window for the cross-system dedup guard.
    #[serde(default = "default_dedup_window_hours")]
    pub dedup_window_hours: u32,
    /// Shared secret required by the HTTP run trigger. `None` disables the check.
    #[serde(default)]
    pub run_secret: Option<String>,
    /// Cap on per-recipient errors reported back from bulk operations.
    #[serde(default = "default_max_reported_errors")]
    pub max_reported_errors: usize,
}

/// Send-hour policy. The preferred hour and reference offset are business
/// policy, so they live here rather than in code.
#[derive(Debug, Clone, Deserialize)]
pub struct SendWindowConfig {
    /// Hour-of-day (0-23) delayed steps are normalized to, in the reference zone.
    #[serde(default = "default_preferred_hour")]
    pub preferred_hour: u32,
    /// Reference zone as a fixed UTC offset, in hours.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// How soon a zero-delay step fires, in minutes.
    #[serde(default = "default_immediate_offset_mins")]
    pub immediate_offset_mins: u32,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_batch_size() -> usize {
    50
}
fn default_dedup_window_hours() -> u32 {
    2
}
fn default_max_reported_errors() -> usize {
    25
}
fn default_preferred_hour() -> u32 {
    9
}
fn default_utc_offset_hours() -> i32 {
    -6
}
fn default_immediate_offset_mins() -> u32 {
    5
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            dedup_window_hours: default_dedup_window_hours(),
            run_secret: None,
            max_reported_errors: default_max_reported_errors(),
        }
    }
}

impl Default for SendWindowConfig {
    fn default() -> Self {
        Self {
            preferred_hour: default_preferred_hour(),
            utc_offset_hours: default_utc_offset_hours(),
            immediate_offset_mins: default_immediate_offset_mins(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            scheduler: SchedulerConfig::default(),
            send_window: SendWindowConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("COURSEDRIP")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> crate::DripResult<()> {
        if self.scheduler.batch_size == 0 {
            return Err(crate::DripError::Config(
                "scheduler.batch_size must be at least 1".to_string(),
            ));
        }
        if self.scheduler.dedup_window_hours == 0 {
            return Err(crate::DripError::Config(
                "scheduler.dedup_window_hours must be at least 1".to_string(),
            ));
        }
        if self.send_window.preferred_hour > 23 {
            return Err(crate::DripError::Config(
                "send_window.preferred_hour must be 0-23".to_string(),
            ));
        }
        Ok(())
    }
}
