//! Hierarchical configuration surface: `core.*`, `adaptive.*`,
//! `sink_config.<name>.*`, `redactor_config.<name>.*`, `filter_config.<name>.*`,
//! `plugins.*`, loaded via the `config` crate with a `__`-separated env
//! convention and an optional `.env` file through `dotenvy`.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::{RedactionFailMode, StrictEnvelopeMode};
use crate::pressure::PressureThresholds;
use crate::retry::RetryConfig;

/// Parses a human size string ("10 MB", "512KB", "1GiB") into bytes. Unknown
/// suffixes fall back to treating the whole string as a plain byte count.
pub fn parse_size(raw: &str) -> Result<usize, ConfigError> {
    let trimmed = raw.trim();
    let invalid = || ConfigError::InvalidSize { raw: raw.to_string(), reason: "unrecognized size format".to_string() };
    if let Ok(n) = trimmed.parse::<usize>() {
        return Ok(n);
    }
    let lower = trimmed.to_lowercase();
    let split_at = lower.find(|c: char| !c.is_ascii_digit() && c != '.').ok_or_else(invalid)?;
    let (number, unit) = lower.split_at(split_at);
    let number: f64 = number.trim().parse().map_err(|_| invalid())?;
    let multiplier = match unit.trim() {
        "b" | "" => 1.0,
        "kb" => 1_000.0,
        "kib" => 1024.0,
        "mb" => 1_000_000.0,
        "mib" => 1024.0 * 1024.0,
        "gb" => 1_000_000_000.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        _ => return Err(invalid()),
    };
    Ok((number * multiplier).round() as usize)
}

/// Parses a duration string ("250ms", "2s", "1m") via `humantime`, falling
/// back to plain-integer-seconds for bare numbers.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    if let Ok(secs) = raw.trim().parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::InvalidDuration { raw: raw.to_string(), reason: e.to_string() })
}

/// `core.*` options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub max_queue_size: usize,
    pub max_queue_growth: f64,
    pub batch_max_size: usize,
    pub batch_base_size: usize,
    pub batch_timeout_seconds: f64,
    pub drop_on_full: bool,
    pub backpressure_wait_ms: u64,
    pub worker_count: usize,
    pub max_workers: usize,
    pub sink_concurrency: usize,
    pub shutdown_timeout_seconds: f64,
    pub strict_envelope_mode: bool,
    pub redaction_fail_mode_closed: bool,
    pub error_dedupe_window_seconds: f64,
    pub protected_levels: Vec<String>,
    pub pressure_check_interval_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            max_queue_size: 10_000,
            max_queue_growth: 4.0,
            batch_max_size: 200,
            batch_base_size: 50,
            batch_timeout_seconds: 0.25,
            drop_on_full: true,
            backpressure_wait_ms: 50,
            worker_count: 2,
            max_workers: 4,
            sink_concurrency: 8,
            shutdown_timeout_seconds: 10.0,
            strict_envelope_mode: false,
            redaction_fail_mode_closed: false,
            error_dedupe_window_seconds: 5.0,
            protected_levels: vec!["ERROR".into(), "CRITICAL".into(), "AUDIT".into(), "SECURITY".into()],
            pressure_check_interval_ms: 250,
        }
    }
}

/// `adaptive.*`: actuator gates and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub worker_scaling: bool,
    pub queue_growth: bool,
    pub batch_sizing: bool,
    pub filter_tightening: bool,
    pub escalate_elevated: f64,
    pub deescalate_elevated: f64,
    pub escalate_high: f64,
    pub deescalate_high: f64,
    pub escalate_critical: f64,
    pub deescalate_critical: f64,
    pub circuit_pressure_boost: f64,
    pub cooldown_seconds: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        AdaptiveConfig {
            worker_scaling: true,
            queue_growth: true,
            batch_sizing: true,
            filter_tightening: true,
            escalate_elevated: 0.60,
            deescalate_elevated: 0.40,
            escalate_high: 0.80,
            deescalate_high: 0.60,
            escalate_critical: 0.92,
            deescalate_critical: 0.75,
            circuit_pressure_boost: 0.20,
            cooldown_seconds: 2.0,
        }
    }
}

/// `sink_config.*`: breaker tuning shared by every sink unless overridden
/// per-sink by the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkGroupConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: f64,
    pub fallback_sink_name: Option<String>,
    pub retry_max_attempts: u32,
}

impl Default for SinkGroupConfig {
    fn default() -> Self {
        SinkGroupConfig {
            failure_threshold: 5,
            recovery_timeout_seconds: 30.0,
            fallback_sink_name: Some("stderr_fallback".to_string()),
            retry_max_attempts: 3,
        }
    }
}

/// `redactor_config.*`: guardrails shared by every built-in redactor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactorGroupConfig {
    pub max_depth: usize,
    pub max_keys_scanned: usize,
    pub escape_hatch_unsafe_regex: bool,
}

impl Default for RedactorGroupConfig {
    fn default() -> Self {
        RedactorGroupConfig { max_depth: 16, max_keys_scanned: 1000, escape_hatch_unsafe_regex: false }
    }
}

/// `filter_config.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterGroupConfig {
    pub sampling_rate: f64,
    pub rate_limit_events_per_second: Option<u32>,
    pub dedup_window_seconds: f64,
}

impl Default for FilterGroupConfig {
    fn default() -> Self {
        FilterGroupConfig { sampling_rate: 1.0, rate_limit_events_per_second: None, dedup_window_seconds: 5.0 }
    }
}

/// `plugins.*`: external-plugin admission policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub allow_external: bool,
    pub allowlist: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        PluginsConfig { allow_external: false, allowlist: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowlogConfig {
    pub core: CoreConfig,
    pub adaptive: AdaptiveConfig,
    pub sink_config: SinkGroupConfig,
    pub redactor_config: RedactorGroupConfig,
    pub filter_config: FilterGroupConfig,
    pub plugins: PluginsConfig,
}

impl FlowlogConfig {
    /// Loads configuration from (in ascending precedence) built-in defaults,
    /// an optional `.env` file, and environment variables prefixed `FLOWLOG`
    /// with `__` as the hierarchy separator, e.g.
    /// `FLOWLOG__CORE__MAX_QUEUE_SIZE=20000`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let raw = config::Config::builder()
            .add_source(config::Config::try_from(&FlowlogConfig::default())?)
            .add_source(config::Environment::with_prefix("FLOWLOG").separator("__").try_parsing(true))
            .build()?;
        let parsed: FlowlogConfig = raw.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn builder() -> FlowlogConfigBuilder {
        FlowlogConfigBuilder { config: FlowlogConfig::default() }
    }

    pub fn pressure_thresholds(&self) -> Result<PressureThresholds, ConfigError> {
        let thresholds = PressureThresholds::from_ratios(
            self.adaptive.escalate_elevated,
            self.adaptive.deescalate_elevated,
            self.adaptive.escalate_high,
            self.adaptive.deescalate_high,
            self.adaptive.escalate_critical,
            self.adaptive.deescalate_critical,
            self.adaptive.circuit_pressure_boost,
            Duration::from_secs_f64(self.adaptive.cooldown_seconds),
        );
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn strict_envelope_mode(&self) -> StrictEnvelopeMode {
        if self.core.strict_envelope_mode {
            StrictEnvelopeMode::Strict
        } else {
            StrictEnvelopeMode::BestEffort
        }
    }

    pub fn redaction_fail_mode(&self) -> RedactionFailMode {
        if self.core.redaction_fail_mode_closed {
            RedactionFailMode::Closed
        } else {
            RedactionFailMode::Open
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig { max_attempts: self.sink_config.retry_max_attempts, ..Default::default() }
    }

    pub fn protected_levels(&self) -> HashSet<String> {
        self.core.protected_levels.iter().cloned().collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.core.max_queue_size == 0 {
            return Err(ConfigError::NotPositive { option: "core.max_queue_size".to_string(), value: 0 });
        }
        if self.core.worker_count == 0 {
            return Err(ConfigError::NotPositive { option: "core.worker_count".to_string(), value: 0 });
        }
        self.pressure_thresholds()?;
        Ok(())
    }
}

/// Programmatic construction, for embedders that don't want env/`.env`
/// loading (tests, the demo CLI's `--config` override path).
pub struct FlowlogConfigBuilder {
    config: FlowlogConfig,
}

impl FlowlogConfigBuilder {
    pub fn max_queue_size(mut self, n: usize) -> Self {
        self.config.core.max_queue_size = n;
        self
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.config.core.worker_count = n;
        self
    }

    pub fn drop_on_full(mut self, v: bool) -> Self {
        self.config.core.drop_on_full = v;
        self
    }

    pub fn protected_levels(mut self, levels: impl IntoIterator<Item = String>) -> Self {
        self.config.core.protected_levels = levels.into_iter().collect();
        self
    }

    pub fn fallback_sink_name(mut self, name: Option<String>) -> Self {
        self.config.sink_config.fallback_sink_name = name;
        self
    }

    pub fn build(self) -> Result<FlowlogConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_handles_decimal_suffix() {
        assert_eq!(parse_size("10 MB").unwrap(), 10_000_000);
        assert_eq!(parse_size("1KiB").unwrap(), 1024);
        assert_eq!(parse_size("512").unwrap(), 512);
    }

    #[test]
    fn parse_duration_handles_humantime_and_bare_seconds() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn default_config_validates() {
        FlowlogConfig::default().validate().unwrap();
    }

    #[test]
    fn builder_rejects_zero_queue_size() {
        let err = FlowlogConfig::builder().max_queue_size(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::NotPositive { .. }));
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = FlowlogConfig::builder().max_queue_size(42).worker_count(7).build().unwrap();
        assert_eq!(cfg.core.max_queue_size, 42);
        assert_eq!(cfg.core.worker_count, 7);
    }
}
