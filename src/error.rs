//! Error taxonomy for the flowlog pipeline.
//!
//! Only [`ConfigError`] and [`LifecycleError`] ever surface to a caller; every
//! other kind is contained inside the data path, counted, and reported via
//! `diagnostics`. The public logging calls must not raise — callers see
//! `Result` only at configuration and lifecycle edges.

use thiserror::Error;

/// Invalid option at construction time. Always propagated to the caller.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid pressure thresholds: {0}")]
    InvalidThresholds(String),

    #[error("{option} must be positive, got {value}")]
    NotPositive { option: String, value: i64 },

    #[error("unknown protected level {0:?}")]
    UnknownProtectedLevel(String),

    #[error("invalid size string {raw:?}: {reason}")]
    InvalidSize { raw: String, reason: String },

    #[error("invalid duration string {raw:?}: {reason}")]
    InvalidDuration { raw: String, reason: String },

    #[error("regex redactor pattern rejected as unsafe: {0}")]
    UnsafeRegex(String),

    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    Level(#[from] crate::level::LevelRegistryError),
}

/// Invalid operation after stop, or during an overlapping start/drain.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("logger already stopped")]
    AlreadyStopped,

    #[error("logger is still starting up")]
    NotStarted,

    #[error("drain already in progress")]
    DrainInProgress,
}

/// Exception inside an enricher/redactor/processor. Contained; the event
/// continues unless `redaction_fail_mode = closed`.
#[derive(Error, Debug, Clone)]
#[error("{stage} plugin {plugin_name:?} failed: {reason}")]
pub struct StageError {
    pub stage: StageKind,
    pub plugin_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Filter,
    Enrich,
    Redact,
    Process,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageKind::Filter => "filter",
            StageKind::Enrich => "enricher",
            StageKind::Redact => "redactor",
            StageKind::Process => "processor",
        };
        write!(f, "{s}")
    }
}

/// Sink write failed. Contained; breaker updated, fallback routed.
#[derive(Error, Debug, Clone)]
#[error("sink {sink_name:?} write failed: {reason}")]
pub struct SinkWriteError {
    pub sink_name: String,
    pub reason: String,
}

/// Queue full and policy denied waiting longer; event dropped, counted.
#[derive(Error, Debug, Clone, Copy)]
pub enum BackpressureDrop {
    #[error("queue full, drop_on_full policy")]
    PolicyDrop,
    #[error("queue still full after bounded wait")]
    TimedOut,
    #[error("dropped to avoid sync-from-worker-thread self-deadlock")]
    SyncReentrant,
}

/// Envelope could not be produced. Behavior governed by `strict_envelope_mode`.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope build failed: {0}")]
    EnvelopeBuild(String),
}

/// Top-level error enum, used only where a function genuinely needs to
/// return one of several of the above kinds (e.g. `FlowlogConfig::from_env`
/// can fail with a `ConfigError` produced by several distinct causes).
#[derive(Error, Debug)]
pub enum FlowlogError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlowlogError>;
