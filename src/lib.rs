//! An asynchronous, structured logging pipeline: filter, enrich, redact,
//! process, and serialize events through a bounded dual-lane queue and an
//! adaptive worker pool, fanning out to sinks guarded by per-sink circuit
//! breakers.
//!
//! The entry points are [`logger::Logger`] (built via [`logger::LoggerBuilder`])
//! and [`config::FlowlogConfig`]. A minimal setup:
//!
//! ```no_run
//! use flowlog::config::FlowlogConfig;
//! use flowlog::logger::LoggerBuilder;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FlowlogConfig::from_env()?;
//! let logger = LoggerBuilder::new("app", config).build()?;
//! logger.start().await;
//! # Ok(())
//! # }
//! ```

pub mod actuators;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod drain;
pub mod envelope;
pub mod error;
pub mod level;
pub mod logger;
pub mod metrics;
pub mod pipeline;
pub mod pressure;
pub mod queue;
pub mod retry;
pub mod sink;
pub mod value;
pub mod worker;

pub use config::FlowlogConfig;
pub use envelope::Envelope;
pub use error::{FlowlogError, Result};
pub use level::{Level, LEVEL_REGISTRY};
pub use logger::{LogCall, Logger, LoggerBuilder};
