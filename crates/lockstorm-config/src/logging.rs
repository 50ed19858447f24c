//! Structured logging utilities for lockstorm processes.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use lockstorm_config::{log_orch_info, log_worker_warn};
//!
//! log_orch_info!(pending = 4, "workers left");
//! log_worker_warn!(pid = 1234, file = "b", error = %err, "lock failed");
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const ORCHESTRATOR: &'static str = "ORCH";
    pub const WORKER: &'static str = "WORKER";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === ORCHESTRATOR logging macros ===

#[macro_export]
macro_rules! log_orch_error {
    ($($arg:tt)+) => {
        tracing::error!(component = $crate::logging::Component::ORCHESTRATOR, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_orch_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = $crate::logging::Component::ORCHESTRATOR, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_orch_info {
    ($($arg:tt)+) => {
        tracing::info!(component = $crate::logging::Component::ORCHESTRATOR, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_orch_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::ORCHESTRATOR, $($arg)+)
    };
}

// === WORKER logging macros ===

#[macro_export]
macro_rules! log_worker_error {
    ($($arg:tt)+) => {
        tracing::error!(component = $crate::logging::Component::WORKER, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_worker_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = $crate::logging::Component::WORKER, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_worker_info {
    ($($arg:tt)+) => {
        tracing::info!(component = $crate::logging::Component::WORKER, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_worker_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::WORKER, $($arg)+)
    };
}

/// Initialize logging with the given default level.
///
/// `LOCKSTORM_LOG` wins over `RUST_LOG`; both override `level`.
/// Call this once at startup, before any worker is forked.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("LOCKSTORM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
