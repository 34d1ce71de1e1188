//! Structured logging utilities for Lumen components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use lumen_config::logging::*;
//!
//! log_ingest_info!("Chain assembled", lists = 3);
//! log_cache_debug!("Block stored", backend = "disk");
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const CLI: &'static str = "CLI";
    pub const INGEST: &'static str = "INGEST";
    pub const RESTORE: &'static str = "RESTORE";
    pub const CACHE: &'static str = "CACHE";
    pub const BRIGHTEN: &'static str = "BRIGHTEN";
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

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CLI", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CLI", $($key = $value,)* $msg)
    };
}

// === INGEST logging macros ===

#[macro_export]
macro_rules! log_ingest_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "INGEST", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_ingest_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "INGEST", $($key = $value,)* $msg)
    };
}

// === RESTORE logging macros ===

#[macro_export]
macro_rules! log_restore_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "RESTORE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_restore_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "RESTORE", $($key = $value,)* $msg)
    };
}

// === CACHE logging macros ===

#[macro_export]
macro_rules! log_cache_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "CACHE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cache_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CACHE", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_env("LUMEN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::CLI, "CLI");
        assert_eq!(Component::INGEST, "INGEST");
        assert_eq!(Component::CACHE, "CACHE");
    }
}
