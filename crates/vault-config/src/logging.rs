//! Structured logging utilities for vault components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use vault_config::{log_ingest_info, log_retrieve_error};
//!
//! log_ingest_info!("Ingest committed", chunks = 3);
//! log_retrieve_error!("Root mismatch", cid = %cid);
//! ```

use std::str::FromStr;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const INGEST: &'static str = "INGEST";
    pub const RETRIEVE: &'static str = "RETRIEVE";
    pub const STORE: &'static str = "STORE";
    pub const PROOF: &'static str = "PROOF";
    pub const INDEX: &'static str = "INDEX";
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
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

// === INGEST logging macros ===

#[macro_export]
macro_rules! log_ingest_error {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::error!(component = "INGEST", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_ingest_info {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::info!(component = "INGEST", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_ingest_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = "INGEST", $($($field)+,)? $msg)
    };
}

// === RETRIEVE logging macros ===

#[macro_export]
macro_rules! log_retrieve_error {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::error!(component = "RETRIEVE", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_retrieve_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = "RETRIEVE", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_retrieve_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = "RETRIEVE", $($($field)+,)? $msg)
    };
}

// === STORE logging macros ===

#[macro_export]
macro_rules! log_store_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = "STORE", $($($field)+,)? $msg)
    };
}

// === PROOF logging macros ===

#[macro_export]
macro_rules! log_proof_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = "PROOF", $($($field)+,)? $msg)
    };
}

// === INDEX logging macros ===

#[macro_export]
macro_rules! log_index_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = "INDEX", $($($field)+,)? $msg)
    };
}

/// Build the filter used by [`init_logging`]: `VAULT_LOG`, then `RUST_LOG`,
/// then `level`.
pub fn env_filter(level: LogLevel) -> tracing_subscriber::EnvFilter {
    use tracing_subscriber::EnvFilter;

    EnvFilter::try_from_env("VAULT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Initialize logging with the given level filter.
/// Call this once at application startup; later calls are no-ops and
/// return false.
pub fn init_logging(level: LogLevel) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::INGEST, "INGEST");
        assert_eq!(Component::RETRIEVE, "RETRIEVE");
        assert_eq!(Component::STORE, "STORE");
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Debug.as_str(), "debug");
    }

    #[test]
    fn test_init_logging_once() {
        init_logging(LogLevel::Warn);
        assert!(!init_logging(LogLevel::Debug));
    }

    #[test]
    fn test_macros_expand() {
        let cid = "vault:00";
        crate::log_ingest_info!("ingest committed", chunks = 3u64, cid = %cid);
        crate::log_retrieve_warn!("plain message");
        crate::log_store_debug!("stored", bytes = 10usize);
    }
}
