//! Sluice: a paced crawler for rate-limited hosts
//!
//! This crate crawls paginated post lists and their nested comment threads
//! from a host that actively blocks automated access. It keeps a pool of
//! egress points alive, paces every request, backs off and rotates identity
//! on failure, and never skips or re-delivers a page.

pub mod config;
pub mod crawler;
pub mod egress;
pub mod output;
pub mod pacing;
pub mod state;

use thiserror::Error;

/// Main error type for Sluice operations
#[derive(Debug, Error)]
pub enum SluiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sink error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("Invalid stream transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::StreamState,
        to: state::StreamState,
    },

    #[error("No targets configured")]
    NoTargets,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Controller, CrawlReport, StreamReport};
pub use egress::{EgressPoint, EgressPool};
pub use pacing::{BackoffPolicy, IdentityRotator, PacingDecision};
pub use state::{CrawlCursor, StreamState};
