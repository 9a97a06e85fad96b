//! Error types for BuildLens.
//!
//! Library crates use [`BuildLensError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//! Source adapters report the narrower [`FetchError`], which the fetch
//! coordinator inspects to decide on retries and staleness fallback.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::EnrichedContext;

/// Top-level error type for all BuildLens operations.
#[derive(Debug, thiserror::Error)]
pub enum BuildLensError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// PoB export decode error (malformed XML, unsupported structure).
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Network/HTTP error outside the adapter fetch path.
    #[error("network error: {0}")]
    Network(String),

    /// Parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Reasoning model error (API or response parsing).
    #[error("reasoning error: {0}")]
    Reasoning(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The global coordination deadline fired before every lookup resolved.
    /// Carries whatever was merged so far so the caller can decide whether
    /// partial data is acceptable.
    #[error("coordination deadline exceeded after {elapsed_ms}ms")]
    CoordinationTimeout {
        elapsed_ms: u64,
        partial: Box<EnrichedContext>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BuildLensError>;

impl BuildLensError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a decode error from any displayable message.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// FetchError — per-source failure taxonomy
// ---------------------------------------------------------------------------

/// Failure of one fetch attempt against one source.
///
/// The coordinator retries only [`retriable`](FetchError::retriable) kinds;
/// everything is eventually absorbed into per-source annotations on the
/// entity entry rather than failing the run.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The source answered authoritatively that the entity does not exist.
    #[error("entity not found at source")]
    NotFound,

    /// The source pushed back (HTTP 429 or equivalent).
    #[error("rate limited by source")]
    RateLimited { retry_after: Option<Duration> },

    /// Connection failure, timeout, or 5xx.
    #[error("source unreachable: {0}")]
    Unreachable(String),

    /// The response arrived but could not be interpreted.
    #[error("response parse failure: {0}")]
    Parse(String),
}

impl FetchError {
    /// Whether a retry with backoff can plausibly succeed.
    ///
    /// `NotFound` is an authoritative answer and `Parse` indicates a page
    /// shape mismatch; retrying either wastes the source's budget.
    pub fn retriable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unreachable(_))
    }

    /// Stable kind label, used in failure annotations and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::RateLimited { .. } => "rate-limited",
            Self::Unreachable(_) => "unreachable",
            Self::Parse(_) => "parse",
        }
    }
}
