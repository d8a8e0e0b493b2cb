//! Error bookkeeping types attached to flows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored error messages are cut to this many characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Taxonomy produced by error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Timeouts and dropped connections; worth retrying
    TransientIo,
    /// Bad input; the caller must fix it
    Validation,
    /// Authorization failure
    Permission,
    /// Anything unrecognised
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientIo => "transient_io",
            Self::Validation => "validation",
            Self::Permission => "permission",
            Self::Unknown => "unknown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "transient_io" => Some(Self::TransientIo),
            "validation" => Some(Self::Validation),
            "permission" => Some(Self::Permission),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Default retry policy for the type.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo)
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub error_type: ErrorType,
    pub is_retryable: bool,
}

impl ErrorClassification {
    /// Classification with the type's default retry policy.
    pub fn of(error_type: ErrorType) -> Self {
        Self {
            error_type,
            is_retryable: error_type.is_retryable(),
        }
    }

    /// Conservative fallback.
    pub fn unknown() -> Self {
        Self::of(ErrorType::Unknown)
    }
}

/// Structured details persisted next to an error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Caller-supplied code, e.g. `IMPORT_FAILED`
    pub error_code: Option<String>,
    pub error_type: ErrorType,
    pub is_retryable: bool,
}

impl ErrorDetails {
    pub fn new(error_code: Option<String>, classification: ErrorClassification) -> Self {
        Self {
            error_code,
            error_type: classification.error_type,
            is_retryable: classification.is_retryable,
        }
    }
}

/// One entry of a master flow's bounded error history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: Option<String>,
    pub error: String,
    pub details: ErrorDetails,
    /// Master retry count after this error was recorded
    pub retry_count: u32,
}

/// Cut a message to [`MAX_ERROR_MESSAGE_CHARS`] characters.
pub fn truncate_error_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((byte_index, _)) => message[..byte_index].to_string(),
        None => message.to_string(),
    }
}
