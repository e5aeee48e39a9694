//! Error classification for block failures
//!
//! Executors that know their failure category report it through
//! [`BlockError::Classified`] or [`BlockError::Http`]. Opaque messages fall
//! back to pattern matching, checked in a fixed precedence order so that a
//! message matching several categories always lands in the same one:
//!
//! validation → auth → rate_limit → timeout → download → network → api →
//! storage → system

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::BlockError;

/// Category of a block runtime failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Download,
    RateLimit,
    Auth,
    Validation,
    Api,
    Storage,
    System,
}

impl ErrorKind {
    /// Every category, in classification precedence order
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::Validation,
        ErrorKind::Auth,
        ErrorKind::RateLimit,
        ErrorKind::Timeout,
        ErrorKind::Download,
        ErrorKind::Network,
        ErrorKind::Api,
        ErrorKind::Storage,
        ErrorKind::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Download => "download",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Api => "api",
            ErrorKind::Storage => "storage",
            ErrorKind::System => "system",
        }
    }

    /// Whether retrying can help, absent more specific information
    pub fn is_recoverable_by_default(&self) -> bool {
        !matches!(self, ErrorKind::Validation | ErrorKind::Auth)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a failure happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub execution_id: String,
    pub block_id: String,
    /// What the engine was doing, e.g. `execute_image`
    pub operation: String,
    /// Zero-based attempt number
    pub attempt: u32,
}

/// A classified failure, as stored in the error log and block results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
    pub context: ExecutionContext,
    pub timestamp: DateTime<Utc>,
}

/// Category plus recoverability of one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub recoverable: bool,
}

impl Classification {
    fn new(kind: ErrorKind, recoverable: bool) -> Self {
        // Validation and auth failures never become retryable.
        Self {
            kind,
            recoverable: recoverable && kind.is_recoverable_by_default(),
        }
    }

    fn of(kind: ErrorKind) -> Self {
        Self::new(kind, kind.is_recoverable_by_default())
    }
}

static MESSAGE_PATTERNS: Lazy<Vec<(ErrorKind, Regex)>> = Lazy::new(|| {
    [
        (
            ErrorKind::Validation,
            r"(?i)validation|invalid (parameter|argument|input|request|prompt)|pars(e|ing)|required field|is required|missing required",
        ),
        (
            ErrorKind::Auth,
            r"(?i)\b(401|403)\b|unauthori[sz]ed|forbidden|invalid (api )?key|authentication|permission denied",
        ),
        (
            ErrorKind::RateLimit,
            r"(?i)\b429\b|rate[ -]?limit|quota|too many requests",
        ),
        (
            ErrorKind::Timeout,
            r"(?i)timeout|timed out|etimedout|deadline exceeded",
        ),
        (ErrorKind::Download, r"(?i)download"),
        (
            ErrorKind::Network,
            r"(?i)network|econnrefused|econnreset|enotfound|connection|fetch failed|socket|\bdns\b",
        ),
        (
            ErrorKind::Api,
            r"(?i)\b50[0-4]\b|server error|bad gateway|service unavailable|api error",
        ),
        (
            ErrorKind::Storage,
            r"(?i)storage|\bdisk\b|no space|enospc|write failed|save failed|upload failed",
        ),
    ]
    .into_iter()
    .map(|(kind, pattern)| {
        (
            kind,
            Regex::new(pattern).expect("error classification patterns are valid"),
        )
    })
    .collect()
});

/// Maps block errors onto the error taxonomy
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a block error, preferring structured information
    pub fn classify(&self, error: &BlockError) -> Classification {
        match error {
            BlockError::Classified {
                kind, recoverable, ..
            } => Classification::new(*kind, *recoverable),
            BlockError::Http { status, message } => self.classify_status(*status, message),
            BlockError::Message(message) => self.classify_message(message),
        }
    }

    /// Classify by HTTP status code
    pub fn classify_status(&self, status: u16, message: &str) -> Classification {
        match status {
            400 | 422 => Classification::of(ErrorKind::Validation),
            401 | 403 => Classification::of(ErrorKind::Auth),
            408 => Classification::of(ErrorKind::Timeout),
            429 => Classification::of(ErrorKind::RateLimit),
            500..=599 => Classification::of(ErrorKind::Api),
            400..=499 => Classification::new(ErrorKind::Api, false),
            _ => self.classify_message(message),
        }
    }

    /// Classify opaque error text by pattern
    pub fn classify_message(&self, message: &str) -> Classification {
        let kind = MESSAGE_PATTERNS
            .iter()
            .find(|(_, pattern)| pattern.is_match(message))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::System);
        Classification::of(kind)
    }

    /// Build the full error record for a failure
    pub fn error_info(&self, error: &BlockError, context: ExecutionContext) -> ErrorInfo {
        let classification = self.classify(error);
        ErrorInfo {
            kind: classification.kind,
            message: error.to_string(),
            recoverable: classification.recoverable,
            context,
            timestamp: Utc::now(),
        }
    }
}
