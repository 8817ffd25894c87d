//! Shared deterministic types for the coordinator and the interception engine.
//!
//! These types define the stable contracts of the message protocol. They must
//! not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rewrite mode applied to submitted prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Wrap the prompt in the fixed instructional template.
    #[default]
    Guard,
    /// Pass the prompt through unchanged.
    Direct,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Guard => "guard",
            Mode::Direct => "direct",
        }
    }

    /// Normalize a persisted or requested value: anything but exactly
    /// `"direct"` is `Guard`.
    pub fn normalize(raw: Option<&str>) -> Mode {
        match raw {
            Some("direct") => Mode::Direct,
            _ => Mode::Guard,
        }
    }

    /// Parse a per-request override. Only the exact names are accepted.
    pub fn parse_override(raw: Option<&str>) -> Option<Mode> {
        match raw {
            Some("guard") => Some(Mode::Guard),
            Some("direct") => Some(Mode::Direct),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide enablement and mode. The coordinator is the only writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionState {
    pub enabled: bool,
    pub mode: Mode,
}

/// Canonical error codes surfaced in rewrite results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The prompt was blank after trimming.
    EmptyPrompt,
    /// Interception is not currently enabled.
    #[serde(rename = "ATLASCHAT_DISABLED")]
    Disabled,
    /// The state store could not be read or written.
    InvalidState,
    /// The rewrite call did not settle before its deadline.
    Timeout,
    /// The call into the coordinator raised an error.
    Exception,
    /// The coordinator could not be reached.
    RuntimeError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::EmptyPrompt => "EMPTY_PROMPT",
            ErrorCode::Disabled => "ATLASCHAT_DISABLED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Exception => "EXCEPTION",
            ErrorCode::RuntimeError => "RUNTIME_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a `PROCESS_PROMPT` request.
///
/// Absent optionals are omitted on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RewriteResult {
    pub fn success(mode: Mode, text: String) -> Self {
        Self {
            ok: true,
            mode: Some(mode),
            text: Some(text),
            error: None,
            detail: None,
        }
    }

    pub fn failure(error: ErrorCode) -> Self {
        Self {
            ok: false,
            mode: None,
            text: None,
            error: Some(error),
            detail: None,
        }
    }

    pub fn failure_with_detail(error: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::failure(error)
        }
    }
}
