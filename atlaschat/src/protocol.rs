//! Request/response message protocol served by the coordinator.
//!
//! Messages are JSON objects tagged by `type`. Messages without a type, or
//! with a type this protocol does not know, are ignored rather than rejected.
//! Request fields are decoded leniently so that malformed values reach the
//! normalization rules instead of failing the whole message.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::types::{ErrorCode, ExtensionState, RewriteResult};

/// A request sent to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "ATLASCHAT_GET_STATE", alias = "GET_STATE")]
    GetState,

    #[serde(rename = "ATLASCHAT_TOGGLE", alias = "TOGGLE")]
    Toggle,

    #[serde(rename = "ATLASCHAT_SET_MODE", alias = "SET_MODE")]
    SetMode {
        #[serde(default, deserialize_with = "lenient_string")]
        mode: Option<String>,
    },

    #[serde(rename = "ATLASCHAT_PROCESS_PROMPT", alias = "PROCESS_PROMPT")]
    ProcessPrompt {
        /// Non-string values decode as empty text.
        #[serde(default, deserialize_with = "lenient_text")]
        text: String,
        #[serde(
            default,
            deserialize_with = "lenient_string",
            skip_serializing_if = "Option::is_none"
        )]
        mode: Option<String>,
    },

    /// One-way signal that a rewrite pipeline fell back to the original text.
    #[serde(rename = "ATLASCHAT_PIPELINE_ERROR", alias = "PIPELINE_ERROR")]
    PipelineError {
        #[serde(
            default,
            deserialize_with = "lenient_string",
            skip_serializing_if = "Option::is_none"
        )]
        error: Option<String>,
    },
}

impl Request {
    pub fn set_mode(mode: &str) -> Self {
        Request::SetMode {
            mode: Some(mode.to_string()),
        }
    }

    pub fn process_prompt(text: &str, mode: Option<&str>) -> Self {
        Request::ProcessPrompt {
            text: text.to_string(),
            mode: mode.map(str::to_string),
        }
    }

    pub fn pipeline_error(error: ErrorCode) -> Self {
        Request::PipelineError {
            error: Some(error.as_str().to_string()),
        }
    }

    /// Whether the sender expects a reply.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Request::PipelineError { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::GetState => "ATLASCHAT_GET_STATE",
            Request::Toggle => "ATLASCHAT_TOGGLE",
            Request::SetMode { .. } => "ATLASCHAT_SET_MODE",
            Request::ProcessPrompt { .. } => "ATLASCHAT_PROCESS_PROMPT",
            Request::PipelineError { .. } => "ATLASCHAT_PIPELINE_ERROR",
        }
    }
}

/// A coordinator reply.
///
/// State requests answer with `State`; prompt requests, and state requests
/// whose store access failed, answer with `Result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Result(RewriteResult),
    State(ExtensionState),
}

impl Response {
    pub fn into_state(self) -> Option<ExtensionState> {
        match self {
            Response::State(state) => Some(state),
            Response::Result(_) => None,
        }
    }

    pub fn into_result(self) -> Option<RewriteResult> {
        match self {
            Response::Result(result) => Some(result),
            Response::State(_) => None,
        }
    }
}

/// Decode a raw message. Returns `None` for noise.
pub fn decode_request(raw: &str) -> Option<Request> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "ignoring unparseable message");
            return None;
        }
    };
    decode_value(value)
}

/// Decode an already-parsed message. Returns `None` for noise.
pub fn decode_value(value: Value) -> Option<Request> {
    let has_type = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.is_empty());
    if !has_type {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(request) => Some(request),
        Err(err) => {
            debug!(error = %err, "ignoring unknown message");
            None
        }
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().map(str::to_string))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Mode;

    #[test]
    fn decodes_prefixed_and_short_names() {
        assert_eq!(
            decode_request(r#"{"type":"ATLASCHAT_GET_STATE"}"#),
            Some(Request::GetState)
        );
        assert_eq!(decode_request(r#"{"type":"TOGGLE"}"#), Some(Request::Toggle));
        assert_eq!(
            decode_request(r#"{"type":"SET_MODE","mode":"direct"}"#),
            Some(Request::set_mode("direct"))
        );
    }

    #[test]
    fn non_string_fields_decode_leniently() {
        assert_eq!(
            decode_request(r#"{"type":"ATLASCHAT_PROCESS_PROMPT","text":42,"mode":7}"#),
            Some(Request::ProcessPrompt {
                text: String::new(),
                mode: None,
            })
        );
        assert_eq!(
            decode_request(r#"{"type":"ATLASCHAT_SET_MODE"}"#),
            Some(Request::SetMode { mode: None })
        );
    }

    #[test]
    fn noise_is_ignored() {
        assert_eq!(decode_request("not json"), None);
        assert_eq!(decode_request(r#"{"text":"hi"}"#), None);
        assert_eq!(decode_request(r#"{"type":""}"#), None);
        assert_eq!(decode_request(r#"{"type":"ATLASCHAT_UNKNOWN"}"#), None);
    }

    #[test]
    fn requests_encode_with_prefixed_type() {
        let json = serde_json::to_string(&Request::process_prompt("hi", Some("guard")))
            .expect("serialize");
        assert_eq!(
            json,
            r#"{"type":"ATLASCHAT_PROCESS_PROMPT","text":"hi","mode":"guard"}"#
        );
        let decoded = decode_request(&json).expect("decode");
        assert_eq!(decoded, Request::process_prompt("hi", Some("guard")));
    }

    #[test]
    fn responses_decode_by_shape() {
        let state: Response =
            serde_json::from_str(r#"{"enabled":true,"mode":"direct"}"#).expect("state");
        assert_eq!(
            state.into_state(),
            Some(ExtensionState {
                enabled: true,
                mode: Mode::Direct,
            })
        );
        let result: Response =
            serde_json::from_str(r#"{"ok":false,"error":"EMPTY_PROMPT"}"#).expect("result");
        assert_eq!(
            result.into_result(),
            Some(RewriteResult::failure(ErrorCode::EmptyPrompt))
        );
    }

    #[test]
    fn pipeline_error_expects_no_reply() {
        assert!(!Request::pipeline_error(ErrorCode::Timeout).expects_reply());
        assert!(Request::GetState.expects_reply());
    }
}
