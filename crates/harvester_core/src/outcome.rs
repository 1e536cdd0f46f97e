use std::fmt;

use serde_json::Value;

/// Classified result of one worker query.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Well-formed response carrying data for the key.
    Success(Value),
    /// Well-formed response saying there is no data for the key.
    EmptyResult,
    /// The target refused the call (403/429 class).
    RateLimited { status: u16 },
    /// Network failure, timeout, unexpected status, or malformed body.
    TransientError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    EmptyResult,
    RateLimited,
    TransientError,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::EmptyResult => OutcomeKind::EmptyResult,
            Outcome::RateLimited { .. } => OutcomeKind::RateLimited,
            Outcome::TransientError(_) => OutcomeKind::TransientError,
        }
    }

    /// `Success` and `EmptyResult` both mean the key was answered.
    pub fn is_handled(&self) -> bool {
        self.kind().is_handled()
    }
}

impl OutcomeKind {
    pub fn is_handled(self) -> bool {
        matches!(self, OutcomeKind::Success | OutcomeKind::EmptyResult)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Success => write!(f, "success"),
            OutcomeKind::EmptyResult => write!(f, "empty"),
            OutcomeKind::RateLimited => write!(f, "rate-limited"),
            OutcomeKind::TransientError => write!(f, "transient error"),
        }
    }
}

/// Turns a raw target-API response into an [`Outcome`].
///
/// `result_pointer` is a JSON pointer (RFC 6901) selecting the payload inside
/// the body; an empty pointer selects the whole document.
pub fn classify_response(status: u16, body: &[u8], result_pointer: &str) -> Outcome {
    if status == 403 || status == 429 {
        return Outcome::RateLimited { status };
    }
    if !(200..300).contains(&status) {
        return Outcome::TransientError(format!("http status {status}"));
    }

    let document: Value = match serde_json::from_slice(body) {
        Ok(document) => document,
        Err(err) => return Outcome::TransientError(format!("malformed response: {err}")),
    };

    match document.pointer(result_pointer) {
        Some(payload) if !is_empty_payload(payload) => Outcome::Success(payload.clone()),
        _ => Outcome::EmptyResult,
    }
}

/// Null, `""`, `[]`, and `{}` carry no data.
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
