use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::outcome::{is_empty_payload, Outcome};

/// Freshness of one key relative to persisted output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    /// No record yet.
    Missing,
    /// A record exists but carries no data.
    Stale,
    /// A record with data exists.
    Fresh,
}

impl ItemState {
    pub fn for_payload(payload: Option<&Value>) -> Self {
        match payload {
            Some(value) if !is_empty_payload(value) => ItemState::Fresh,
            _ => ItemState::Stale,
        }
    }
}

/// One key of the input list together with what is known about it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub key: String,
    pub state: ItemState,
    pub payload: Option<Value>,
}

impl WorkItem {
    pub fn missing(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: ItemState::Missing,
            payload: None,
        }
    }

    pub fn needs_query(&self) -> bool {
        self.state != ItemState::Fresh
    }

    /// Applies a worker outcome. Returns `true` when the item changed and
    /// should be recorded; failures leave the item untouched.
    pub fn apply(&mut self, outcome: &Outcome) -> bool {
        match outcome {
            Outcome::Success(payload) => {
                self.payload = Some(payload.clone());
                self.state = ItemState::Fresh;
                true
            }
            Outcome::EmptyResult => {
                self.payload = None;
                self.state = ItemState::Stale;
                true
            }
            Outcome::RateLimited { .. } | Outcome::TransientError(_) => false,
        }
    }
}
