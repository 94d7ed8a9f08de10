//! Wire types for the run events printed by the JS runner.
//!
//! Every event line has the shape `{"event": <name>, "data": {...}}`, where the
//! name is one of the four reporter callbacks and `data` is the object jasmine
//! hands to that callback. Only the fields the bridge interprets are typed;
//! everything else is kept verbatim in `extra`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event names, as emitted by the reporter in `runner.js`.
pub mod events {
    pub const SPEC_STARTED: &str = "specStarted";
    pub const SPEC_DONE: &str = "specDone";
    pub const SUITE_STARTED: &str = "suiteStarted";
    pub const SUITE_DONE: &str = "suiteDone";
}

/// Status values carried by `*Done` events.
pub mod status {
    pub const PASSED: &str = "passed";
    pub const FAILED: &str = "failed";
    pub const PENDING: &str = "pending";
    pub const EXCLUDED: &str = "excluded";
}

/// The two kinds of node in a jasmine test tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Spec,
    Suite,
}

impl NodeKind {
    /// The `type` value used in the structural message.
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeKind::Spec => "spec",
            NodeKind::Suite => "suite",
        }
    }

    pub fn from_type(value: &str) -> Option<Self> {
        match value {
            "spec" => Some(NodeKind::Spec),
            "suite" => Some(NodeKind::Suite),
            _ => None,
        }
    }

    /// Name of the event opening this kind of node.
    pub const fn started_event(self) -> &'static str {
        match self {
            NodeKind::Spec => events::SPEC_STARTED,
            NodeKind::Suite => events::SUITE_STARTED,
        }
    }

    /// Name of the event closing this kind of node.
    pub const fn done_event(self) -> &'static str {
        match self {
            NodeKind::Spec => events::SPEC_DONE,
            NodeKind::Suite => events::SUITE_DONE,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub event: String,
    pub data: EventData,
}

impl RunEvent {
    pub fn new(event: impl Into<String>, data: EventData) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Decode an already parsed JSON line.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// The `data` payload of an event.
///
/// For `*Done` events this is what ends up stored as a node's result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_expectations: Vec<FailedExpectation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_reason: Option<String>,
    /// Fields the bridge does not interpret (`passedExpectations`, `duration`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_failure(mut self, message: impl Into<String>, stack: impl Into<String>) -> Self {
        self.failed_expectations.push(FailedExpectation::new(message, stack));
        self
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn passed(&self) -> bool {
        self.status() == Some(status::PASSED)
    }
}

/// A single failed `expect(...)` of a spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailedExpectation {
    #[serde(default)]
    pub message: String,
    /// Stack trace text of the foreign runtime; jasmine leaves it out for some matchers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FailedExpectation {
    pub fn new(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Some(stack.into()),
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_done_event_with_failures() {
        let event = RunEvent::from_value(json!({
            "event": "specDone",
            "data": {
                "id": "spec3",
                "description": "fails",
                "fullName": "Suite fails",
                "status": "failed",
                "failedExpectations": [
                    {"message": "Expected 2 to equal 1.", "stack": "at func (f.js:5:23)", "matcherName": "toEqual"}
                ],
                "passedExpectations": []
            }
        }))
        .unwrap();

        assert_eq!(event.event, events::SPEC_DONE);
        assert_eq!(event.data.id, "spec3");
        assert_eq!(event.data.status(), Some("failed"));
        assert!(!event.data.passed());
        assert_eq!(event.data.failed_expectations.len(), 1);
        assert_eq!(event.data.failed_expectations[0].message, "Expected 2 to equal 1.");
        assert_eq!(event.data.failed_expectations[0].extra["matcherName"], json!("toEqual"));
        assert_eq!(event.data.extra["passedExpectations"], json!([]));
    }

    #[test]
    fn test_decode_started_event_without_status() {
        let event = RunEvent::from_value(json!({"event": "suiteStarted", "data": {"id": "suite1"}})).unwrap();
        assert_eq!(event.data.status(), None);
        assert!(event.data.failed_expectations.is_empty());
    }

    #[test]
    fn test_decode_null_stack() {
        let event = RunEvent::from_value(json!({
            "event": "specDone",
            "data": {"id": "s", "status": "failed", "failedExpectations": [{"message": "m", "stack": null}]}
        }))
        .unwrap();
        assert_eq!(event.data.failed_expectations[0].stack, None);
    }

    #[test]
    fn test_decode_requires_id() {
        assert!(RunEvent::from_value(json!({"event": "specStarted", "data": {}})).is_err());
        assert!(RunEvent::from_value(json!({"type": "suite", "id": "x"})).is_err());
    }

    #[test]
    fn test_node_kind_event_names() {
        assert_eq!(NodeKind::Spec.started_event(), "specStarted");
        assert_eq!(NodeKind::Spec.done_event(), "specDone");
        assert_eq!(NodeKind::Suite.started_event(), "suiteStarted");
        assert_eq!(NodeKind::Suite.done_event(), "suiteDone");
        assert_eq!(NodeKind::from_type("suite"), Some(NodeKind::Suite));
        assert_eq!(NodeKind::from_type("describe"), None);
    }
}
