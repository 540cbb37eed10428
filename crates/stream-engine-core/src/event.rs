use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{FieldError, SourceError};

/// Values supplied for a pause, keyed by field name.
///
/// Ordered so that two identical submissions serialize identically.
pub type InputValues = BTreeMap<String, serde_json::Value>;

/// Expected type of a requested field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Email,
    Url,
    Date,
    Choice { options: Vec<String> },
}

/// One field requested by a pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    /// Used as the field's value when the pause resumes on timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: None,
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// What a pause does when its deadline elapses without input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Continue the stream using field defaults.
    Resume,
    /// Terminate the session with a `Timeout` failure.
    Fail,
}

/// Payload of a `pause-request` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseRequest {
    pub message: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Deadline relative to the moment the event is emitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// Overrides the session-level `resume_on_timeout` for this pause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<TimeoutPolicy>,
}

impl PauseRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Vec::new(),
            deadline_ms: None,
            on_timeout: None,
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    pub fn on_timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.on_timeout = Some(policy);
        self
    }

    /// Declared defaults, used when the pause resumes on timeout.
    pub fn defaults(&self) -> InputValues {
        self.fields
            .iter()
            .filter_map(|f| f.default.clone().map(|v| (f.name.clone(), v)))
            .collect()
    }
}

/// One scripted step replayed by an `EventSource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ScriptEvent {
    /// A chunk of opaque domain output (text, table row, memory record, ...).
    Content { payload: serde_json::Value },
    PauseRequest(PauseRequest),
}

impl ScriptEvent {
    pub fn content(payload: impl Into<serde_json::Value>) -> Self {
        Self::Content {
            payload: payload.into(),
        }
    }

    pub fn pause(request: PauseRequest) -> Self {
        Self::PauseRequest(request)
    }
}

/// How a pause was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeReason {
    Input,
    Timeout,
}

/// Discriminated body of an [`Event`].
///
/// `Content` and `PauseRequest` come from the script. The rest are synthesized
/// by the session so observers can rebuild the full timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventKind {
    Content {
        payload: serde_json::Value,
    },
    PauseRequest(PauseRequest),
    InputReceived {
        values: InputValues,
    },
    /// A submission failed validation; the same pause stays open.
    InputRejected {
        errors: Vec<FieldError>,
    },
    Resumed {
        reason: ResumeReason,
    },
    DeadlineExpired {
        deadline_ms: u64,
    },
    /// Non-final failure: the current pass failed and a retry is pending.
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
        error: SourceError,
    },
    /// The script restarts from position zero. Output of earlier passes is void.
    Restarted {
        attempt: u32,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::PauseRequest(_) => "pause-request",
            Self::InputReceived { .. } => "input-received",
            Self::InputRejected { .. } => "input-rejected",
            Self::Resumed { .. } => "resumed",
            Self::DeadlineExpired { .. } => "deadline-expired",
            Self::RetryScheduled { .. } => "retry-scheduled",
            Self::Restarted { .. } => "restarted",
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, Self::Content { .. })
    }
}

impl From<ScriptEvent> for EventKind {
    fn from(value: ScriptEvent) -> Self {
        match value {
            ScriptEvent::Content { payload } => EventKind::Content { payload },
            ScriptEvent::PauseRequest(request) => EventKind::PauseRequest(request),
        }
    }
}

/// Immutable, stamped unit of session output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the session's total order, starting at 0.
    pub seq: u64,
    /// Pass over the script this event belongs to (0 for the first pass).
    pub pass: u32,
    /// Milliseconds since the session started.
    pub emitted_at_ms: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_event_uses_kebab_case_kind_tag() {
        let event = ScriptEvent::pause(
            PauseRequest::new("Who are you?")
                .field(FieldSpec::required("name", FieldKind::Text))
                .deadline_ms(1_000),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "pause-request");
        assert_eq!(value["deadline_ms"], 1_000);
        assert_eq!(value["fields"][0]["type"], "text");
        assert_eq!(value["fields"][0]["required"], true);
    }

    #[test]
    fn script_event_parses_from_json() {
        let raw = json!([
            {"kind": "content", "payload": "a"},
            {"kind": "pause-request", "message": "pick", "fields": [
                {"name": "plan", "type": "choice", "options": ["basic", "pro"], "required": true}
            ]}
        ]);
        let events: Vec<ScriptEvent> = serde_json::from_value(raw).unwrap();
        assert_eq!(events[0], ScriptEvent::content("a"));
        let ScriptEvent::PauseRequest(pause) = &events[1] else {
            panic!("expected pause request");
        };
        assert_eq!(
            pause.fields[0].kind,
            FieldKind::Choice {
                options: vec!["basic".into(), "pro".into()]
            }
        );
        assert_eq!(pause.deadline_ms, None);
    }

    #[test]
    fn defaults_collects_only_declared_defaults() {
        let pause = PauseRequest::new("prefs")
            .field(FieldSpec::optional("theme", FieldKind::Text).with_default(json!("dark")))
            .field(FieldSpec::required("email", FieldKind::Email));
        let defaults = pause.defaults();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults["theme"], json!("dark"));
    }

    #[test]
    fn event_flattens_kind_next_to_stamp() {
        let event = Event {
            seq: 4,
            pass: 1,
            emitted_at_ms: 250,
            kind: EventKind::Restarted { attempt: 1 },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"seq": 4, "pass": 1, "emitted_at_ms": 250, "kind": "restarted", "attempt": 1}));
        assert_eq!(event.kind.name(), "restarted");
    }
}
