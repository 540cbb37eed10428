use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a session. Exactly one holds at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Streaming,
    AwaitingInput,
    Resuming,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Terminal states are sticky. Cancellation is reachable from every
    /// non-terminal state.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Cancelled) => true,
            (Idle, Streaming) => true,
            (Streaming, AwaitingInput | Completed | Retrying | Failed) => true,
            (AwaitingInput, Resuming | Failed) => true,
            (Resuming, Streaming) => true,
            (Retrying, Streaming | Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::AwaitingInput => "awaiting-input",
            Self::Resuming => "resuming",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::{self, *};

    const ALL: [SessionState; 8] = [
        Idle,
        Streaming,
        AwaitingInput,
        Resuming,
        Retrying,
        Completed,
        Failed,
        Cancelled,
    ];

    #[test]
    fn terminal_states_are_sticky() {
        for terminal in [Completed, Failed, Cancelled] {
            for next in ALL {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn every_live_state_can_be_cancelled() {
        for state in [Idle, Streaming, AwaitingInput, Resuming, Retrying] {
            assert!(state.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn pause_path_goes_through_resuming() {
        assert!(Streaming.can_transition_to(AwaitingInput));
        assert!(AwaitingInput.can_transition_to(Resuming));
        assert!(!AwaitingInput.can_transition_to(Streaming));
        assert!(Resuming.can_transition_to(Streaming));
        assert!(!Idle.can_transition_to(Completed));
        assert!(!Retrying.can_transition_to(Completed));
    }

    #[test]
    fn serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&AwaitingInput).unwrap(), "\"awaiting-input\"");
        assert_eq!(AwaitingInput.to_string(), "awaiting-input");
    }
}
