//! Common imports for driving a session.
pub use crate::{
    AbortHandle, ErrorKind, Event, EventKind, FaultPlan, FieldKind, FieldSpec, InputValues,
    PauseRequest, RetryPolicy, Script, SessionConfig, SessionError, SessionHandle,
    SessionObserver, SessionReport, SessionState, SessionUpdate, SpeedPreset, StreamSession,
    TimeoutPolicy,
};
