//! Resilient streaming session engine.
//!
//! A session replays a fixed [`Script`] of events, suspends on pause requests
//! until input, a deadline, or cancellation resolves them, and restarts failed
//! passes with exponential backoff. Every event and state transition is
//! delivered to observers in order.
//!
//! ```no_run
//! use stream_engine_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SessionError> {
//! let script = Script::named("demo")
//!     .content("Analysing request...")
//!     .pause(PauseRequest::new("Which plan?").field(FieldSpec::required(
//!         "plan",
//!         FieldKind::Choice { options: vec!["basic".into(), "pro".into()] },
//!     )))
//!     .content("Done.");
//!
//! let mut session = StreamSession::builder(script)
//!     .config(SessionConfig::default().with_speed(SpeedPreset::Fast))
//!     .on_state_change(|state| println!("state: {state}"))
//!     .start()?;
//!
//! session.wait_for_state(SessionState::AwaitingInput).await;
//! session.submit_input(InputValues::from([("plan".into(), "pro".into())]));
//! let report = session.finish().await?;
//! println!("{} events", report.events_emitted);
//! # Ok(())
//! # }
//! ```

/// Cooperative cancellation handle and token.
pub mod cancel;
/// Session configuration and pacing presets.
pub mod config;
/// Public error types.
pub mod errors;
/// Script events and the stamped session event model.
pub mod event;
/// Pause-for-input gate.
pub mod gate;
/// Process-wide logging setup.
pub mod observability;
/// Observer trait plus callback and recording implementations.
pub mod observer;
/// Common imports for typical usage.
pub mod prelude;
/// Retry policy and per-session retry state.
pub mod retry;
/// Session builder, driver, and handle.
pub mod session;
/// Scripted event source with fault injection.
pub mod source;
/// Session lifecycle state machine.
pub mod state;
/// Field value checks applied to submitted input.
pub mod validation;

pub use cancel::{AbortHandle, CancelToken, Cancelled, cancel_pair};
pub use config::{SessionConfig, SpeedPreset};
pub use errors::{ConfigError, ErrorKind, FieldError, SessionError, SessionFailure, SourceError};
pub use event::{
    Event, EventKind, FieldKind, FieldSpec, InputValues, PauseRequest, ResumeReason, ScriptEvent,
    TimeoutPolicy,
};
pub use gate::{PauseGate, PauseOutcome, PendingInput};
pub use observability::init_observability;
pub use observer::{CallbackObserver, RecordingObserver, SessionObserver, SessionUpdate};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use session::{SessionBuilder, SessionHandle, SessionReport, StreamSession, start};
pub use source::{EventSource, FaultPasses, FaultPlan, Script};
pub use state::SessionState;
pub use validation::validate_input;
