//! Session driver: replays a script through the state machine, suspending on
//! pauses and restarting failed passes according to the retry policy.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::cancel::{AbortHandle, CancelToken, cancel_pair};
use crate::config::SessionConfig;
use crate::errors::{ErrorKind, SessionError, SessionFailure, SourceError};
use crate::event::{
    Event, EventKind, InputValues, PauseRequest, ResumeReason, ScriptEvent, TimeoutPolicy,
};
use crate::gate::{PauseGate, PauseOutcome, PendingInput};
use crate::observer::{CallbackObserver, ChannelObserver, SessionObserver, SessionUpdate};
use crate::retry::{RetryDecision, RetryState};
use crate::source::{EventSource, Script};
use crate::state::SessionState;
use crate::validation::validate_input;

/// Starts `script` with `config` and no extra observers.
///
/// Must be called from within a tokio runtime.
pub fn start(script: Script, config: SessionConfig) -> Result<SessionHandle, SessionError> {
    StreamSession::builder(script).config(config).start()
}

/// Entry point for configuring a session.
pub struct StreamSession;

impl StreamSession {
    pub fn builder(script: Script) -> SessionBuilder {
        SessionBuilder {
            script,
            config: SessionConfig::default(),
            observers: Vec::new(),
        }
    }
}

/// Collects the script, config and observers before the session starts.
pub struct SessionBuilder {
    script: Script,
    config: SessionConfig,
    observers: Vec<Arc<dyn SessionObserver>>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers an observer. Observers are notified in registration order.
    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn on_event(self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.observer(Arc::new(CallbackObserver::new().on_event(f)))
    }

    pub fn on_state_change(self, f: impl Fn(SessionState) + Send + Sync + 'static) -> Self {
        self.observer(Arc::new(CallbackObserver::new().on_state_change(f)))
    }

    /// Validates the inputs and spawns the driver task.
    ///
    /// The session is `idle` until the driver runs, then moves straight to
    /// `streaming`.
    pub fn start(self) -> Result<SessionHandle, SessionError> {
        self.config.validate()?;
        self.script.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            SessionError::Config("a session must be started inside a tokio runtime".into())
        })?;

        let session_id = uuid::Uuid::new_v4();
        let gate = Arc::new(PauseGate::new());
        let (abort, cancel) = cancel_pair();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (final_tx, final_rx) = oneshot::channel();

        let mut observers: Vec<Arc<dyn SessionObserver>> =
            vec![Arc::new(ChannelObserver::new(updates_tx))];
        observers.extend(self.observers);

        let span = info_span!("session", session_id = %session_id, script = %self.script.name);
        let driver = Driver {
            session_id,
            script: Arc::new(self.script),
            config: self.config,
            observers,
            gate: gate.clone(),
            cancel,
            state: SessionState::Idle,
            state_tx,
            retry: RetryState::default(),
            seq: 0,
            pass: 0,
            started: Instant::now(),
            inputs: Vec::new(),
        };
        runtime.spawn(
            async move {
                let result = driver.run().await;
                let _ = final_tx.send(result);
            }
            .instrument(span),
        );

        Ok(SessionHandle {
            session_id,
            gate,
            abort,
            state_rx,
            updates_rx,
            final_rx,
        })
    }
}

/// Summary of a session that reached `completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: uuid::Uuid,
    pub state: SessionState,
    /// Retries consumed before the successful pass.
    pub retries: u32,
    pub events_emitted: u64,
    /// Accepted input of every pause, in resolution order.
    pub inputs: Vec<InputValues>,
    pub elapsed_ms: u64,
}

/// Caller side of a running session.
///
/// Dropping the handle (and every [`AbortHandle`] cloned from it) cancels the
/// session.
pub struct SessionHandle {
    session_id: uuid::Uuid,
    gate: Arc<PauseGate>,
    abort: AbortHandle,
    state_rx: watch::Receiver<SessionState>,
    updates_rx: mpsc::UnboundedReceiver<SessionUpdate>,
    final_rx: oneshot::Receiver<Result<SessionReport, SessionError>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Latest state published by the driver.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Answers the pending pause.
    ///
    /// Returns `false` when no pause is awaiting input, including once the
    /// deadline has passed or cancellation was requested. Accepted values are still validated; a rejected
    /// submission re-opens the same pause.
    pub fn submit_input(&self, values: InputValues) -> bool {
        self.gate.submit(values)
    }

    /// The pause currently awaiting input, if any.
    pub fn pending_input(&self) -> Option<PendingInput> {
        self.gate.pending()
    }

    /// Requests cancellation. Idempotent and a no-op once terminal.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.abort.abort();
    }

    /// Next event or state change, in emission order.
    ///
    /// Returns `None` once the session is terminal and the timeline drained.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        self.updates_rx.recv().await
    }

    /// Waits until the session enters `target` or any terminal state, and
    /// returns the state it stopped on.
    pub async fn wait_for_state(&mut self, target: SessionState) -> SessionState {
        let reached = self
            .state_rx
            .wait_for(|s| *s == target || s.is_terminal())
            .await
            .map(|state| *state);
        reached.unwrap_or_else(|_| self.state())
    }

    /// Waits for the session to terminate.
    pub async fn finish(self) -> Result<SessionReport, SessionError> {
        let SessionHandle {
            session_id,
            abort,
            final_rx,
            ..
        } = self;
        let result = final_rx.await;
        drop(abort);
        match result {
            Ok(result) => result,
            Err(_) => Err(SessionError::protocol_msg(format!(
                "session driver ended without final result (session_id={session_id})"
            ))),
        }
    }
}

/// How one pass over the script ended.
enum PassEnd {
    Completed,
    Cancelled,
    /// A pass-level error the retry policy gets to classify.
    Source(SourceError),
    /// Ends the session without consulting the retry policy.
    Failed(SessionFailure),
}

struct Driver {
    session_id: uuid::Uuid,
    script: Arc<Script>,
    config: SessionConfig,
    observers: Vec<Arc<dyn SessionObserver>>,
    gate: Arc<PauseGate>,
    cancel: CancelToken,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    retry: RetryState,
    seq: u64,
    pass: u32,
    started: Instant,
    inputs: Vec<InputValues>,
}

impl Driver {
    async fn run(mut self) -> Result<SessionReport, SessionError> {
        info!(events = self.script.len(), speed = %self.config.speed, "session started");
        if self.cancel.is_cancelled() {
            return self.cancelled();
        }
        self.transition(SessionState::Streaming);

        loop {
            let error = match self.run_pass().await {
                PassEnd::Completed => return Ok(self.completed()),
                PassEnd::Cancelled => return self.cancelled(),
                PassEnd::Failed(failure) => return self.failed(failure),
                PassEnd::Source(error) => error,
            };

            match self.retry.record_failure(error.kind, &self.config.retry) {
                RetryDecision::GiveUp => {
                    // Retryable kinds fail from `retrying` once the budget is spent.
                    if self.config.retry.is_retryable(error.kind) {
                        self.transition(SessionState::Retrying);
                    }
                    let failure =
                        SessionFailure::new(error.kind, error.message, self.retry.attempt());
                    return self.failed(failure);
                }
                RetryDecision::Retry { attempt, delay } => {
                    self.transition(SessionState::Retrying);
                    warn!(
                        attempt,
                        delay_ms = millis(delay),
                        kind = %error.kind,
                        position = error.position,
                        "pass failed; retry scheduled"
                    );
                    self.emit(EventKind::RetryScheduled {
                        attempt,
                        delay_ms: millis(delay),
                        error,
                    });
                    if self.cancel.sleep(delay).await.is_err() {
                        return self.cancelled();
                    }
                    self.pass = attempt;
                    self.emit(EventKind::Restarted { attempt });
                    self.transition(SessionState::Streaming);
                }
            }
        }
    }

    async fn run_pass(&mut self) -> PassEnd {
        let mut source = EventSource::open(self.script.clone(), self.config.event_delay(), self.pass)
            .with_cancel(self.cancel.clone());
        debug!(pass = self.pass, "pass opened");

        loop {
            let next = match source.next().await {
                None => return PassEnd::Completed,
                Some(Err(err)) if err.kind == ErrorKind::Cancelled => return PassEnd::Cancelled,
                Some(Err(err)) => return PassEnd::Source(err),
                Some(Ok(next)) => next,
            };
            if self.cancel.is_cancelled() {
                source.close();
                return PassEnd::Cancelled;
            }
            match next {
                ScriptEvent::Content { payload } => self.emit(EventKind::Content { payload }),
                ScriptEvent::PauseRequest(request) => {
                    if let Some(end) = self.pause(request).await {
                        source.close();
                        return end;
                    }
                }
            }
        }
    }

    /// Emits the pause, then waits for valid input, the deadline, or cancellation.
    ///
    /// Returns `None` when the stream should continue.
    async fn pause(&mut self, request: PauseRequest) -> Option<PassEnd> {
        let deadline_ms = request.deadline_ms.or(self.config.default_pause_timeout_ms);
        let on_timeout = request.on_timeout.unwrap_or(if self.config.resume_on_timeout {
            TimeoutPolicy::Resume
        } else {
            TimeoutPolicy::Fail
        });

        self.emit(EventKind::PauseRequest(request.clone()));
        let deadline = deadline_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        self.transition(SessionState::AwaitingInput);
        info!(message = %request.message, deadline_ms = ?deadline_ms, "awaiting input");

        loop {
            let pending = PendingInput::new(request.message.clone(), request.fields.clone(), deadline);
            match self.gate.wait_for_input(pending, &self.cancel).await {
                // Input that won the slot just before a cancel is not emitted.
                Ok(_) if self.cancel.is_cancelled() => return Some(PassEnd::Cancelled),
                Ok(values) => match validate_input(&request.fields, &values) {
                    Ok(accepted) => {
                        self.emit(EventKind::InputReceived {
                            values: accepted.clone(),
                        });
                        self.inputs.push(accepted);
                        self.resume(ResumeReason::Input);
                        return None;
                    }
                    Err(errors) => {
                        warn!(rejected = errors.len(), "input rejected; pause stays open");
                        self.emit(EventKind::InputRejected { errors });
                    }
                },
                Err(PauseOutcome::Cancelled) => return Some(PassEnd::Cancelled),
                Err(PauseOutcome::DeadlineExpired) => {
                    let deadline_ms = deadline_ms.unwrap_or_default();
                    self.emit(EventKind::DeadlineExpired { deadline_ms });
                    return match on_timeout {
                        TimeoutPolicy::Resume => {
                            self.inputs.push(request.defaults());
                            self.resume(ResumeReason::Timeout);
                            None
                        }
                        TimeoutPolicy::Fail => Some(PassEnd::Failed(SessionFailure::new(
                            ErrorKind::Timeout,
                            format!("no input for `{}` within {deadline_ms}ms", request.message),
                            self.retry.attempt(),
                        ))),
                    };
                }
            }
        }
    }

    fn resume(&mut self, reason: ResumeReason) {
        self.transition(SessionState::Resuming);
        self.emit(EventKind::Resumed { reason });
        self.transition(SessionState::Streaming);
    }

    fn completed(&mut self) -> SessionReport {
        self.transition(SessionState::Completed);
        let report = SessionReport {
            session_id: self.session_id,
            state: self.state,
            retries: self.retry.attempt(),
            events_emitted: self.seq,
            inputs: std::mem::take(&mut self.inputs),
            elapsed_ms: self.elapsed_ms(),
        };
        self.retry.reset();
        info!(retries = report.retries, events = report.events_emitted, "session completed");
        report
    }

    fn failed(&mut self, failure: SessionFailure) -> Result<SessionReport, SessionError> {
        self.transition(SessionState::Failed);
        warn!(kind = %failure.kind, retries = failure.retries, message = %failure.message, "session failed");
        Err(SessionError::Failed(failure))
    }

    fn cancelled(&mut self) -> Result<SessionReport, SessionError> {
        info!(from = %self.state, "session cancelled");
        self.transition(SessionState::Cancelled);
        Err(SessionError::Cancelled)
    }

    fn emit(&mut self, kind: EventKind) {
        let event = Event {
            seq: self.seq,
            pass: self.pass,
            emitted_at_ms: self.elapsed_ms(),
            kind,
        };
        self.seq += 1;
        debug!(seq = event.seq, pass = event.pass, kind = event.kind.name(), "event");
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "illegal state transition ignored");
            return;
        }
        debug!(from = %self.state, to = %next, "state change");
        self.state = next;
        self.state_tx.send_replace(next);
        for observer in &self.observers {
            observer.on_state_change(next);
        }
    }

    fn elapsed_ms(&self) -> u64 {
        millis(self.started.elapsed())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::SpeedPreset;
    use crate::event::{FieldKind, FieldSpec};
    use crate::observer::RecordingObserver;
    use crate::retry::RetryPolicy;
    use crate::source::FaultPlan;

    fn instant() -> SessionConfig {
        SessionConfig::default().with_speed(SpeedPreset::Instant)
    }

    #[tokio::test(start_paused = true)]
    async fn plain_script_completes_with_all_content() {
        let recorder = RecordingObserver::new();
        let handle = StreamSession::builder(Script::named("plain").content("a").content("b"))
            .config(instant())
            .observer(Arc::new(recorder.clone()))
            .start()
            .unwrap();
        let report = handle.finish().await.unwrap();
        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.events_emitted, 2);
        assert_eq!(report.retries, 0);
        assert_eq!(recorder.final_content(), vec![json!("a"), json!("b")]);
        assert_eq!(
            recorder.states(),
            vec![SessionState::Streaming, SessionState::Completed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_script_completes_immediately() {
        let report = start(Script::named("empty"), instant()).unwrap().finish().await.unwrap();
        assert_eq!(report.events_emitted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_is_rejected_before_start() {
        let config = instant().with_retry(RetryPolicy::exponential(1, 100, 0.5));
        let err = start(Script::named("x").content("a"), config).err().unwrap();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_fault_fails_without_retry() {
        let script = Script::named("fatal")
            .content("a")
            .fault(FaultPlan::new(1, ErrorKind::Fatal));
        let err = start(script, instant()).unwrap().finish().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Fatal));
        match err {
            SessionError::Failed(failure) => assert_eq!(failure.retries, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn state_is_visible_through_the_handle() {
        let script = Script::named("wait").pause(
            PauseRequest::new("name?").field(FieldSpec::required("name", FieldKind::Text)),
        );
        let mut handle = start(script, instant()).unwrap();
        assert_eq!(
            handle.wait_for_state(SessionState::AwaitingInput).await,
            SessionState::AwaitingInput
        );
        assert_eq!(handle.pending_input().unwrap().message, "name?");
        assert!(handle.submit_input(InputValues::from([("name".into(), json!("Ada"))])));
        let report = handle.finish().await.unwrap();
        assert_eq!(report.inputs, vec![InputValues::from([("name".into(), json!("Ada"))])]);
    }
}
