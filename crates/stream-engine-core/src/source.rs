//! Deterministic replay of a fixed script with optional fault injection.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::errors::{ConfigError, ErrorKind, SourceError};
use crate::event::{PauseRequest, ScriptEvent};

/// Which passes over the script a fault fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPasses {
    /// Only the first `n` passes (pass numbers `0..n`).
    First(u32),
    Every,
}

impl Default for FaultPasses {
    fn default() -> Self {
        Self::First(1)
    }
}

/// A classified error raised in place of the event at `position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPlan {
    /// Script position; equal to the script length means "after the last event".
    pub position: usize,
    pub kind: ErrorKind,
    #[serde(default)]
    pub passes: FaultPasses,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FaultPlan {
    pub fn new(position: usize, kind: ErrorKind) -> Self {
        Self {
            position,
            kind,
            passes: FaultPasses::default(),
            message: None,
        }
    }

    pub fn passes(mut self, passes: FaultPasses) -> Self {
        self.passes = passes;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn fires_on(&self, pass: u32) -> bool {
        match self.passes {
            FaultPasses::First(n) => pass < n,
            FaultPasses::Every => true,
        }
    }

    fn to_error(&self) -> SourceError {
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("injected {} fault", self.kind));
        SourceError::new(self.kind, message, self.position)
    }
}

/// Fixed, ordered sequence of events a session replays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub name: String,
    pub events: Vec<ScriptEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<FaultPlan>,
}

impl Script {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let script: Script = serde_json::from_str(raw)?;
        script.validate()?;
        Ok(script)
    }

    pub fn content(mut self, payload: impl Into<serde_json::Value>) -> Self {
        self.events.push(ScriptEvent::content(payload));
        self
    }

    pub fn pause(mut self, request: PauseRequest) -> Self {
        self.events.push(ScriptEvent::pause(request));
        self
    }

    pub fn event(mut self, event: ScriptEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn fault(mut self, fault: FaultPlan) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for fault in &self.faults {
            if fault.position > self.events.len() {
                return Err(ConfigError::Invalid(format!(
                    "fault position {} is past the end of script `{}` ({} events)",
                    fault.position,
                    self.name,
                    self.events.len()
                )));
            }
            if fault.kind == ErrorKind::Cancelled {
                return Err(ConfigError::Invalid(
                    "cancelled cannot be injected as a fault".into(),
                ));
            }
        }
        Ok(())
    }

    fn fault_at(&self, position: usize, pass: u32) -> Option<&FaultPlan> {
        self.faults
            .iter()
            .find(|f| f.position == position && f.fires_on(pass))
    }
}

/// Lazy, cancellable producer over one pass of a [`Script`].
pub struct EventSource {
    script: Arc<Script>,
    pacing: Duration,
    pass: u32,
    position: usize,
    closed: bool,
    cancel: Option<CancelToken>,
}

impl EventSource {
    /// Opens a pass positioned at the start of the script.
    ///
    /// `pacing` is waited before each event; zero for the instant preset.
    pub fn open(script: Arc<Script>, pacing: Duration, pass: u32) -> Self {
        Self {
            script,
            pacing,
            pass,
            position: 0,
            closed: false,
            cancel: None,
        }
    }

    /// Races every pacing delay against `token`.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn pass(&self) -> u32 {
        self.pass
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stops the pass. Idempotent; later advances yield a `Cancelled` error.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Advances to the next scripted event.
    ///
    /// Returns `None` once the script is exhausted. An injected fault is
    /// returned once and closes the source.
    pub async fn next(&mut self) -> Option<Result<ScriptEvent, SourceError>> {
        if self.closed {
            return Some(Err(SourceError::cancelled(self.position)));
        }
        let fault = self.script.fault_at(self.position, self.pass).cloned();
        if fault.is_none() && self.position >= self.script.len() {
            return None;
        }

        if let Err(err) = self.wait_pacing().await {
            self.closed = true;
            return Some(Err(err));
        }

        if let Some(fault) = fault {
            debug!(
                script = %self.script.name,
                pass = self.pass,
                position = self.position,
                kind = %fault.kind,
                "injecting source fault"
            );
            self.closed = true;
            return Some(Err(fault.to_error()));
        }

        let event = self.script.events[self.position].clone();
        self.position += 1;
        Some(Ok(event))
    }

    /// Adapts the remaining pass into a `Stream`.
    pub fn into_stream(self) -> impl Stream<Item = Result<ScriptEvent, SourceError>> {
        futures::stream::unfold(self, |mut source| async move {
            let item = source.next().await?;
            if matches!(&item, Err(err) if err.kind == ErrorKind::Cancelled) {
                return None;
            }
            Some((item, source))
        })
    }

    async fn wait_pacing(&self) -> Result<(), SourceError> {
        match &self.cancel {
            Some(token) => token
                .sleep(self.pacing)
                .await
                .map_err(|_| SourceError::cancelled(self.position)),
            None if self.pacing.is_zero() => Ok(()),
            None => {
                tokio::time::sleep(self.pacing).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::cancel::cancel_pair;

    fn abc() -> Arc<Script> {
        Arc::new(Script::named("abc").content("a").content("b").content("c"))
    }

    async fn drain(mut source: EventSource) -> Vec<Result<ScriptEvent, SourceError>> {
        let mut out = Vec::new();
        while let Some(item) = source.next().await {
            let stop = item.is_err();
            out.push(item);
            if stop {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn replays_script_in_order_then_ends() {
        let items = drain(EventSource::open(abc(), Duration::ZERO, 0)).await;
        assert_eq!(
            items,
            vec![
                Ok(ScriptEvent::content("a")),
                Ok(ScriptEvent::content("b")),
                Ok(ScriptEvent::content("c")),
            ]
        );
    }

    #[tokio::test]
    async fn replay_is_deterministic() {
        let first: Vec<_> = EventSource::open(abc(), Duration::ZERO, 0).into_stream().collect().await;
        let second: Vec<_> = EventSource::open(abc(), Duration::ZERO, 0).into_stream().collect().await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_pacing_before_each_event() {
        let started = tokio::time::Instant::now();
        let mut source = EventSource::open(abc(), Duration::from_millis(50), 0);
        source.next().await;
        source.next().await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(source.position(), 2);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_later_advances_fail_cancelled() {
        let mut source = EventSource::open(abc(), Duration::ZERO, 0);
        assert!(source.next().await.is_some());
        source.close();
        source.close();
        let err = source.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.position, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_token_interrupts_pacing() {
        let (abort, token) = cancel_pair();
        let mut source =
            EventSource::open(abc(), Duration::from_secs(10), 0).with_cancel(token);
        let waiter = tokio::spawn(async move { source.next().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        abort.abort();
        let err = waiter.await.unwrap().unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn fault_fires_only_on_configured_passes() {
        let script = Arc::new(
            Script::named("flaky")
                .content("a")
                .content("b")
                .fault(FaultPlan::new(1, ErrorKind::Transient).message("reset")),
        );
        let first = drain(EventSource::open(script.clone(), Duration::ZERO, 0)).await;
        assert_eq!(
            first,
            vec![
                Ok(ScriptEvent::content("a")),
                Err(SourceError::new(ErrorKind::Transient, "reset", 1)),
            ]
        );
        let second = drain(EventSource::open(script, Duration::ZERO, 1)).await;
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn fault_after_last_event_fires_at_end() {
        let script = Arc::new(
            Script::named("tail")
                .content("a")
                .fault(FaultPlan::new(1, ErrorKind::Timeout).passes(FaultPasses::Every)),
        );
        for pass in 0..3 {
            let items = drain(EventSource::open(script.clone(), Duration::ZERO, pass)).await;
            assert_eq!(items.len(), 2);
            assert_eq!(items[1].as_ref().unwrap_err().kind, ErrorKind::Timeout);
        }
    }

    #[test]
    fn script_parses_from_json_and_validates_faults() {
        let script = Script::from_json_str(
            &json!({
                "name": "demo",
                "events": [{"kind": "content", "payload": {"row": 1}}],
                "faults": [{"position": 1, "kind": "transient", "passes": "every"}]
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(script.len(), 1);
        assert_eq!(script.faults[0].passes, FaultPasses::Every);

        let bad = json!({
            "events": [],
            "faults": [{"position": 3, "kind": "fatal"}]
        });
        assert!(Script::from_json_str(&bad.to_string()).is_err());
    }
}
