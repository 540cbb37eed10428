use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::event::{Event, EventKind};
use crate::state::SessionState;

/// One entry of a session timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Event(Event),
    State(SessionState),
}

/// Listener for every event and state transition of a session.
///
/// Called on the driver task, in emission order, exactly once per item.
/// Observers cannot influence control flow and should return quickly.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, _event: &Event) {}

    fn on_state_change(&self, _state: SessionState) {}
}

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type StateCallback = Box<dyn Fn(SessionState) + Send + Sync>;

/// Observer built from plain closures (`onEvent` / `onStateChange`).
#[derive(Default)]
pub struct CallbackObserver {
    on_event: Option<EventCallback>,
    on_state: Option<StateCallback>,
}

impl CallbackObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Box::new(f));
        self
    }

    pub fn on_state_change(mut self, f: impl Fn(SessionState) + Send + Sync + 'static) -> Self {
        self.on_state = Some(Box::new(f));
        self
    }
}

impl SessionObserver for CallbackObserver {
    fn on_event(&self, event: &Event) {
        if let Some(f) = &self.on_event {
            f(event);
        }
    }

    fn on_state_change(&self, state: SessionState) {
        if let Some(f) = &self.on_state {
            f(state);
        }
    }
}

/// Keeps the whole timeline in memory. Cheap to clone; clones share storage.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    updates: Arc<Mutex<Vec<SessionUpdate>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<SessionUpdate> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.updates()
            .into_iter()
            .filter_map(|u| match u {
                SessionUpdate::Event(e) => Some(e),
                SessionUpdate::State(_) => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.updates()
            .into_iter()
            .filter_map(|u| match u {
                SessionUpdate::State(s) => Some(s),
                SessionUpdate::Event(_) => None,
            })
            .collect()
    }

    /// Names of the recorded events, e.g. `["content", "pause-request"]`.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind.name()).collect()
    }

    /// Content payloads belonging to the last pass over the script.
    ///
    /// Content from passes that were later restarted is superseded.
    pub fn final_content(&self) -> Vec<serde_json::Value> {
        let events = self.events();
        let last_pass = events.iter().map(|e| e.pass).max().unwrap_or(0);
        events
            .into_iter()
            .filter(|e| e.pass == last_pass)
            .filter_map(|e| match e.kind {
                EventKind::Content { payload } => Some(payload),
                _ => None,
            })
            .collect()
    }

    fn push(&self, update: SessionUpdate) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(update);
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, event: &Event) {
        self.push(SessionUpdate::Event(event.clone()));
    }

    fn on_state_change(&self, state: SessionState) {
        self.push(SessionUpdate::State(state));
    }
}

/// Forwards the timeline into an unbounded channel; never blocks the driver.
pub(crate) struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionUpdate>,
}

impl ChannelObserver {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionUpdate>) -> Self {
        Self { tx }
    }
}

impl SessionObserver for ChannelObserver {
    fn on_event(&self, event: &Event) {
        let _ = self.tx.send(SessionUpdate::Event(event.clone()));
    }

    fn on_state_change(&self, state: SessionState) {
        let _ = self.tx.send(SessionUpdate::State(state));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn content(seq: u64, pass: u32, text: &str) -> Event {
        Event {
            seq,
            pass,
            emitted_at_ms: 0,
            kind: EventKind::Content {
                payload: json!(text),
            },
        }
    }

    #[test]
    fn callback_observer_invokes_closures() {
        let events = Arc::new(AtomicUsize::new(0));
        let states = Arc::new(AtomicUsize::new(0));
        let observer = {
            let events = events.clone();
            let states = states.clone();
            CallbackObserver::new()
                .on_event(move |_| {
                    events.fetch_add(1, Ordering::SeqCst);
                })
                .on_state_change(move |_| {
                    states.fetch_add(1, Ordering::SeqCst);
                })
        };
        SessionObserver::on_event(&observer, &content(0, 0, "a"));
        SessionObserver::on_state_change(&observer, SessionState::Streaming);
        SessionObserver::on_state_change(&observer, SessionState::Completed);
        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert_eq!(states.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn recording_keeps_order_and_final_content_drops_superseded_passes() {
        let recorder = RecordingObserver::new();
        recorder.on_state_change(SessionState::Streaming);
        recorder.on_event(&content(0, 0, "a"));
        recorder.on_event(&content(1, 0, "b"));
        recorder.on_state_change(SessionState::Retrying);
        recorder.on_event(&content(2, 1, "a"));
        recorder.on_event(&content(3, 1, "b"));
        recorder.on_event(&content(4, 1, "c"));

        assert_eq!(recorder.updates().len(), 7);
        assert_eq!(
            recorder.states(),
            vec![SessionState::Streaming, SessionState::Retrying]
        );
        assert_eq!(recorder.final_content(), vec![json!("a"), json!("b"), json!("c")]);
    }
}
