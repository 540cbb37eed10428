//! Bundled replay fixtures: one JSON script per pattern.

mod answers;

use stream_engine_core::{ConfigError, Script};

pub use answers::{answers_for, parse_answer};

const PAUSE_FOR_INPUT: &str = include_str!("../../scripts/pause-for-input.json");
const RETRYING_REASONING: &str = include_str!("../../scripts/retrying-reasoning.json");

/// Built-in scenario selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Form-style session that stops for a team profile.
    PauseForInput,
    /// Reasoning trace whose upstream fails twice before succeeding.
    RetryingReasoning,
}

impl Scenario {
    pub fn script(self) -> Result<Script, ConfigError> {
        match self {
            Self::PauseForInput => Script::from_json_str(PAUSE_FOR_INPUT),
            Self::RetryingReasoning => Script::from_json_str(RETRYING_REASONING),
        }
    }
}

pub fn load_script_file(path: &std::path::Path) -> Result<Script, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(Script::from_json_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use stream_engine_core::prelude::*;
    use stream_engine_core::{RecordingObserver, ScriptEvent};

    use super::*;

    #[test]
    fn fixtures_parse_and_validate() {
        let form = Scenario::PauseForInput.script().unwrap();
        assert_eq!(form.name, "pause-for-input");
        let pause = form
            .events
            .iter()
            .find_map(|e| match e {
                ScriptEvent::PauseRequest(request) => Some(request),
                _ => None,
            })
            .unwrap();
        assert_eq!(pause.deadline_ms, Some(30_000));
        assert_eq!(pause.fields.len(), 4);
        assert_eq!(
            pause.fields[3].kind,
            FieldKind::Choice {
                options: vec!["basic".into(), "pro".into()]
            }
        );

        let reasoning = Scenario::RetryingReasoning.script().unwrap();
        assert_eq!(reasoning.len(), 5);
        assert_eq!(reasoning.faults.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_reasoning_completes_on_third_pass() {
        let recorder = RecordingObserver::new();
        let handle = StreamSession::builder(Scenario::RetryingReasoning.script().unwrap())
            .config(SessionConfig::default().with_speed(SpeedPreset::Instant))
            .observer(std::sync::Arc::new(recorder.clone()))
            .start()
            .unwrap();
        let report = handle.finish().await.unwrap();
        assert_eq!(report.retries, 2);
        assert_eq!(recorder.final_content().len(), 5);
        assert_eq!(recorder.events().last().map(|e| e.pass), Some(2));
    }
}
