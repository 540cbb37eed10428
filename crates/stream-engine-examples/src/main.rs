//! Replay a scripted session and print its timeline.
//!
//! ```text
//! stream-engine-demo pause-for-input --answer name=Ada --answer email=ada@example.com
//! stream-engine-demo retrying-reasoning --speed instant --json
//! stream-engine-demo pause-for-input --withhold --resume-on-timeout
//! ```

mod scenarios;

use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;
use stream_engine_core::prelude::*;
use stream_engine_core::{FaultPasses, ResumeReason, init_observability};
use tracing::info;

use crate::scenarios::{Scenario, answers_for, load_script_file, parse_answer};

#[derive(Debug, Parser)]
#[command(name = "stream-engine-demo", about = "Replay a scripted streaming session")]
struct Cli {
    /// Built-in scenario to replay.
    #[arg(value_enum, default_value_t = Scenario::PauseForInput)]
    scenario: Scenario,
    /// Replay this JSON script instead of a built-in scenario.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Pacing: instant, fast, normal, slow, or milliseconds.
    #[arg(long)]
    speed: Option<SpeedPreset>,
    /// Answer for a pause field, as name=value. Repeatable.
    #[arg(long = "answer", value_parser = parse_answer)]
    answers: Vec<(String, Value)>,
    /// Never submit input; pauses resolve by deadline or cancellation.
    #[arg(long)]
    withhold: bool,
    /// Continue with field defaults when a pause deadline elapses.
    #[arg(long)]
    resume_on_timeout: bool,
    /// Deadline for pauses that do not declare one.
    #[arg(long)]
    pause_timeout_ms: Option<u64>,
    #[arg(long)]
    max_retries: Option<u32>,
    /// Inject a fault before the event at this position.
    #[arg(long)]
    fail_at: Option<usize>,
    #[arg(long, value_enum, default_value_t = FaultKindArg::Transient)]
    fail_kind: FaultKindArg,
    /// Number of passes the injected fault fires on; 0 means every pass.
    #[arg(long, default_value_t = 1)]
    fail_passes: u32,
    /// Cancel the session after this many milliseconds.
    #[arg(long)]
    cancel_after_ms: Option<u64>,
    /// Print the timeline as JSON lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum FaultKindArg {
    Timeout,
    Transient,
    Fatal,
}

impl From<FaultKindArg> for ErrorKind {
    fn from(value: FaultKindArg) -> Self {
        match value {
            FaultKindArg::Timeout => ErrorKind::Timeout,
            FaultKindArg::Transient => ErrorKind::Transient,
            FaultKindArg::Fatal => ErrorKind::Fatal,
        }
    }
}

impl Cli {
    fn script(&self) -> Result<Script, Box<dyn std::error::Error>> {
        let mut script = match &self.script {
            Some(path) => load_script_file(path)?,
            None => self.scenario.script()?,
        };
        if let Some(position) = self.fail_at {
            let passes = match self.fail_passes {
                0 => FaultPasses::Every,
                n => FaultPasses::First(n),
            };
            script = script.fault(FaultPlan::new(position, self.fail_kind.into()).passes(passes));
        }
        Ok(script)
    }

    fn config(&self) -> Result<SessionConfig, Box<dyn std::error::Error>> {
        let mut config = SessionConfig::from_env()?;
        if let Some(speed) = self.speed {
            config = config.with_speed(speed);
        }
        if let Some(ms) = self.pause_timeout_ms {
            config = config.with_default_pause_timeout_ms(ms);
        }
        if self.resume_on_timeout {
            config = config.resume_on_timeout(true);
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_observability();
    let cli = Cli::parse();

    let script = cli.script()?;
    let config = cli.config()?;
    info!(script = %script.name, speed = %config.speed, "replaying script");

    let mut session = StreamSession::builder(script).config(config).start()?;
    if let Some(ms) = cli.cancel_after_ms {
        let abort = session.abort_handle();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            abort.abort();
        });
    }

    while let Some(update) = session.next_update().await {
        print_update(&update, cli.json)?;
        match &update {
            SessionUpdate::State(SessionState::AwaitingInput) if !cli.withhold => {
                submit_answers(&session, &cli.answers).await;
            }
            SessionUpdate::Event(Event {
                kind: EventKind::InputRejected { .. },
                ..
            }) if session.pending_input().is_some_and(|p| p.deadline.is_none()) => {
                // No deadline would ever unblock a rejected non-interactive answer.
                session.cancel();
            }
            _ => {}
        }
    }

    let report = session.finish().await?;
    if cli.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "completed: {} events, {} retries, {} ms",
            report.events_emitted, report.retries, report.elapsed_ms
        );
    }
    Ok(())
}

async fn submit_answers(session: &SessionHandle, answers: &[(String, Value)]) {
    let pending = loop {
        if let Some(pending) = session.pending_input() {
            break pending;
        }
        if session.state().is_terminal() {
            return;
        }
        tokio::task::yield_now().await;
    };
    let values = answers_for(&pending.fields, answers);
    if session.submit_input(values) {
        info!(message = %pending.message, "submitted answers");
    }
}

fn print_update(update: &SessionUpdate, json: bool) -> Result<(), serde_json::Error> {
    match update {
        SessionUpdate::State(state) if json => {
            println!("{}", serde_json::json!({ "state": state }));
        }
        SessionUpdate::State(state) => println!("  -> {state}"),
        SessionUpdate::Event(event) if json => println!("{}", serde_json::to_string(event)?),
        SessionUpdate::Event(event) => println!(
            "[{:>3}] pass {} +{:>5}ms {:<16} {}",
            event.seq,
            event.pass,
            event.emitted_at_ms,
            event.kind.name(),
            describe(&event.kind)
        ),
    }
    Ok(())
}

fn describe(kind: &EventKind) -> String {
    match kind {
        EventKind::Content { payload } => payload.to_string(),
        EventKind::PauseRequest(request) => {
            let names: Vec<&str> = request.fields.iter().map(|f| f.name.as_str()).collect();
            format!("{} [{}]", request.message, names.join(", "))
        }
        EventKind::InputReceived { values } => {
            serde_json::to_string(values).unwrap_or_default()
        }
        EventKind::InputRejected { errors } => errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
        EventKind::Resumed { reason: ResumeReason::Input } => "with input".into(),
        EventKind::Resumed { reason: ResumeReason::Timeout } => "with defaults".into(),
        EventKind::DeadlineExpired { deadline_ms } => format!("after {deadline_ms}ms"),
        EventKind::RetryScheduled {
            attempt,
            delay_ms,
            error,
        } => format!("retry {attempt} in {delay_ms}ms: {error}"),
        EventKind::Restarted { attempt } => format!("attempt {attempt}"),
    }
}
