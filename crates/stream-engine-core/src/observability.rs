use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::parse_bool;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "stream-engine.logs.jsonl";

fn observability_enabled(lookup: &impl Fn(&str) -> Option<String>) -> bool {
    lookup("STREAM_ENGINE_OBSERVABILITY_ENABLED")
        .map(|value| parse_bool(&value).unwrap_or(true))
        .unwrap_or(true)
}

fn resolve_env_filter(lookup: &impl Fn(&str) -> Option<String>) -> tracing_subscriber::EnvFilter {
    if let Some(level) = lookup("STREAM_ENGINE_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Splits `STREAM_ENGINE_JSON_LOG_PATH` into directory and file name.
///
/// A path naming a directory (trailing separator, `..`, root) gets the
/// default file name inside it.
fn split_log_path(raw: &str) -> (std::path::PathBuf, String) {
    let path = std::path::Path::new(raw);
    let names_dir = raw.ends_with(std::path::is_separator);
    match path.file_name().and_then(|n| n.to_str()) {
        Some(file_name) if !names_dir => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            (dir.to_path_buf(), file_name.to_string())
        }
        _ => (path.to_path_buf(), DEFAULT_LOG_FILE.to_string()),
    }
}

/// Initialize session logging once per process.
///
/// Environment variables:
/// - `STREAM_ENGINE_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `STREAM_ENGINE_LOG_LEVEL`: optional level/filter override (`info`, `debug`, etc.).
/// - `STREAM_ENGINE_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs are emitted to stdout in a human-readable console format.
/// - `RUST_LOG`: fallback filter.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let lookup = |key: &str| std::env::var(key).ok();
        if !observability_enabled(&lookup) {
            return;
        }

        let env_filter = resolve_env_filter(&lookup);
        if let Some(path_raw) = lookup("STREAM_ENGINE_JSON_LOG_PATH") {
            let (dir, file_name) = split_log_path(&path_raw);
            let _ = std::fs::create_dir_all(&dir);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stdout);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_flag_is_honoured_and_garbage_means_enabled() {
        assert!(observability_enabled(&|_: &str| None));
        assert!(!observability_enabled(&|_: &str| Some("off".to_string())));
        assert!(observability_enabled(&|_: &str| Some("maybe".to_string())));
    }

    #[test]
    fn log_path_splits_into_dir_and_file() {
        let (dir, file) = split_log_path("logs/run.jsonl");
        assert_eq!(dir, std::path::PathBuf::from("logs"));
        assert_eq!(file, "run.jsonl");

        let (dir, file) = split_log_path("bare.jsonl");
        assert_eq!(dir, std::path::PathBuf::from("."));
        assert_eq!(file, "bare.jsonl");
    }

    #[test]
    fn directory_paths_get_the_default_file_name() {
        let (dir, file) = split_log_path("logs/");
        assert_eq!(dir, std::path::PathBuf::from("logs/"));
        assert_eq!(file, DEFAULT_LOG_FILE);

        let (dir, file) = split_log_path("..");
        assert_eq!(dir, std::path::PathBuf::from(".."));
        assert_eq!(file, DEFAULT_LOG_FILE);
    }

    #[test]
    fn init_is_idempotent() {
        init_observability();
        init_observability();
    }
}
