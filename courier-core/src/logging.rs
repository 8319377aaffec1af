//! Logging initialization
//!
//! Writes to stdout and to a daily-rolled file under the configured log
//! directory. The returned guard must stay alive for the life of the
//! process or buffered file output is lost.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::schema::LoggingConfig;

/// Initialize the logging system
pub fn init_logging(config: &LoggingConfig) -> WorkerGuard {
    let filter = build_filter(config);

    let json_format = match std::env::var("LOG_FORMAT") {
        Ok(v) => v.eq_ignore_ascii_case("json"),
        Err(_) => config.format.eq_ignore_ascii_case("json"),
    };

    // rolling::daily with a "courier.log" prefix produces courier.log.YYYY-MM-DD
    let file_appender = tracing_appender::rolling::daily(&config.dir, "courier.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The format is chosen at runtime, so the layers have to be boxed
    let stdout_layer = if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let file_layer = if json_format {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    Registry::default()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Err(e) = cleanup_old_logs(&config.dir, 7) {
        eprintln!("Failed to clean up old logs: {}", e);
    }

    guard
}

/// Base level from RUST_LOG or the configured level, plus the
/// per-module override directives from config
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone());
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    for (module, level) in &config.overrides {
        match format!("{}={}", module, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(_) => eprintln!("Invalid log directive: {}={}", module, level),
        }
    }
    filter
}

/// Clean up log files older than `days` days
fn cleanup_old_logs(dir: &str, days: u64) -> std::io::Result<()> {
    let path = Path::new(dir);
    if !path.exists() {
        return Ok(());
    }

    let now = std::time::SystemTime::now();
    let threshold = std::time::Duration::from_secs(days * 24 * 3600);

    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with("courier.log") {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if let Some(age) = age {
            if age > threshold {
                if let Err(e) = std::fs::remove_file(&path) {
                    eprintln!("Failed to remove old log file {:?}: {}", path, e);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_cleanup_removes_only_stale_log_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();

        let stale = dir.join("courier.log.2024-01-01");
        let fresh = dir.join("courier.log.2099-01-01");
        let unrelated = dir.join("notes.txt");
        for p in [&stale, &fresh, &unrelated] {
            std::fs::write(p, "x").unwrap();
        }

        // Age the stale file past the retention window
        let old = SystemTime::now() - Duration::from_secs(10 * 24 * 3600);
        let times = std::fs::File::options()
            .write(true)
            .open(&stale)
            .and_then(|f| f.set_modified(old));
        times.unwrap();

        cleanup_old_logs(dir.to_str().unwrap(), 7).unwrap();

        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_cleanup_tolerates_missing_dir() {
        cleanup_old_logs("does/not/exist", 7).unwrap();
    }

    #[test]
    fn test_build_filter_carries_module_overrides() {
        let mut config = LoggingConfig::default();
        config
            .overrides
            .insert("rumqttc".to_string(), "warn".to_string());

        // Overrides apply regardless of the RUST_LOG base; the Display
        // form is the only way to observe the directives.
        let filter = build_filter(&config);
        assert!(filter.to_string().contains("rumqttc=warn"));
    }

    #[test]
    fn test_json_layer_builds() {
        // The json formatter is feature-gated in tracing-subscriber;
        // constructing the boxed layer is the assertion.
        let _layer: Box<dyn Layer<Registry> + Send + Sync> = fmt::layer().json().boxed();
    }
}
