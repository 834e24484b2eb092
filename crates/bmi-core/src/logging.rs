//! Process-wide stderr logger for BMI binaries.
//!
//! `init` is idempotent; the first call wins. The level comes from `BMI_LOG`
//! when set, otherwise from the caller's default.

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use std::env;
use std::io::Write;
use std::str::FromStr;
use std::sync::Once;

pub const LOG_LEVEL_ENV: &str = "BMI_LOG";

static INIT: Once = Once::new();

struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {:<5} {}: {}\n",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Resolve the effective level from `BMI_LOG`, falling back to `default_level`
/// and then to `info`.
pub fn resolve_level(default_level: &str) -> LevelFilter {
    env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|value| LevelFilter::from_str(value.trim()).ok())
        .or_else(|| LevelFilter::from_str(default_level).ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the stderr logger.
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let level = resolve_level(default_level);
        if log::set_boxed_logger(Box::new(StderrLogger { level })).is_ok() {
            log::set_max_level(level);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_over_default() {
        let prev = env::var(LOG_LEVEL_ENV).ok();
        env::set_var(LOG_LEVEL_ENV, "debug");
        assert_eq!(resolve_level("warn"), LevelFilter::Debug);
        env::set_var(LOG_LEVEL_ENV, "nonsense");
        assert_eq!(resolve_level("warn"), LevelFilter::Warn);
        env::remove_var(LOG_LEVEL_ENV);
        assert_eq!(resolve_level("bogus"), LevelFilter::Info);
        if let Some(prev) = prev {
            env::set_var(LOG_LEVEL_ENV, prev);
        }
    }

    #[test]
    fn init_is_idempotent() {
        init("info");
        init("debug");
        log::info!("logger installed");
    }
}
