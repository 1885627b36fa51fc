//! Minimal `log::Log` sink: writes to a file or stderr, leveled by
//! `CONTAINERUNTIME_LOG_LEVEL` (default `warn`).

use std::env;
use std::fs::OpenOptions;
use std::io::{stderr, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<RuntimeLogger> = OnceCell::new();

const LOG_LEVEL_ENV_NAME: &str = "CONTAINERUNTIME_LOG_LEVEL";

fn detect_log_level() -> LevelFilter {
    env::var(LOG_LEVEL_ENV_NAME)
        .ok()
        .and_then(|s| LevelFilter::from_str(&s).ok())
        .unwrap_or(LevelFilter::Warn)
}

pub fn init(log_file: Option<PathBuf>, log_format: LogFormat) -> Result<(), std::io::Error> {
    let level_filter = detect_log_level();

    let sink = match log_file {
        Some(path) => Sink::File(Mutex::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?,
        )),
        None => Sink::Stderr,
    };

    let logger = LOGGER.get_or_init(|| RuntimeLogger {
        level: level_filter,
        sink,
        format: log_format,
    });
    log::set_logger(logger)
        .map(|()| log::set_max_level(level_filter))
        .expect("logger already initialized");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {}", other)),
        }
    }
}

enum Sink {
    File(Mutex<std::fs::File>),
    Stderr,
}

struct RuntimeLogger {
    level: LevelFilter,
    sink: Sink,
    format: LogFormat,
}

impl Log for RuntimeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = chrono::Local::now().to_rfc3339();
        let line = match self.format {
            LogFormat::Text => match (record.file(), record.line()) {
                (Some(file), Some(line)) => format!(
                    "[{} {}:{}] {} {}",
                    record.level(),
                    file,
                    line,
                    timestamp,
                    record.args()
                ),
                _ => format!("[{}] {} {}", record.level(), timestamp, record.args()),
            },
            LogFormat::Json => serde_json::json!({
                "level": record.level().to_string(),
                "file": record.file(),
                "line": record.line(),
                "timestamp": timestamp,
                "message": record.args().to_string(),
            })
            .to_string(),
        };

        match &self.sink {
            Sink::File(file) => {
                let mut file = file.lock().unwrap();
                let _ = writeln!(file, "{}", line);
            }
            Sink::Stderr => {
                let _ = writeln!(stderr(), "{}", line);
            }
        }
    }

    fn flush(&self) {
        match &self.sink {
            Sink::File(file) => {
                let _ = file.lock().unwrap().flush();
            }
            Sink::Stderr => {
                let _ = stderr().flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Restores whatever the env var held before the test, so tests don't
    /// leak state into each other.
    struct LevelEnvGuard {
        original: Option<String>,
    }

    impl LevelEnvGuard {
        fn set(value: &str) -> Self {
            let original = env::var(LOG_LEVEL_ENV_NAME).ok();
            env::set_var(LOG_LEVEL_ENV_NAME, value);
            Self { original }
        }
    }

    impl Drop for LevelEnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(value) => env::set_var(LOG_LEVEL_ENV_NAME, value),
                None => env::remove_var(LOG_LEVEL_ENV_NAME),
            }
        }
    }

    #[test]
    #[serial]
    fn detect_log_level_defaults_to_warn() {
        env::remove_var(LOG_LEVEL_ENV_NAME);
        assert_eq!(detect_log_level(), LevelFilter::Warn);
    }

    #[test]
    #[serial]
    fn detect_log_level_reads_the_env_var() {
        let _guard = LevelEnvGuard::set("debug");
        assert_eq!(detect_log_level(), LevelFilter::Debug);
    }

    #[test]
    #[serial]
    fn detect_log_level_falls_back_to_warn_on_garbage() {
        let _guard = LevelEnvGuard::set("not-a-level");
        assert_eq!(detect_log_level(), LevelFilter::Warn);
    }

    #[test]
    fn log_format_parses_text_and_json() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
