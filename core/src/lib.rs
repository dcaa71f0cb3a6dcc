use log::LevelFilter;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Config, Root},
    encode::{Encode, pattern::PatternEncoder},
    filter::threshold::ThresholdFilter,
};
use std::{backtrace, env};

pub mod error;
pub mod stats;
pub mod types;

pub use error::{Result, RunnerError};

const LOGGING_PATTERN: &str = "{d} {l} {t} - {m}{n}";

/// Why the logger could not be installed.
#[derive(Debug, thiserror::Error)]
pub enum LoggerInitError {
    #[error("cannot open log file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid logger configuration: {0}")]
    Config(#[from] log4rs::config::runtime::ConfigErrors),
    #[error(transparent)]
    AlreadySet(#[from] log::SetLoggerError),
}

/// Pattern encoder that appends a captured backtrace to error records when
/// `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE` is set.
#[derive(Debug)]
struct ErrorBacktraceEncoder {
    inner: PatternEncoder,
    capture: bool,
}

impl ErrorBacktraceEncoder {
    fn new(pattern: &str) -> Self {
        Self {
            inner: PatternEncoder::new(pattern),
            capture: env::var_os("RUST_BACKTRACE").is_some()
                || env::var_os("RUST_LIB_BACKTRACE").is_some(),
        }
    }
}

impl Encode for ErrorBacktraceEncoder {
    fn encode(
        &self,
        w: &mut dyn log4rs::encode::Write,
        record: &log::Record<'_>,
    ) -> anyhow::Result<()> {
        if !(self.capture && record.level() == log::Level::Error) {
            return self.inner.encode(w, record);
        }
        let args = format_args!(
            "{}\nBacktrace:\n{}",
            record.args(),
            backtrace::Backtrace::capture()
        );
        let with_trace = log::Record::builder()
            .args(args)
            .level(record.level())
            .target(record.target())
            .module_path(record.module_path())
            .file(record.file())
            .line(record.line())
            .build();
        self.inner.encode(w, &with_trace)
    }
}

/// Install the process-wide logger.
///
/// Records at `log_level` and above go to stderr. When `file_path` is given,
/// the same records are appended to that file as well.
pub fn initialize_logger(
    log_level: LevelFilter,
    file_path: Option<&str>,
) -> std::result::Result<(), LoggerInitError> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(ErrorBacktraceEncoder::new(LOGGING_PATTERN)))
        .build();

    let mut builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(log_level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");

    if let Some(path) = file_path {
        let logfile = FileAppender::builder()
            .encoder(Box::new(ErrorBacktraceEncoder::new(LOGGING_PATTERN)))
            .build(path)
            .map_err(|source| LoggerInitError::File {
                path: path.to_string(),
                source,
            })?;
        builder = builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
    }

    let config = builder.build(root.build(log_level))?;
    log4rs::init_config(config)?;
    Ok(())
}

/// Parse a level name as accepted in `RUNNER_LOG_LEVEL` and `--log-level`.
pub fn parse_log_level(value: &str) -> Option<LevelFilter> {
    match value.trim().to_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_names() {
        assert_eq!(parse_log_level("WARNING"), Some(LevelFilter::Warn));
        assert_eq!(parse_log_level(" debug "), Some(LevelFilter::Debug));
        assert_eq!(parse_log_level("loud"), None);
    }
}
