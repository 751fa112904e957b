//! Logging configuration of the node.
use std::fmt;
use std::panic::Location;

use backtrace::Backtrace;
use clap::ValueEnum;
use tracing::Level;
use tracing_log::LogTracer;
use tracing_subscriber::filter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(val: LogLevel) -> Self {
        match val {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            x => Err(crate::error::Error::InvalidLoggingLevel(x.to_string())),
        }
    }
}

/// Panic location
#[derive(Debug, Clone)]
pub struct PanicLocation {
    file: String,
    line: u32,
    column: u32,
}

impl<'a> From<&Location<'a>> for PanicLocation {
    fn from(lo: &Location<'a>) -> Self {
        Self {
            file: lo.file().to_string(),
            line: lo.line(),
            column: lo.column(),
        }
    }
}

/// Necessary information for recording panic
#[derive(Debug, Clone)]
pub struct PanicData {
    message: String,
    backtrace: String,
    location: Option<PanicLocation>,
}

impl fmt::Display for PanicLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

impl fmt::Display for PanicData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(l) => write!(f, "{}, {} \n\n {}", self.message, l, self.backtrace),
            None => write!(f, "{} \n\n {}", self.message, self.backtrace),
        }
    }
}

/// Setup a panic hook that records the panic as a `tracing` event at `ERROR` level.
pub fn set_panic_hook() {
    std::panic::set_hook(Box::new(|panic| {
        let data = PanicData {
            message: panic.to_string(),
            backtrace: format!("{:?}", Backtrace::new()),
            location: panic.location().map(PanicLocation::from),
        };
        tracing::error!("{}", data)
    }));
}

/// Log to stderr at `level`, and route `log` records into `tracing`.
pub fn init_logging(level: LogLevel) {
    set_panic_hook();

    let subscriber = Registry::default();
    let level_filter = filter::LevelFilter::from_level(level.into());

    // Stderr
    let subscriber = subscriber.with(
        tracing_fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(level_filter),
    );
    // Errors mean a logger is installed already.
    let _ = LogTracer::init();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
