//! Logging setup.
//!
//! Builds a `tracing-subscriber` registry from [`LoggingConfig`]: an
//! `EnvFilter` (with `RUST_LOG` taking precedence over the configured level)
//! and one `fmt` layer in the configured format, written to stdout, stderr
//! or a file through `tracing-appender`.
//!
//! ```rust,ignore
//! let _guard = chatflow_runtime::logging::init_logging(&config.logging);
//!
//! // or by hand
//! let _guard = LoggingBuilder::new()
//!     .with_level(tracing::Level::DEBUG)
//!     .directive("chatflow_framework=trace")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .init();
//! ```
//!
//! Keep the returned [`LoggingGuard`] alive; dropping it flushes and stops
//! the background file writer.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventMode};

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Creation and close, which brackets each dispatched event.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    pub const ACTIVE: Self = Self {
        new: false,
        enter: true,
        exit: true,
        close: false,
    };

    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> fmt::format::FmtSpan {
        let mut span = fmt::format::FmtSpan::NONE;
        if self.new {
            span |= fmt::format::FmtSpan::NEW;
        }
        if self.enter {
            span |= fmt::format::FmtSpan::ENTER;
        }
        if self.exit {
            span |= fmt::format::FmtSpan::EXIT;
        }
        if self.close {
            span |= fmt::format::FmtSpan::CLOSE;
        }
        span
    }
}

impl From<SpanEventMode> for SpanEvents {
    fn from(mode: SpanEventMode) -> Self {
        match mode {
            SpanEventMode::None => Self::NONE,
            SpanEventMode::New => Self {
                new: true,
                ..Self::NONE
            },
            SpanEventMode::Close => Self {
                close: true,
                ..Self::NONE
            },
            SpanEventMode::Active => Self::ACTIVE,
            SpanEventMode::Full => Self::FULL,
        }
    }
}

/// Keeps the non-blocking writer alive.
#[must_use = "dropping the guard stops the log writer"]
#[derive(Debug)]
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

/// Initializes logging from configuration.
///
/// A subscriber that is already installed is left in place.
pub fn init_logging(config: &LoggingConfig) -> LoggingGuard {
    LoggingBuilder::from_config(config).init()
}

/// Builder for the global subscriber.
#[derive(Debug)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: tracing::Level,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    with_target: bool,
    with_thread_ids: bool,
    with_file_line: bool,
    file_path: Option<PathBuf>,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            directives: Vec::new(),
            level: tracing::Level::INFO,
            span_events: SpanEvents::NONE,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            with_target: true,
            with_thread_ids: false,
            with_file_line: false,
            file_path: None,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new();
        builder.level = config.level.to_tracing_level();
        builder.format = config.format;
        builder.output = config.output;
        builder.span_events = SpanEvents::from(config.span_events);
        builder.with_target = config.show_target;
        builder.with_thread_ids = config.show_thread_ids;
        builder.with_file_line = config.show_file_line;
        builder.file_path.clone_from(&config.file_path);
        builder.directives.extend(config.filter_directives.iter().cloned());
        builder.directives.extend(
            config
                .filters
                .iter()
                .map(|(module, level)| format!("{module}={level}")),
        );
        builder
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    /// Adds an `EnvFilter` directive, e.g. `chatflow_runtime=debug`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    pub fn with_file_line(mut self, enabled: bool) -> Self {
        self.with_file_line = enabled;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let base = self.level.to_string().to_lowercase();
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&base));
        for directive in &self.directives {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("ignoring log directive '{directive}': {e}"),
            }
        }
        filter
    }

    fn writer(&self) -> (NonBlocking, WorkerGuard) {
        match self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
            LogOutput::File => match &self.file_path {
                Some(path) => {
                    let appender = tracing_appender::rolling::never(
                        path.parent().unwrap_or_else(|| Path::new(".")),
                        path.file_name().unwrap_or_else(|| OsStr::new("chatflow.log")),
                    );
                    tracing_appender::non_blocking(appender)
                }
                None => tracing_appender::non_blocking(std::io::stdout()),
            },
        }
    }

    /// Installs the subscriber, ignoring an already installed one.
    pub fn init(self) -> LoggingGuard {
        match self.try_init() {
            Ok(guard) => guard,
            Err(_) => LoggingGuard { _worker: None },
        }
    }

    /// Installs the subscriber.
    pub fn try_init(self) -> Result<LoggingGuard, TryInitError> {
        let missing_file = self.output == LogOutput::File && self.file_path.is_none();
        let json_unavailable = self.format == LogFormat::Json && !cfg!(feature = "json-log");

        let filter = self.build_filter();
        let span_events = self.span_events.to_fmt_span();
        let (writer, worker) = self.writer();

        macro_rules! configure_layer {
            ($layer:expr) => {
                $layer
                    .with_span_events(span_events)
                    .with_target(self.with_target)
                    .with_thread_ids(self.with_thread_ids)
                    .with_file(self.with_file_line)
                    .with_line_number(self.with_file_line)
                    .with_writer(writer)
            };
        }

        let registry = tracing_subscriber::registry().with(filter);
        match self.format {
            #[cfg(feature = "json-log")]
            LogFormat::Json => registry
                .with(configure_layer!(fmt::layer().json()))
                .try_init()?,
            LogFormat::Compact => registry
                .with(configure_layer!(fmt::layer().compact()))
                .try_init()?,
            LogFormat::Pretty => registry
                .with(configure_layer!(fmt::layer().pretty()))
                .try_init()?,
            _ => registry.with(configure_layer!(fmt::layer())).try_init()?,
        }

        if missing_file {
            warn!("File output requested without file_path, logging to stdout");
        }
        if json_unavailable {
            warn!("JSON log format needs the json-log feature, using full format");
        }
        Ok(LoggingGuard {
            _worker: Some(worker),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_span_events_from_mode() {
        assert_eq!(SpanEvents::from(SpanEventMode::Full), SpanEvents::FULL);
        assert_eq!(SpanEvents::from(SpanEventMode::None), SpanEvents::NONE);
        let close = SpanEvents::from(SpanEventMode::Close);
        assert!(close.close && !close.new);
    }

    #[test]
    fn test_builder_from_config() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            filter_directives: vec!["hyper=warn".into()],
            filters: BTreeMap::from([("chatflow_framework".to_string(), LogLevel::Trace)]),
            show_thread_ids: true,
            ..Default::default()
        };
        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, tracing::Level::DEBUG);
        assert!(builder.with_thread_ids);
        assert_eq!(builder.directives, ["hyper=warn", "chatflow_framework=trace"]);
    }
}
