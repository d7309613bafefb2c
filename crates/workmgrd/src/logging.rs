//! Logging utilities for the daemon.
//!
//! Initializes structured logging using `tracing` and `tracing-subscriber`.
//! The filter comes from `--debug` when a level is chosen there, otherwise
//! from the `RUST_LOG` environment variable, falling back to `info`.

use crate::config::Config;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt};

/// System name recorded on the daemon's root span.
pub const SYSTEM: &str = "PROTO";
/// Component name recorded on the daemon's root span.
pub const COMPONENT: &str = "work-manager";

/// Logging options derived from the daemon configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Explicit maximum level; `None` defers to `RUST_LOG`.
    pub level: Option<Level>,
    /// Include targets, source files and line numbers.
    pub dev_mode: bool,
}

impl LogSettings {
    /// Map the numeric debug scale onto tracing levels.
    ///
    /// `0` selects no explicit level. Values between the scale's steps round
    /// down to the more verbose level.
    #[must_use]
    pub fn from_debug_level(debug: u8, dev_mode: bool) -> Self {
        let level = match debug {
            0 => None,
            1..=19 => Some(Level::DEBUG),
            20..=29 => Some(Level::INFO),
            30..=39 => Some(Level::WARN),
            _ => Some(Level::ERROR),
        };
        Self { level, dev_mode }
    }

    fn filter(self) -> EnvFilter {
        match self.level {
            Some(level) => EnvFilter::new(level.as_str()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }
}

impl From<&Config> for LogSettings {
    fn from(config: &Config) -> Self {
        Self::from_debug_level(config.debug, config.dev_mode)
    }
}

/// Initialize the global tracing subscriber writing to stdout.
///
/// Call `init` before any logging statements to avoid missing logs.
///
/// # Examples
///
/// ```rust,no_run
/// use workmgrd::logging::{LogSettings, init};
///
/// init(LogSettings::default());
/// tracing::info!("Logging is initialized!");
/// ```
pub fn init(settings: LogSettings) {
    init_with_writer(settings, fmt::writer::BoxMakeWriter::new(std::io::stdout));
}

/// Initialize logging with a custom writer.
pub fn init_with_writer<W>(settings: LogSettings, writer: W)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    fmt()
        .with_env_filter(settings.filter())
        .with_target(settings.dev_mode)
        .with_file(settings.dev_mode)
        .with_line_number(settings.dev_mode)
        .with_writer(writer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, info};

    #[derive(Clone)]
    struct BufMakeWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> MakeWriter<'a> for BufMakeWriter {
        type Writer = BufWriter;

        fn make_writer(&'a self) -> Self::Writer {
            BufWriter {
                buf: self.buf.clone(),
            }
        }
    }

    struct BufWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl std::io::Write for BufWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buf
                .lock()
                .expect("Failed to lock log buffer")
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[rstest]
    #[case(0, None)]
    #[case(10, Some(Level::DEBUG))]
    #[case(20, Some(Level::INFO))]
    #[case(30, Some(Level::WARN))]
    #[case(40, Some(Level::ERROR))]
    #[case(50, Some(Level::ERROR))]
    fn maps_debug_scale(#[case] debug: u8, #[case] expected: Option<Level>) {
        assert_eq!(LogSettings::from_debug_level(debug, false).level, expected);
    }

    #[test]
    fn init_logging_honours_level() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        init_with_writer(
            LogSettings::from_debug_level(20, false),
            BufMakeWriter { buf: buf.clone() },
        );
        info!("captured");
        debug!("filtered out");
        let output = String::from_utf8(buf.lock().expect("Failed to lock log buffer").clone())
            .expect("Captured output is not valid UTF-8");
        assert!(output.contains("captured"));
        assert!(!output.contains("filtered out"));
    }
}
