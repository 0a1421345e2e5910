//! Console logging for acqsrv
//!
//! Output format: `timestamp [LEVEL] [target: ][span: ]message`. The event
//! target is only printed at debug and trace verbosity. `RUST_LOG` takes
//! precedence over the level passed on the command line.

use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
    EnvFilter,
};

/// Single-line event formatter
///
/// Example output:
/// `2026-10-19T08:12:03.418204Z [WARN] request: Poll failed (connect_failed): ...`
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleFormat {
    with_target: bool,
}

impl ConsoleFormat {
    pub fn new(with_target: bool) -> Self {
        Self { with_target }
    }

    /// Targets are printed when the CLI level is debug or trace
    pub fn for_level(level: &str) -> Self {
        Self::new(level.eq_ignore_ascii_case("debug") || level.eq_ignore_ascii_case("trace"))
    }
}

impl<S, N> FormatEvent<S, N> for ConsoleFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "{} [{}] ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ"),
            metadata.level()
        )?;

        if self.with_target {
            write!(writer, "{}: ", metadata.target())?;
        }
        // HTTP requests run inside the TraceLayer span
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}: ", span.name())?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Build the filter: `RUST_LOG` if set, else `level` for acqsrv and the Modbus library
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,acqsrv={level},fieldlink_modbus={level},tower_http={level}"
        ))
    })
}

/// Install the global subscriber. Returns false if one was already set.
pub fn init(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .event_format(ConsoleFormat::for_level(level))
        .try_init()
        .is_ok()
}
