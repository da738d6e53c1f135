use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// `[YYYY-MM-DD HH:MM:SS] message key=value` in local time.
///
/// Warnings and errors carry their level right after the timestamp so they
/// stand out in a quiet log.
#[derive(Debug, Clone)]
pub struct LineFormat {
    timestamp_format: &'static str,
}

impl Default for LineFormat {
    fn default() -> Self {
        Self {
            timestamp_format: "%Y-%m-%d %H:%M:%S",
        }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "[{}] ", now.format(self.timestamp_format))?;

        let level = *event.metadata().level();
        if level <= Level::WARN {
            write!(writer, "{level}: ")?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
