//! Colored logging infrastructure for component identification
//!
//! Provides a custom tracing formatter that prefixes every line with the
//! component that produced it (live loop or still scan).

use owo_colors::{OwoColorize, Style};
use std::fmt;
use std::io;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{
    format::{FormatEvent, FormatFields, Writer},
    FmtContext,
};
use tracing_subscriber::registry::LookupSpan;

/// Component identifier for prefixing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Live,
    Still,
}

impl Component {
    /// Get the string representation for logging prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Live => "LIVE",
            Component::Still => "STILL",
        }
    }

    pub fn color_style(&self) -> Style {
        match self {
            Component::Live => Style::new().green().bold(),
            Component::Still => Style::new().yellow().bold(),
        }
    }
}

/// Formatter with component prefixes and colors
pub struct ColoredFormatter {
    pub component: Component,
}

impl<S, N> FormatEvent<S, N> for ColoredFormatter
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
        write!(writer, "{} ", now.format("%H:%M:%S").dimmed())?;

        let prefix = format!("[{:5}]", self.component.as_str());
        write!(writer, "{} ", prefix.style(self.component.color_style()))?;

        match *event.metadata().level() {
            Level::ERROR => write!(writer, "{} ", "ERROR".red().bold())?,
            Level::WARN => write!(writer, "{} ", "WARN ".yellow().bold())?,
            Level::INFO => write!(writer, "{} ", "INFO ".green().bold())?,
            Level::DEBUG => write!(writer, "{} ", "DEBUG".blue().bold())?,
            Level::TRACE => write!(writer, "{} ", "TRACE".dimmed().bold())?,
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Initialize colored logging on stderr for a component.
///
/// `RUST_LOG` directives are honored; `verbose` raises the default level to
/// DEBUG. Call once per process.
pub fn init_component_logger(component: Component, verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(ColoredFormatter { component })
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
