//! Log formatting for the mesh node.
//!
//! Events render as fixed-width columns so interleaved output from the
//! listen pool, the radio receiver, and the engine stays scannable:
//!
//! ```text
//! [2026-08-07 10:12:03.412] [mesh-driver  ] [i INFO ] forwarding loop running
//! ```
//!
//! Components tag their lines through the `component_*!` macros, which
//! attach a `component` field the formatter folds into the service column.

use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const SERVICE_WIDTH: usize = 13;

/// Log a line attributed to a named component of the node.
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Warning-level counterpart of [`component_info!`].
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Error-level counterpart of [`component_info!`].
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

/// Column-aligned event formatter with ANSI colors when on a terminal.
pub struct MeshLogFormatter {
    service_name: String,
    colors: bool,
}

impl MeshLogFormatter {
    pub fn new(service_name: String) -> Self {
        // A dumb or absent TERM means no escape codes.
        let colors = std::env::var("TERM").map(|t| t != "dumb").unwrap_or(false);
        Self {
            service_name,
            colors,
        }
    }

    fn service_column(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(component) => format!("mesh-{component}"),
            None => self.service_name.clone(),
        };
        if name.len() > SERVICE_WIDTH {
            format!("{}…", &name[..SERVICE_WIDTH - 1])
        } else {
            format!("{:<width$}", name, width = SERVICE_WIDTH)
        }
    }

    fn paint(&self, code: &'static str) -> &'static str {
        if self.colors {
            code
        } else {
            ""
        }
    }
}

fn level_column(level: Level) -> (&'static str, &'static str) {
    // (label, color)
    match level {
        Level::ERROR => ("x ERROR", "\x1b[91m"),
        Level::WARN => ("! WARN ", "\x1b[93m"),
        Level::INFO => ("i INFO ", "\x1b[32m"),
        Level::DEBUG => ("  DEBUG", "\x1b[90m"),
        Level::TRACE => ("  TRACE", "\x1b[90m"),
    }
}

impl<S, N> FormatEvent<S, N> for MeshLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

        let mut fields = EventFields::default();
        event.record(&mut fields);

        let (label, color) = level_column(*event.metadata().level());
        let reset = self.paint("\x1b[0m");

        write!(
            writer,
            "{dim}[{timestamp}] [{service}] [{color}{label}{reset}] ",
            dim = self.paint("\x1b[36m"),
            service = self.service_column(fields.component.as_deref()),
            color = self.paint(color),
        )?;
        writeln!(writer, "{}{reset}", fields.message)
    }
}

/// The message plus the optional `component` tag, pulled out of the event.
#[derive(Default)]
struct EventFields {
    message: String,
    component: Option<String>,
}

impl tracing::field::Visit for EventFields {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        let rendered = rendered
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(rendered);

        match field.name() {
            "message" => self.message = rendered,
            "component" => self.component = Some(rendered),
            _ => {}
        }
    }
}
