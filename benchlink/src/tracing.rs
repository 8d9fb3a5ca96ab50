//! Tracing setup for the console and the supervisor it hosts.
//!
//! Call [`init_journald_or_stdout`] once at startup. Everything else in the
//! crate uses `use crate::tracing::prelude::*` to reach the level macros.

use std::env;
use std::fmt;

use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Install the global subscriber for the console process.
///
/// A console started by systemd inherits `JOURNAL_STREAM` and logs to the
/// journal. Run from a terminal, it writes compact lines to stdout, filtered
/// by `RUST_LOG` (default INFO). If the journal socket cannot be opened the
/// stdout path is used and the failure reported there.
pub fn init_journald_or_stdout() {
    if env::var_os("JOURNAL_STREAM").is_none() {
        use_stdout();
        return;
    }

    match tracing_journald::layer() {
        Ok(layer) => tracing_subscriber::registry().with(layer).init(),
        Err(e) => {
            use_stdout();
            warn!(error = %e, "journald unavailable, logging to stdout");
        }
    }
}

fn use_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().event_format(CompactFormatter))
        .init();
}

/// One line per event: `time LEVEL module: message key=value ...`.
///
/// The `benchlink::` prefix is dropped from targets inside this crate.
struct CompactFormatter;

#[derive(Default)]
struct Fields {
    message: String,
    pairs: Vec<(&'static str, String)>,
}

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.pairs.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.pairs.push((field.name(), format!("{:?}", value)));
        }
    }
}

impl<S, N> FormatEvent<S, N> for CompactFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let mut fields = Fields::default();
        event.record(&mut fields);

        LocalTimer.format_time(&mut writer)?;

        let level = *event.metadata().level();
        let color = match level {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            tracing::Level::DEBUG => "\x1b[34m",
            tracing::Level::TRACE => "\x1b[35m",
        };
        write!(writer, " {}{:<5}\x1b[0m ", color, level.as_str())?;

        let target = event.metadata().target();
        let target = target.strip_prefix("benchlink::").unwrap_or(target);
        write!(writer, "{}: {}", target, fields.message)?;

        for (key, value) in fields.pairs.iter().filter(|(k, _)| !k.starts_with("log.")) {
            write!(writer, " \x1b[90m{}={}\x1b[0m", key, value)?;
        }

        writeln!(writer)
    }
}

// Local wall-clock time to the second; falls back to UTC when the local
// offset cannot be determined (e.g. multi-threaded startup on some platforms).
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| fmt::Error)?;
        write!(w, "{}", formatted)
    }
}
