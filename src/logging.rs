//! The server log.
//!
//! Events go to `server_log` in the config directory (or stdout under
//! `--stdout`) as `HH:MM:SS[am|pm] [LEVEL] message` lines. The verbosity
//! flags set the default level; `RUST_LOG` still overrides it through the
//! env filter.

use std::sync::Arc;

use camino::Utf8PathBuf;
use color_eyre::Result;
use color_eyre::eyre::{Context, eyre};
use jiff::Zoned;
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

use crate::util::clock_stamp;

pub enum LogSink {
    Stdout,
    File(Utf8PathBuf),
}

pub fn init(sink: &LogSink, level: LevelFilter) -> Result<()> {
    let writer = match sink {
        LogSink::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogSink::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("Cannot open server log file \"{path}\""))?;
            BoxMakeWriter::new(Arc::new(file))
        }
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let layer = fmt::layer().event_format(ClockFormat).with_writer(writer);
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| eyre!("could not install the logger: {e}"))
}

/// Formats one event as a `HH:MM:SS[am|pm] [LEVEL] message` line.
struct ClockFormat;

impl<S, N> FormatEvent<S, N> for ClockFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        write!(
            writer,
            "{} [{}] ",
            clock_stamp(&Zoned::now()),
            event.metadata().level()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
