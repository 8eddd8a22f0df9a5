//! stderr backend for the `log` facade.
//!
//! Lines read `LEVEL:thread:message`, so tracker output from the processing
//! loop shows up as `INFO:main:...`.

use std::io::Write;
use std::thread;

use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let current = thread::current();
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "{}:{}:{}",
            record.level(),
            current.name().unwrap_or("?"),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Map `-v` count to a level filter: warn, info, debug, trace.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init(verbosity: u8) -> anyhow::Result<()> {
    log::set_logger(&LOGGER).map_err(|e| anyhow::anyhow!("logger already set: {e}"))?;
    log::set_max_level(level_for(verbosity));
    Ok(())
}
