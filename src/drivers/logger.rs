use log::{Level, LevelFilter, Log, Metadata, Record};

/// Where formatted log lines go, usually the serial port.
pub type Sink = fn(&str);

pub struct KernelLogger {
    sink: Sink,
    level: LevelFilter,
}

impl KernelLogger {
    pub const fn new(sink: Sink, level: LevelFilter) -> Self {
        Self { sink, level }
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31mERROR\x1b[0m",
        Level::Warn => "\x1b[33m WARN\x1b[0m",
        Level::Info => "\x1b[32m INFO\x1b[0m",
        Level::Debug => "\x1b[34mDEBUG\x1b[0m",
        Level::Trace => "\x1b[90mTRACE\x1b[0m",
    }
}

impl Log for KernelLogger {
    fn enabled(&self, meta: &Metadata) -> bool {
        meta.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = alloc::format!(
            "[{}] {}: {}\n",
            level_str(record.level()),
            record.target(),
            record.args()
        );
        (self.sink)(&line);
    }

    fn flush(&self) {}
}

/// Install the storage logger. Fails if another logger is already set.
pub fn init(sink: Sink, level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let logger = alloc::boxed::Box::leak(alloc::boxed::Box::new(KernelLogger::new(sink, level)));
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}
