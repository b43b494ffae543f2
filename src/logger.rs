use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};
use std::str::FromStr;

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const GREEN: &str = "\x1b[32m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub struct Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let ts = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match record.level() {
                Level::Error => {
                    // Full line in red
                    println!("{}{} [ERROR] - {}{}", RED, ts, record.args(), RESET);
                }
                Level::Trace => {
                    // Full line dimmed
                    println!("{}{} [TRACE] - {}{}", DIM, ts, record.args(), RESET);
                }
                Level::Warn => {
                    println!("{}{} [WARN ]{} - {}", YELLOW, ts, RESET, record.args());
                }
                Level::Info => {
                    println!("{}{} [INFO ]{} - {}", BLUE, ts, RESET, record.args());
                }
                Level::Debug => {
                    println!("{}{} [DEBUG]{} - {}", GREEN, ts, RESET, record.args());
                }
            }
        }
    }

    fn flush(&self) {}
}

pub static LOGGER: Logger = Logger;

/// Installs `LOGGER` as the global `log` sink and sets the max level from
/// a config-file level name (`error`, `warn`, `info`, `debug`, `trace`).
/// An unrecognized name falls back to `info` rather than failing startup.
pub fn init(level_name: &str) {
    let level = LevelFilter::from_str(level_name).unwrap_or(LevelFilter::Info);
    log::set_max_level(level);
    let _ = log::set_logger(&LOGGER);
}
