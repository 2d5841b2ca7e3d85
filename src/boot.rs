use chrono::{DateTime, Local};
use log::LevelFilter;
use std::io::{self, Write};

use env_logger::{Builder, Target};

/// Environment variable naming a log file. Without it logs go to stderr.
pub const LOG_FILE_ENV: &str = "PYLONMON_LOG_FILE";

/// Logger setup shared by every entry point.
pub fn init_common() {
    if let Ok(path) = std::env::var(LOG_FILE_ENV) {
        if let Err(err) = init_file_logger(&path) {
            eprintln!("Failed to initialize file logger at '{path}': {err}");
            env_logger::init();
        }
    } else {
        env_logger::init();
    }
}

fn init_file_logger(path: &str) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(buf, "{}", log_line(Local::now(), record))
        })
        .target(Target::Pipe(Box::new(file)))
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("pylonmon {} logging to {path}", env!("CARGO_PKG_VERSION"));

    Ok(())
}

fn log_line(now: DateTime<Local>, record: &log::Record) -> String {
    format!(
        "{} {:<5} {}: {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.target(),
        record.args()
    )
}
