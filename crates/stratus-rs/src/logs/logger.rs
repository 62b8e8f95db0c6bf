//! Process-wide logger configuration.
//!
//! Structured line format: timestamp, level, target, message. Controlled by
//! `RUST_LOG` (default `info`); `NO_COLOR` disables ANSI styling. Access
//! records go through the `access` target so sinks can split them from
//! diagnostics.

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Initializes the global logger. Safe to call more than once; only the
/// first call wins.
pub fn configure_logger() {
    let use_color = std::env::var_os("NO_COLOR").is_none();

    let mut builder = Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder
        .format(move |buf, record| {
            let level = record.level();
            let level_str = if use_color {
                match level {
                    log::Level::Error => "\x1b[31mERROR\x1b[0m",
                    log::Level::Warn => "\x1b[33mWARN \x1b[0m",
                    log::Level::Info => "\x1b[32mINFO \x1b[0m",
                    log::Level::Debug => "\x1b[36mDEBUG\x1b[0m",
                    log::Level::Trace => "\x1b[35mTRACE\x1b[0m",
                }
                .to_string()
            } else {
                format!("{:5}", level)
            };
            writeln!(
                buf,
                "{} {} [{}] {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                level_str,
                record.target(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env();

    // Ignore the error if a logger is already installed (tests).
    let _ = builder.try_init();
}
