use log::{LevelFilter, Log, Metadata, Record};
use std::sync::OnceLock;

/// Stdout carries the frame stream, so everything human readable goes to
/// stderr.
struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:<5} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Installs the stderr logger at the level named by `FLOW_LOG`.
pub fn init() {
    let level = parse_level(std::env::var("FLOW_LOG").ok().as_deref());
    let logger = LOGGER.get_or_init(|| StderrLogger { level });
    match log::set_logger(logger) {
        Ok(()) => log::set_max_level(level),
        Err(err) => eprintln!("logger already installed: {err}"),
    }
}

fn parse_level(raw: Option<&str>) -> LevelFilter {
    raw.and_then(|raw| raw.trim().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_defaults_to_info() {
        assert_eq!(parse_level(None), LevelFilter::Info);
        assert_eq!(parse_level(Some("loud")), LevelFilter::Info);
        assert_eq!(parse_level(Some("debug")), LevelFilter::Debug);
        assert_eq!(parse_level(Some(" OFF ")), LevelFilter::Off);
    }
}
