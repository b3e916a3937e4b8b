//! Script-visible leveled logging, layered over `tracing`.
//!
//! Levels are the numeric Python-style scale; they collapse onto the
//! five `tracing` levels when emitted. A script can raise its own
//! threshold (`set_level`) or mute everything at or below a level
//! (`disable`); the subscriber's global filter still applies on top.

use tracing::{Level, debug, error, info, level_filters::LevelFilter, trace, warn};

pub const TRACE: i64 = 5;
pub const DEBUG: i64 = 10;
pub const INFO: i64 = 20;
pub const NOTICE: i64 = 25;
pub const WARNING: i64 = 30;
pub const ERROR: i64 = 40;
pub const CRITICAL: i64 = 50;
pub const ALERT: i64 = 60;
pub const EMERG: i64 = 70;
pub const OFF: i64 = 10000;
pub const NOTSET: i64 = 0;

fn to_tracing_level(py_level: i64) -> Level {
    if py_level >= ERROR {
        Level::ERROR
    } else if py_level >= WARNING {
        Level::WARN
    } else if py_level >= INFO {
        Level::INFO
    } else if py_level >= DEBUG {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

fn to_py_level(filter: LevelFilter) -> i64 {
    if filter == LevelFilter::OFF {
        OFF
    } else if filter == LevelFilter::ERROR {
        ERROR
    } else if filter == LevelFilter::WARN {
        WARNING
    } else if filter == LevelFilter::INFO {
        INFO
    } else if filter == LevelFilter::DEBUG {
        DEBUG
    } else {
        TRACE
    }
}

#[derive(Debug)]
pub struct ULogging {
    task: String,
    enable_level: i64,
    disable_level: i64,
}

impl ULogging {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            enable_level: NOTSET,
            disable_level: NOTSET,
        }
    }

    /// The `tracing` level a message at `py_level` would be emitted at,
    /// or `None` if filtered out.
    fn enabled_level(&self, py_level: i64) -> Option<Level> {
        if py_level <= self.disable_level || py_level < self.enable_level {
            return None;
        }

        let level = to_tracing_level(py_level);
        if LevelFilter::current() < level {
            return None;
        }
        Some(level)
    }

    pub fn is_enabled_for(&self, py_level: i64) -> bool {
        self.enabled_level(py_level).is_some()
    }

    pub fn set_level(&mut self, py_level: i64) {
        self.enable_level = py_level;
    }

    /// Mute messages at or below `py_level`.
    pub fn disable(&mut self, py_level: i64) {
        self.disable_level = py_level;
    }

    pub fn get_effective_level(&self) -> i64 {
        self.enable_level.max(to_py_level(LevelFilter::current()))
    }

    pub fn log(&self, py_level: i64, message: &str) {
        let Some(level) = self.enabled_level(py_level) else {
            return;
        };

        let task = self.task.as_str();
        match level {
            Level::ERROR => error!(target: "script", task, "{message}"),
            Level::WARN => warn!(target: "script", task, "{message}"),
            Level::INFO => info!(target: "script", task, "{message}"),
            Level::DEBUG => debug!(target: "script", task, "{message}"),
            Level::TRACE => trace!(target: "script", task, "{message}"),
        }
    }

    pub fn trace(&self, message: &str) {
        self.log(TRACE, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(DEBUG, message);
    }

    pub fn info(&self, message: &str) {
        self.log(INFO, message);
    }

    pub fn notice(&self, message: &str) {
        self.log(NOTICE, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(WARNING, message);
    }

    pub fn error(&self, message: &str) {
        self.log(ERROR, message);
    }

    pub fn critical(&self, message: &str) {
        self.log(CRITICAL, message);
    }

    pub fn alert(&self, message: &str) {
        self.log(ALERT, message);
    }

    pub fn emerg(&self, message: &str) {
        self.log(EMERG, message);
    }

    /// Log at ERROR with the exception appended, `logging.exception`
    /// style.
    pub fn exception(&self, message: &str, error: &dyn std::fmt::Display) {
        let Some(level) = self.enabled_level(ERROR) else {
            return;
        };
        debug_assert_eq!(level, Level::ERROR);
        error!(target: "script", task = self.task.as_str(), exception = %error, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping_collapses_to_tracing_levels() {
        assert_eq!(to_tracing_level(EMERG), Level::ERROR);
        assert_eq!(to_tracing_level(ALERT), Level::ERROR);
        assert_eq!(to_tracing_level(CRITICAL), Level::ERROR);
        assert_eq!(to_tracing_level(ERROR), Level::ERROR);
        assert_eq!(to_tracing_level(WARNING), Level::WARN);
        assert_eq!(to_tracing_level(NOTICE), Level::INFO);
        assert_eq!(to_tracing_level(INFO), Level::INFO);
        assert_eq!(to_tracing_level(DEBUG), Level::DEBUG);
        assert_eq!(to_tracing_level(TRACE), Level::TRACE);
    }

    #[test]
    fn disable_mutes_at_and_below() {
        let mut log = ULogging::new("test/strip");
        log.disable(INFO);
        assert!(!log.is_enabled_for(INFO));
        assert!(!log.is_enabled_for(DEBUG));
        // Above the disable threshold still subject to enable level.
        log.set_level(ERROR);
        assert!(!log.is_enabled_for(WARNING));
        assert!(log.is_enabled_for(ERROR));
    }

    #[test]
    fn effective_level_tracks_enable_level() {
        let mut log = ULogging::new("test/strip");
        log.set_level(CRITICAL);
        assert!(log.get_effective_level() >= CRITICAL);
    }
}
