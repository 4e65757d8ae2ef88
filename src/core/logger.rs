//! The Logger interface: `info|warn|error|verbose(msg)`, per spec §6.3.
//!
//! `ColoredLogger` mirrors the terminal-output style of
//! `examples/DecapodLabs-decapod/src/core/output.rs` (short, prefixed
//! lines) using the same `colored` crate the teacher depends on.

use colored::Colorize;

pub trait Logger: Send + Sync {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
    fn verbose(&self, msg: &str);
}

/// Human-facing logger for interactive CLI use.
pub struct ColoredLogger {
    verbose_enabled: bool,
}

impl ColoredLogger {
    pub fn new(verbose_enabled: bool) -> Self {
        Self { verbose_enabled }
    }
}

impl Logger for ColoredLogger {
    fn info(&self, msg: &str) {
        println!("{} {}", "info:".green().bold(), msg);
    }

    fn warn(&self, msg: &str) {
        eprintln!("{} {}", "warn:".yellow().bold(), msg);
    }

    fn error(&self, msg: &str) {
        eprintln!("{} {}", "error:".red().bold(), msg);
    }

    fn verbose(&self, msg: &str) {
        if self.verbose_enabled {
            println!("{} {}", "verbose:".dimmed(), msg.dimmed());
        }
    }
}

/// No-op logger for library embedding and tests.
#[derive(Debug, Default)]
pub struct SilentLogger;

impl SilentLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Logger for SilentLogger {
    fn info(&self, _msg: &str) {}
    fn warn(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
    fn verbose(&self, _msg: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_logger_does_nothing_observable() {
        let logger = SilentLogger::new();
        logger.info("hello");
        logger.warn("hello");
        logger.error("hello");
        logger.verbose("hello");
    }
}
