// Licensed under the Apache-2.0 license

//! Crate-wide support types.
//!
//! Drivers in this crate are generic over a [`Logger`] so that firmware can
//! route diagnostics to a UART, an RTT channel or nowhere at all. The default
//! type parameter is always [`NoOpLogger`], which compiles down to nothing.

use core::fmt;

/// Severity attached to each log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Sink for driver diagnostics.
///
/// Only [`Logger::log`] is required. Records are passed as
/// [`fmt::Arguments`] so nothing is formatted unless the sink wants it.
pub trait Logger {
    fn log(&mut self, level: LogLevel, args: fmt::Arguments<'_>);

    fn error(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    fn warn(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    fn info(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    fn debug(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }
}

/// Logger that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    #[inline(always)]
    fn log(&mut self, _level: LogLevel, _args: fmt::Arguments<'_>) {}
}

/// Forwards records to the `log` facade under the `serbus_i2c` target.
#[cfg(feature = "log")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

#[cfg(feature = "log")]
impl Logger for LogFacade {
    fn log(&mut self, level: LogLevel, args: fmt::Arguments<'_>) {
        let level = match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        };
        log::log!(target: "serbus_i2c", level, "{}", args);
    }
}

impl<L: Logger + ?Sized> Logger for &mut L {
    fn log(&mut self, level: LogLevel, args: fmt::Arguments<'_>) {
        (**self).log(level, args);
    }
}
