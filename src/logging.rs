//! Pluggable logging sink.
//!
//! The printk/logging facility is an external collaborator: this crate only defines the seam.
//! Mirrors a `debug!`/`info!`/`warn!` macro shape, but threads an explicit sink
//! instead of a hidden module static, per the no-hidden-state design note.

use core::fmt::Arguments;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Receives formatted log lines from the lifecycle engine.
///
/// Implementations are expected to be cheap and non-blocking (this is called from inside
/// suspend/resume critical sections).
pub trait LogSink {
    fn log(&self, level: LogLevel, args: Arguments<'_>);
}

/// Discards everything. Used when the embedder wires no sink.
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: LogLevel, _args: Arguments<'_>) {}
}

#[macro_export]
macro_rules! hv_log {
    ($sink:expr, $level:expr, $($arg:tt)*) => {
        $crate::logging::LogSink::log($sink, $level, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! hv_debug {
    ($sink:expr, $($arg:tt)*) => {
        $crate::hv_log!($sink, $crate::logging::LogLevel::Debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! hv_info {
    ($sink:expr, $($arg:tt)*) => {
        $crate::hv_log!($sink, $crate::logging::LogLevel::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! hv_warn {
    ($sink:expr, $($arg:tt)*) => {
        $crate::hv_log!($sink, $crate::logging::LogLevel::Warn, $($arg)*)
    };
}

#[macro_export]
macro_rules! hv_error {
    ($sink:expr, $($arg:tt)*) => {
        $crate::hv_log!($sink, $crate::logging::LogLevel::Error, $($arg)*)
    };
}
