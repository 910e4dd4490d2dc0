//! Logging for Handoff, forwarded to the host.
//!
//! The host registers a [`Logger`] once with [`set_logger`]; from then on every record
//! emitted through the `log` facade reaches it as one formatted line. Records at debug
//! and trace level are forwarded only when they come from `handoff` modules, so
//! dependencies cannot flood the host console. Info and above pass through from
//! anywhere.
//!
//! The crate's [`trace!`](crate::trace), [`debug!`](crate::debug), [`info!`](crate::info),
//! [`warn!`](crate::warn) and [`error!`](crate::error) macros prefix each message with the
//! open [`LogContext`], giving lines such as `[Handoff][MigrationManager] migration.started`.
//! Every `#[handoff_export]` method opens a context named after its type. The context
//! lives in a tokio task-local while a task is running, so it survives `.await`, and
//! falls back to a thread-local for plain synchronous callers.

use std::cell::RefCell;
use std::{sync::Arc, sync::OnceLock};

thread_local! {
    static THREAD_LOG_CONTEXT: RefCell<Option<String>> = const { RefCell::new(None) };
}

tokio::task_local! {
    /// Task-local logging context, used when the caller runs inside a tokio task.
    pub static LOG_CONTEXT: RefCell<Option<String>>;
}

/// Host-side log sink.
///
/// Every record emitted through the `log` facade inside Handoff is forwarded to the
/// registered implementation. In a browser host this is usually a thin bridge to
/// `console.*`; in tests any Rust type works.
///
/// ```rust
/// use handoff::primitives::logger::{LogLevel, Logger};
///
/// struct ConsoleLogger;
///
/// impl Logger for ConsoleLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         println!("[{level:?}] {message}");
///     }
/// }
/// ```
#[uniffi::export(with_foreign)]
pub trait Logger: Sync + Send {
    /// Receives one formatted log line.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a forwarded log line.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum LogLevel {
    /// Very detailed tracing output.
    Trace,
    /// Debugging information.
    Debug,
    /// Progress of normal operation.
    Info,
    /// Something unexpected that did not stop the operation.
    Warn,
    /// A failed operation.
    Error,
}

/// Bridges the `log` crate to the registered [`Logger`].
struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !is_forwarded(record.level(), record.module_path()) {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(log_level(record.level()), format!("{}", record.args()));
        } else {
            eprintln!("Logger not set: {}", record.args());
        }
    }

    fn flush(&self) {}
}

/// Debug and trace records are forwarded only from `handoff` modules.
fn is_forwarded(level: log::Level, module_path: Option<&str>) -> bool {
    let is_record_from_handoff =
        module_path.is_some_and(|module_path| module_path.starts_with("handoff"));
    let is_debug_or_trace_level = level == log::Level::Debug || level == log::Level::Trace;
    !is_debug_or_trace_level || is_record_from_handoff
}

const fn log_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Registers the host logger. Only the first call has an effect.
#[allow(clippy::module_name_repetitions)]
#[uniffi::export]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        eprintln!("Logger already set");
        return;
    }

    if let Err(e) = init_logger() {
        eprintln!("Failed to install the log facade: {e}");
    }
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    static LOGGER: ForeignLogger = ForeignLogger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

/// Logs a trace-level message prefixed with the current [`LogContext`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        if let Some(ctx) = $crate::primitives::logger::get_context() {
            log::trace!("{} {}", ctx, format_args!($($arg)*))
        } else {
            log::trace!($($arg)*)
        }
    };
}

/// Logs a debug-level message prefixed with the current [`LogContext`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if let Some(ctx) = $crate::primitives::logger::get_context() {
            log::debug!("{} {}", ctx, format_args!($($arg)*))
        } else {
            log::debug!($($arg)*)
        }
    };
}

/// Logs an info-level message prefixed with the current [`LogContext`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        if let Some(ctx) = $crate::primitives::logger::get_context() {
            log::info!("{} {}", ctx, format_args!($($arg)*))
        } else {
            log::info!($($arg)*)
        }
    };
}

/// Logs a warning-level message prefixed with the current [`LogContext`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        if let Some(ctx) = $crate::primitives::logger::get_context() {
            log::warn!("{} {}", ctx, format_args!($($arg)*))
        } else {
            log::warn!($($arg)*)
        }
    };
}

/// Logs an error-level message prefixed with the current [`LogContext`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        if let Some(ctx) = $crate::primitives::logger::get_context() {
            log::error!("{} {}", ctx, format_args!($($arg)*))
        } else {
            log::error!($($arg)*)
        }
    };
}

enum LogContextStorage {
    TaskLocal,
    ThreadLocal,
}

/// Scope guard that sets the logging prefix and restores the previous one on drop.
///
/// ```rust
/// use handoff::primitives::logger::{get_context, LogContext};
///
/// {
///     let _ctx = LogContext::new("MigrationManager");
///     assert_eq!(get_context().as_deref(), Some("[Handoff][MigrationManager]"));
/// }
/// assert_eq!(get_context(), None);
/// ```
pub struct LogContext {
    previous: Option<String>,
    storage: LogContextStorage,
}

impl LogContext {
    /// Opens a context for `module` until the guard is dropped.
    #[must_use]
    pub fn new(module: &str) -> Self {
        let new_context = Some(format!("[Handoff][{module}]"));

        // task_local survives .await points; thread_local covers plain sync callers.
        match LOG_CONTEXT.try_with(|ctx| ctx.replace(new_context.clone())) {
            Ok(previous) => Self {
                previous,
                storage: LogContextStorage::TaskLocal,
            },
            Err(_) => Self {
                previous: THREAD_LOG_CONTEXT.with(|ctx| ctx.replace(new_context)),
                storage: LogContextStorage::ThreadLocal,
            },
        }
    }
}

impl Drop for LogContext {
    fn drop(&mut self) {
        match self.storage {
            LogContextStorage::TaskLocal => {
                let _ = LOG_CONTEXT.try_with(|ctx| {
                    ctx.borrow_mut().clone_from(&self.previous);
                });
            }
            LogContextStorage::ThreadLocal => {
                THREAD_LOG_CONTEXT.with(|ctx| {
                    ctx.borrow_mut().clone_from(&self.previous);
                });
            }
        }
    }
}

/// Current logging prefix, if a [`LogContext`] is open.
#[must_use]
pub fn get_context() -> Option<String> {
    LOG_CONTEXT
        .try_with(|ctx| ctx.borrow().clone())
        .unwrap_or_else(|_| THREAD_LOG_CONTEXT.with(|ctx| ctx.borrow().clone()))
}
