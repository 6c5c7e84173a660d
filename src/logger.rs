//! Logging sink used by the retry machinery.

/// Log target used by [`LogLogger`].
pub const LOG_TARGET: &str = "http_retry";

/// Where attempt progress and diagnostics go.
#[cfg_attr(test, mockall::automock)]
pub trait Logger: Send + Sync {
    fn debug(&self, msg: &str);
    fn warning(&self, msg: &str);
    fn exception(&self, msg: &str);
}

/// Forwards to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLogger;

impl Logger for LogLogger {
    fn debug(&self, msg: &str) {
        log::debug!(target: LOG_TARGET, "{}", msg);
    }

    fn warning(&self, msg: &str) {
        log::warn!(target: LOG_TARGET, "{}", msg);
    }

    fn exception(&self, msg: &str) {
        log::error!(target: LOG_TARGET, "{}", msg);
    }
}
