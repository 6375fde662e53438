//! Process-wide routing of undeliverable errors.
//!
//! An error is undeliverable when its consumer can no longer receive it:
//! the subscription was cancelled, or it already terminated. Such errors are
//! handed to the installed handler, or logged with `tracing` when none is
//! installed. They are never thrown on the thread that happened to produce
//! them.
//!
//! ```
//! use rxflow::{hooks, Error};
//!
//! let guard = hooks::install_error_handler(|err| eprintln!("dropped: {err}"));
//! hooks::on_undeliverable(Error::msg("late"));
//! drop(guard); // back to logging
//! ```

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::Error;

type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

static ERROR_HANDLER: Lazy<RwLock<Option<ErrorHandler>>> = Lazy::new(|| RwLock::new(None));

/// Installs `handler` for every undeliverable error in the process,
/// replacing any previous one.
pub fn set_error_handler<F>(handler: F)
where
  F: Fn(Error) + Send + Sync + 'static,
{
  *ERROR_HANDLER.write() = Some(Arc::new(handler));
}

/// Removes the installed handler; undeliverable errors are logged again.
pub fn reset_error_handler() { *ERROR_HANDLER.write() = None; }

pub fn has_error_handler() -> bool { ERROR_HANDLER.read().is_some() }

/// Installs `handler` until the returned guard is dropped.
#[must_use = "the handler is removed when the guard is dropped"]
pub fn install_error_handler<F>(handler: F) -> ErrorHandlerGuard
where
  F: Fn(Error) + Send + Sync + 'static,
{
  set_error_handler(handler);
  ErrorHandlerGuard { _priv: () }
}

/// Resets the error handler when dropped.
pub struct ErrorHandlerGuard {
  _priv: (),
}

impl Drop for ErrorHandlerGuard {
  fn drop(&mut self) { reset_error_handler(); }
}

/// Routes an error that has no live consumer.
///
/// The handler runs outside the registry lock, so it may itself install or
/// reset handlers.
pub fn on_undeliverable(err: Error) {
  let handler = ERROR_HANDLER.read().clone();
  match handler {
    Some(handler) => handler(err),
    None => tracing::error!(error = %err, kind = err.as_label(), "undeliverable error"),
  }
}
