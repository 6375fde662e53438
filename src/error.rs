//! Error types carried by `on_error` and by the blocking entry points.
//!
//! [`Error`] is cheap to clone so a single failure can be fanned out to
//! several consumers, and it implements `PartialEq` so tests can assert on
//! the exact terminal signal.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::hooks;

/// The error type of every stream in this crate.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
  /// A plain message, mostly produced by user code via [`Error::msg`].
  #[error("{0}")]
  Message(Arc<str>),

  /// Any foreign error, shared behind an `Arc`.
  #[error("{0}")]
  Custom(Arc<dyn std::error::Error + Send + Sync>),

  /// No signal arrived within the configured window.
  #[error("the source did not signal an event for {0:?} and has been terminated")]
  Timeout(Duration),

  /// A producer had a value to emit but the consumer had not requested it.
  #[error("missing backpressure: {0}")]
  MissingBackpressure(&'static str),

  /// The signal protocol was used incorrectly.
  #[error(transparent)]
  Protocol(#[from] ProtocolViolation),

  /// Several failures that all reached the same consumer.
  #[error(transparent)]
  Composite(#[from] CompositeError),

  /// A blocking call was interrupted while parked.
  #[error("interrupted while waiting for a terminal signal")]
  Interrupted,

  /// A blocking call required a value but the source completed empty.
  #[error("the source completed without emitting a value")]
  NoSuchElement,
}

impl Error {
  pub fn msg(message: impl Into<String>) -> Self { Error::Message(Arc::from(message.into())) }

  pub fn custom<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Error::Custom(Arc::new(err))
  }

  /// Combines two failures into a [`CompositeError`], keeping arrival order.
  pub fn combine(first: Error, second: Error) -> Self {
    Error::Composite(CompositeError::new([first, second]))
  }

  /// Short, stable label for logging.
  pub fn as_label(&self) -> &'static str {
    match self {
      Error::Message(_) => "message",
      Error::Custom(_) => "custom",
      Error::Timeout(_) => "timeout",
      Error::MissingBackpressure(_) => "missing_backpressure",
      Error::Protocol(_) => "protocol",
      Error::Composite(_) => "composite",
      Error::Interrupted => "interrupted",
      Error::NoSuchElement => "no_such_element",
    }
  }
}

impl PartialEq for Error {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Error::Message(a), Error::Message(b)) => a == b,
      (Error::Custom(a), Error::Custom(b)) => Arc::ptr_eq(a, b),
      (Error::Timeout(a), Error::Timeout(b)) => a == b,
      (Error::MissingBackpressure(a), Error::MissingBackpressure(b)) => a == b,
      (Error::Protocol(a), Error::Protocol(b)) => a == b,
      (Error::Composite(a), Error::Composite(b)) => a == b,
      (Error::Interrupted, Error::Interrupted) => true,
      (Error::NoSuchElement, Error::NoSuchElement) => true,
      _ => false,
    }
  }
}

impl From<&str> for Error {
  fn from(message: &str) -> Self { Error::msg(message) }
}

impl From<String> for Error {
  fn from(message: String) -> Self { Error::msg(message) }
}

/// Misuse of the subscription protocol. Reported to the error hook, never
/// delivered as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolViolation {
  #[error("request(n) called with n == 0")]
  NonPositiveRequest,
  #[error("a subscription was already set")]
  SubscriptionAlreadySet,
  #[error("a queue rejected a value because it was full")]
  QueueOverflow,
  #[error("more values were produced than requested")]
  MoreProducedThanRequested,
}

/// An ordered list of at least two failures.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeError {
  errors: Vec<Error>,
}

impl CompositeError {
  /// Builds a composite, flattening nested composites in place.
  pub fn new(errors: impl IntoIterator<Item = Error>) -> Self {
    let mut flat = Vec::new();
    for err in errors {
      match err {
        Error::Composite(inner) => flat.extend(inner.errors),
        other => flat.push(other),
      }
    }
    CompositeError { errors: flat }
  }

  pub fn errors(&self) -> &[Error] { &self.errors }

  pub fn len(&self) -> usize { self.errors.len() }

  pub fn is_empty(&self) -> bool { self.errors.is_empty() }

  pub fn into_errors(self) -> Vec<Error> { self.errors }
}

impl fmt::Display for CompositeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} errors occurred: [", self.errors.len())?;
    for (idx, err) in self.errors.iter().enumerate() {
      if idx > 0 {
        f.write_str("; ")?;
      }
      write!(f, "{err}")?;
    }
    f.write_str("]")
  }
}

impl std::error::Error for CompositeError {}

/// Collects errors for coordinators that either fail fast or delay errors
/// until every source has finished.
///
/// Once [`terminate`](Self::terminate) ran, later errors are undeliverable
/// and go to the error hook.
#[derive(Default)]
pub(crate) struct ErrorCollector {
  slot: Mutex<Collected>,
}

#[derive(Default)]
enum Collected {
  #[default]
  Empty,
  Pending(Error),
  Terminated,
}

impl ErrorCollector {
  /// Adds `err`; returns `false` (after routing it to the hook) if the
  /// collector was already terminated.
  pub fn add(&self, err: Error) -> bool {
    let mut slot = self.slot.lock();
    match std::mem::take(&mut *slot) {
      Collected::Empty => *slot = Collected::Pending(err),
      Collected::Pending(prev) => *slot = Collected::Pending(Error::combine(prev, err)),
      Collected::Terminated => {
        *slot = Collected::Terminated;
        drop(slot);
        hooks::on_undeliverable(err);
        return false;
      }
    }
    true
  }

  pub fn has_error(&self) -> bool { matches!(*self.slot.lock(), Collected::Pending(_)) }

  pub fn is_terminated(&self) -> bool { matches!(*self.slot.lock(), Collected::Terminated) }

  /// Takes the accumulated error and refuses further additions.
  pub fn terminate(&self) -> Option<Error> {
    match std::mem::replace(&mut *self.slot.lock(), Collected::Terminated) {
      Collected::Pending(err) => Some(err),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::capture_undeliverable;

  #[test]
  fn composite_flattens_nested() {
    let inner = Error::combine(Error::msg("a"), Error::msg("b"));
    let outer = CompositeError::new([inner, Error::msg("c")]);
    assert_eq!(outer.errors(), &[Error::msg("a"), Error::msg("b"), Error::msg("c")]);
    assert_eq!(outer.to_string(), "3 errors occurred: [a; b; c]");
  }

  #[test]
  fn custom_errors_compare_by_identity() {
    let io = Error::custom(std::io::Error::new(std::io::ErrorKind::Other, "io"));
    assert_eq!(io, io.clone());
    assert_ne!(io, Error::custom(std::io::Error::new(std::io::ErrorKind::Other, "io")));
  }

  #[test]
  fn collector_combines_then_rejects_after_terminate() {
    let ((), routed) = capture_undeliverable(|| {
      let errors = ErrorCollector::default();
      assert!(errors.add(Error::msg("first")));
      assert!(errors.add(Error::msg("second")));
      assert_eq!(errors.terminate(), Some(Error::combine(Error::msg("first"), Error::msg("second"))));
      assert!(!errors.add(Error::msg("late")));
      assert!(errors.is_terminated());
    });
    assert_eq!(routed, vec![Error::msg("late")]);
  }
}
