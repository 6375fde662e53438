use crate::error::Error;

/// A signal turned into a value, as produced by
/// [`materialize`](crate::flowable::Flowable::materialize).
///
/// Every `Next` carries a value; absence is never a value, so equality is
/// plain equality of the payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<T> {
  Next(T),
  Error(Error),
  Complete,
}

impl<T> Notification<T> {
  pub fn is_next(&self) -> bool { matches!(self, Notification::Next(_)) }

  pub fn is_error(&self) -> bool { matches!(self, Notification::Error(_)) }

  pub fn is_complete(&self) -> bool { matches!(self, Notification::Complete) }

  /// True for `Error` and `Complete`.
  pub fn is_terminal(&self) -> bool { !self.is_next() }

  pub fn value(&self) -> Option<&T> {
    match self {
      Notification::Next(v) => Some(v),
      _ => None,
    }
  }

  pub fn into_value(self) -> Option<T> {
    match self {
      Notification::Next(v) => Some(v),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&Error> {
    match self {
      Notification::Error(e) => Some(e),
      _ => None,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Notification<U> {
    match self {
      Notification::Next(v) => Notification::Next(f(v)),
      Notification::Error(e) => Notification::Error(e),
      Notification::Complete => Notification::Complete,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn equality_follows_payload() {
    assert_eq!(Notification::Next(1), Notification::Next(1));
    assert_ne!(Notification::Next(1), Notification::Next(2));
    assert_ne!(Notification::Next(1), Notification::Complete);
    assert_eq!(Notification::<i32>::Error(Error::msg("x")), Notification::Error(Error::msg("x")));
    assert_eq!(Notification::Next(Some(1)), Notification::Next(Some(1)));
    assert_ne!(Notification::Next(None), Notification::Next(Some(1)));
  }

  #[test]
  fn accessors() {
    let n = Notification::Next(3);
    assert!(n.is_next() && !n.is_terminal());
    assert_eq!(n.value(), Some(&3));
    assert_eq!(n.map(|v| v * 2).into_value(), Some(6));
    let e = Notification::<()>::Error(Error::Interrupted);
    assert_eq!(e.error(), Some(&Error::Interrupted));
    assert!(Notification::<()>::Complete.is_terminal());
  }
}
