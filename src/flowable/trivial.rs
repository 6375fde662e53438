use std::marker::PhantomData;

use crate::{
  error::Error,
  flowable::Flowable,
  subscriber::Subscriber,
  subscription::Upstream,
};

/// Never signals anything after `on_subscribe`.
pub struct Never<T>(PhantomData<fn() -> T>);

impl<T> Clone for Never<T> {
  fn clone(&self) -> Self { Never(PhantomData) }
}

pub fn never<T: Send + 'static>() -> Never<T> { Never(PhantomData) }

impl<T: Send + 'static> Flowable for Never<T> {
  type Item = T;

  fn subscribe_actual<S: Subscriber<T>>(self, mut subscriber: S) {
    subscriber.on_subscribe(Upstream::empty());
  }
}

/// Fails right after `on_subscribe`.
pub struct ErrorSource<T> {
  err: Error,
  _item: PhantomData<fn() -> T>,
}

impl<T> Clone for ErrorSource<T> {
  fn clone(&self) -> Self { ErrorSource { err: self.err.clone(), _item: PhantomData } }
}

pub fn error<T: Send + 'static>(err: Error) -> ErrorSource<T> { ErrorSource { err, _item: PhantomData } }

impl<T: Send + 'static> Flowable for ErrorSource<T> {
  type Item = T;

  fn subscribe_actual<S: Subscriber<T>>(self, mut subscriber: S) {
    subscriber.on_subscribe(Upstream::empty());
    subscriber.on_error(self.err);
  }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn never_stays_silent() { flowable::never::<i32>().test().assert_empty(); }

  #[test]
  fn error_fails_immediately() {
    flowable::error::<i32>(Error::msg("boom")).test().assert_failure(&Error::msg("boom"), &[]);
  }
}
