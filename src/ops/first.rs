use super::aggregate::{AggregateSubscriber, Aggregator};
use crate::{
  error::Error,
  flowable::Flowable,
  maybe::{Maybe, MaybeObserver},
};

/// The first value as a [`Maybe`]; the upstream is cancelled as soon as it
/// arrives. An empty stream completes empty.
#[derive(Clone)]
pub struct FirstElement<S> {
  source: S,
}

impl<S> FirstElement<S> {
  pub fn new(source: S) -> Self { FirstElement { source } }
}

impl<S: Flowable> Maybe for FirstElement<S> {
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    self.source.subscribe_actual(AggregateSubscriber::new(First, observer))
  }
}

struct First;

impl<T: Send + 'static> Aggregator<T> for First {
  type Output = T;

  fn next(&mut self, value: T) -> Result<Option<T>, Error> { Ok(Some(value)) }

  fn finish(self) -> Option<T> { None }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  };

  use crate::prelude::*;

  #[test]
  fn takes_the_first_value_and_cancels() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let c = cancelled.clone();
    flowable::range(1, 5)
      .do_on_cancel(move || c.store(true, Ordering::SeqCst))
      .first_element()
      .test()
      .assert_value(1);
    assert!(cancelled.load(Ordering::SeqCst));
  }

  #[test]
  fn empty_stream_completes_empty() {
    flowable::empty::<i32>().first_element().test().assert_complete();
    flowable::error::<i32>(Error::msg("x")).first_element().test().assert_error(&Error::msg("x"));
  }

  #[test]
  fn dispose_cancels_the_stream() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let c = cancelled.clone();
    let to = flowable::never::<i32>()
      .do_on_cancel(move || c.store(true, Ordering::SeqCst))
      .first_element()
      .test();
    to.dispose();
    assert!(cancelled.load(Ordering::SeqCst));
  }
}
