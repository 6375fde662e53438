use super::aggregate::{AggregateSubscriber, Aggregator};
use crate::{
  error::Error,
  flowable::Flowable,
  maybe::{Maybe, MaybeObserver},
};

/// The last value as a [`Maybe`], known once the stream completes.
#[derive(Clone)]
pub struct LastElement<S> {
  source: S,
}

impl<S> LastElement<S> {
  pub fn new(source: S) -> Self { LastElement { source } }
}

impl<S: Flowable> Maybe for LastElement<S> {
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    self.source.subscribe_actual(AggregateSubscriber::new(Last(None), observer))
  }
}

struct Last<T>(Option<T>);

impl<T: Send + 'static> Aggregator<T> for Last<T> {
  type Output = T;

  fn next(&mut self, value: T) -> Result<Option<T>, Error> {
    self.0 = Some(value);
    Ok(None)
  }

  fn finish(self) -> Option<T> { self.0 }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn keeps_the_last_value() {
    flowable::range(1, 5).last_element().test().assert_value(5);
    flowable::empty::<i32>().last_element().test().assert_complete();
  }

  #[test]
  fn an_error_discards_what_was_seen() {
    flowable::just(1)
      .concat_with(flowable::error(Error::msg("x")))
      .last_element()
      .test()
      .assert_error(&Error::msg("x"));
  }

  #[test]
  fn blocking_last_waits_for_completion() {
    assert_eq!(flowable::range(1, 3).blocking_last(), Ok(Some(3)));
    assert_eq!(flowable::empty::<i32>().blocking_first(), Ok(None));
  }
}
