use super::aggregate::{AggregateSubscriber, Aggregator};
use crate::{
  error::Error,
  flowable::Flowable,
  maybe::{Maybe, MaybeObserver},
};

/// Folds the values pairwise with `func`, starting from the first one.
#[derive(Clone)]
pub struct Reduce<S, F> {
  source: S,
  func: F,
}

impl<S, F> Reduce<S, F> {
  pub fn new(source: S, func: F) -> Self { Reduce { source, func } }
}

impl<S, F> Maybe for Reduce<S, F>
where
  S: Flowable,
  F: Fn(S::Item, S::Item) -> S::Item + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    let folder = Folder { acc: None, func: self.func };
    self.source.subscribe_actual(AggregateSubscriber::new(folder, observer))
  }
}

struct Folder<T, F> {
  acc: Option<T>,
  func: F,
}

impl<T, F> Aggregator<T> for Folder<T, F>
where
  T: Send + 'static,
  F: Fn(T, T) -> T + Send + Sync + 'static,
{
  type Output = T;

  fn next(&mut self, value: T) -> Result<Option<T>, Error> {
    self.acc = Some(match self.acc.take() {
      Some(acc) => (self.func)(acc, value),
      None => value,
    });
    Ok(None)
  }

  fn finish(self) -> Option<T> { self.acc }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn folds_every_value() {
    flowable::range(1, 4).reduce(|a, b| a + b).test().assert_value(10);
    flowable::just(7).reduce(|a, b| a * b).test().assert_value(7);
  }

  #[test]
  fn empty_stream_has_no_result() {
    flowable::empty::<i32>().reduce(|a, b| a + b).test().assert_complete();
  }
}
