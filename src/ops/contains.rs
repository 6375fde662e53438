use super::aggregate::{AggregateSubscriber, Aggregator};
use crate::{
  error::Error,
  flowable::Flowable,
  maybe::{Maybe, MaybeObserver},
};

/// `true` at the first value equal to `value`, `false` once the stream is
/// exhausted without one.
pub struct Contains<S: Flowable> {
  source: S,
  value: S::Item,
}

impl<S: Flowable> Contains<S> {
  pub fn new(source: S, value: S::Item) -> Self { Contains { source, value } }
}

impl<S: Flowable + Clone> Clone for Contains<S>
where
  S::Item: Clone,
{
  fn clone(&self) -> Self { Contains { source: self.source.clone(), value: self.value.clone() } }
}

impl<S: Flowable> Maybe for Contains<S>
where
  S::Item: PartialEq,
{
  type Item = bool;

  fn subscribe_actual<O: MaybeObserver<bool>>(self, observer: O) {
    self.source.subscribe_actual(AggregateSubscriber::new(Search(self.value), observer))
  }
}

struct Search<T>(T);

impl<T: PartialEq + Send + 'static> Aggregator<T> for Search<T> {
  type Output = bool;

  fn next(&mut self, value: T) -> Result<Option<bool>, Error> {
    Ok((value == self.0).then_some(true))
  }

  fn finish(self) -> Option<bool> { Some(false) }
}
