use std::sync::Arc;

use super::aggregate::{AggregateSubscriber, Aggregator};
use crate::{
  error::Error,
  flowable::Flowable,
  maybe::{Maybe, MaybeObserver},
};

type Accumulate<C, T> = Arc<dyn Fn(&mut C, T) -> Result<(), Error> + Send + Sync>;

/// Collects every value into a container built by `init` for each
/// subscription. A failing accumulator cancels the upstream and becomes the
/// outcome.
pub struct Collect<S: Flowable, I, C> {
  source: S,
  init: I,
  accumulate: Accumulate<C, S::Item>,
}

impl<S: Flowable, I, C> Collect<S, I, C> {
  pub fn new<F>(source: S, init: I, accumulate: F) -> Self
  where
    F: Fn(&mut C, S::Item) -> Result<(), Error> + Send + Sync + 'static,
  {
    Collect { source, init, accumulate: Arc::new(accumulate) }
  }
}

impl<S: Flowable + Clone, I: Clone, C> Clone for Collect<S, I, C> {
  fn clone(&self) -> Self {
    let accumulate = self.accumulate.clone();
    Collect { source: self.source.clone(), init: self.init.clone(), accumulate }
  }
}

impl<S, I, C> Maybe for Collect<S, I, C>
where
  S: Flowable,
  I: Fn() -> C + Send + Sync + 'static,
  C: Send + 'static,
{
  type Item = C;

  fn subscribe_actual<O: MaybeObserver<C>>(self, observer: O) {
    let collector = Collector { container: (self.init)(), accumulate: self.accumulate };
    self.source.subscribe_actual(AggregateSubscriber::new(collector, observer))
  }
}

struct Collector<C, T> {
  container: C,
  accumulate: Accumulate<C, T>,
}

impl<C: Send + 'static, T: Send + 'static> Aggregator<T> for Collector<C, T> {
  type Output = C;

  fn next(&mut self, value: T) -> Result<Option<C>, Error> {
    (self.accumulate)(&mut self.container, value)?;
    Ok(None)
  }

  fn finish(self) -> Option<C> { Some(self.container) }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  };

  use crate::prelude::*;

  #[test]
  fn collects_into_a_fresh_container_per_subscription() {
    let collect = flowable::range(1, 3).collect(Vec::new, |acc, v| acc.push(v));
    collect.clone().test().assert_value(vec![1, 2, 3]);
    collect.test().assert_value(vec![1, 2, 3]);
  }

  #[test]
  fn empty_stream_yields_the_empty_container() {
    flowable::empty::<i32>().to_list().test().assert_value(vec![]);
  }

  #[test]
  fn accumulator_failure_cancels_the_upstream() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let c = cancelled.clone();
    flowable::range(1, 10)
      .do_on_cancel(move || c.store(true, Ordering::SeqCst))
      .try_collect(Vec::new, |acc: &mut Vec<i32>, v| {
        if v == 3 {
          return Err(Error::msg("three"));
        }
        acc.push(v);
        Ok(())
      })
      .test()
      .assert_error(&Error::msg("three"));
    assert!(cancelled.load(Ordering::SeqCst));
  }
}
