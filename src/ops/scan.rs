use std::sync::Arc;

use crate::{error::Error, flowable::Flowable, subscriber::Subscriber, subscription::Upstream};

/// Applies an accumulator to every value and emits each intermediate
/// result. Every subscription starts from its own clone of the seed.
#[derive(Clone)]
pub struct Scan<S, F, B> {
  source: S,
  seed: B,
  func: F,
}

impl<S, F, B> Scan<S, F, B> {
  pub fn new(source: S, seed: B, func: F) -> Self { Scan { source, seed, func } }
}

impl<S, F, B> Flowable for Scan<S, F, B>
where
  S: Flowable,
  B: Clone + Send + Sync + 'static,
  F: Fn(B, S::Item) -> B + Send + Sync + 'static,
{
  type Item = B;

  fn subscribe_actual<O: Subscriber<B>>(self, downstream: O) {
    self.source.subscribe_actual(ScanSubscriber {
      downstream,
      acc: Some(self.seed),
      func: Arc::new(self.func),
    })
  }
}

struct ScanSubscriber<O, F, B> {
  downstream: O,
  acc: Option<B>,
  func: Arc<F>,
}

impl<T, O, F, B> Subscriber<T> for ScanSubscriber<O, F, B>
where
  T: Send + 'static,
  B: Clone + Send + Sync + 'static,
  F: Fn(B, T) -> B + Send + Sync + 'static,
  O: Subscriber<B>,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    self.downstream.on_subscribe(Upstream::Plain(upstream.into_shared()))
  }

  fn on_next(&mut self, value: T) {
    let Some(acc) = self.acc.take() else { return };
    let next = (self.func)(acc, value);
    self.acc = Some(next.clone());
    self.downstream.on_next(next);
  }

  fn on_error(self, err: Error) { self.downstream.on_error(err) }

  fn on_complete(self) { self.downstream.on_complete() }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn emits_running_totals() {
    flowable::range(1, 4).scan(0, |acc, v| acc + v).test().assert_result(&[1, 3, 6, 10]);
  }

  #[test]
  fn each_subscription_starts_from_the_seed() {
    let source = flowable::range(1, 2).scan(String::new(), |acc, v| format!("{acc}{v}"));
    source.clone().test().assert_result(&["1".to_string(), "12".to_string()]);
    source.test().assert_result(&["1".to_string(), "12".to_string()]);
  }
}
