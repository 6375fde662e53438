use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use crate::{
  error::Error,
  flowable::Flowable,
  function::RxPredicate,
  hooks,
  subscriber::Subscriber,
  subscription::{FusedQueue, FusionMode, QueueSubscription, Subscription, Upstream},
};

/// Emits only the values the predicate accepts; every rejected value is
/// replaced by a `request(1)` so the downstream demand is still met.
#[derive(Clone)]
pub struct Filter<S, F> {
  pub source: S,
  pub predicate: F,
}

impl<S, F> Filter<S, F> {
  pub fn new(source: S, predicate: F) -> Self { Filter { source, predicate } }
}

impl<S, F> Flowable for Filter<S, F>
where
  S: Flowable,
  F: RxPredicate<S::Item>,
{
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    self.source.subscribe_actual(FilterSubscriber {
      downstream: Some(downstream),
      predicate: Arc::new(self.predicate),
      upstream: None,
    })
  }
}

pub struct FilterSubscriber<O, F> {
  downstream: Option<O>,
  predicate: Arc<F>,
  upstream: Option<Arc<dyn Subscription>>,
}

impl<T, O, F> Subscriber<T> for FilterSubscriber<O, F>
where
  T: Send + 'static,
  F: RxPredicate<T>,
  O: Subscriber<T>,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let Some(downstream) = self.downstream.as_mut() else {
      upstream.cancel();
      return;
    };
    self.upstream = Some(upstream.clone().into_shared());
    let handed = match upstream {
      Upstream::Fuseable(queue) => Upstream::Fuseable(Arc::new(FilterQueue {
        upstream: queue,
        predicate: self.predicate.clone(),
        async_mode: AtomicBool::new(false),
      })),
      Upstream::Plain(plain) => Upstream::Plain(plain),
    };
    downstream.on_subscribe(handed);
  }

  fn on_next(&mut self, value: T) {
    let Some(downstream) = self.downstream.as_mut() else { return };
    match self.predicate.test(&value) {
      Ok(true) => downstream.on_next(value),
      Ok(false) => {
        if let Some(upstream) = &self.upstream {
          upstream.request(1);
        }
      }
      Err(err) => {
        if let Some(upstream) = self.upstream.take() {
          upstream.cancel();
        }
        if let Some(downstream) = self.downstream.take() {
          downstream.on_error(err);
        }
      }
    }
  }

  fn on_error(self, err: Error) {
    match self.downstream {
      Some(downstream) => downstream.on_error(err),
      None => hooks::on_undeliverable(err),
    }
  }

  fn on_complete(self) {
    if let Some(downstream) = self.downstream {
      downstream.on_complete();
    }
  }

  fn on_available(&mut self) {
    if let Some(downstream) = self.downstream.as_mut() {
      downstream.on_available();
    }
  }
}

struct FilterQueue<T, F> {
  upstream: Arc<dyn QueueSubscription<T>>,
  predicate: Arc<F>,
  async_mode: AtomicBool,
}

impl<T: Send + 'static, F: RxPredicate<T>> Subscription for FilterQueue<T, F> {
  fn request(&self, n: u64) { self.upstream.request(n) }

  fn cancel(&self) { self.upstream.cancel() }
}

impl<T: Send + 'static, F: RxPredicate<T>> FusedQueue<T> for FilterQueue<T, F> {
  fn poll(&self) -> Result<Option<T>, Error> {
    loop {
      let Some(value) = self.upstream.poll()? else { return Ok(None) };
      if self.predicate.test(&value)? {
        return Ok(Some(value));
      }
      if self.async_mode.load(Ordering::Relaxed) {
        self.upstream.request(1);
      }
    }
  }

  fn is_empty(&self) -> bool { self.upstream.is_empty() }

  fn clear(&self) { self.upstream.clear() }

  fn size(&self) -> usize { self.upstream.size() }
}

impl<T: Send + 'static, F: RxPredicate<T>> QueueSubscription<T> for FilterQueue<T, F> {
  fn request_fusion(&self, mode: FusionMode) -> FusionMode {
    if mode.is_boundary() {
      return FusionMode::NONE;
    }
    let established = self.upstream.request_fusion(mode);
    self.async_mode.store(established == FusionMode::ASYNC, Ordering::Relaxed);
    established
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  };

  use crate::prelude::*;

  #[test]
  fn keeps_matching_values() {
    flowable::range(1, 6).filter(|v| v % 2 == 0).test().assert_result(&[2, 4, 6]);
  }

  #[test]
  fn rejected_values_are_replenished() {
    let requested = Arc::new(AtomicU64::new(0));
    let r = requested.clone();
    let ts = flowable::range(1, 10)
      .do_on_request(move |n| {
        r.fetch_add(n, Ordering::SeqCst);
      })
      .filter(|v| v % 3 == 0)
      .test_with(2);
    ts.assert_values(&[3, 6]).assert_not_complete();
    assert_eq!(requested.load(Ordering::SeqCst), 6);
  }

  #[test]
  fn fused_filter_matches_plain_filter() {
    let fused = TestSubscriber::with_fusion(FusionMode::ANY);
    flowable::range(1, 10).filter(|v| v % 4 == 1).subscribe_with(fused.clone());
    fused.assert_fusion_mode(FusionMode::SYNC).assert_result(&[1, 5, 9]);

    flowable::range(1, 10).hide().filter(|v| v % 4 == 1).test().assert_result(&[1, 5, 9]);
  }

  #[test]
  fn fuses_through_map_with_async_buffer() {
    let ts = TestSubscriber::with_fusion(FusionMode::ANY);
    flowable::range(1, 5)
      .hide()
      .on_backpressure_buffer()
      .filter(|v| *v != 3)
      .map(|v| v * 10)
      .subscribe_with(ts.clone());
    ts.assert_fusion_mode(FusionMode::ASYNC).assert_result(&[10, 20, 40, 50]);
  }

  #[test]
  fn failing_predicate_terminates_once() {
    flowable::range(1, 5)
      .try_filter(|v| if *v == 2 { Err(Error::msg("bad")) } else { Ok(true) })
      .test()
      .assert_failure(&Error::msg("bad"), &[1]);
  }
}
