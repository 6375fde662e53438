use std::sync::{
  atomic::{AtomicBool, AtomicU64, Ordering},
  Arc,
};

use crate::{
  error::Error,
  flowable::Flowable,
  hooks,
  subscriber::Subscriber,
  subscription::{validate_request, Subscription, Upstream},
};

/// Emits at most `count` values, then cancels the upstream and completes.
///
/// Requests passed upstream are capped so the source never produces more
/// than `count` values in total.
#[derive(Clone)]
pub struct Take<S> {
  source: S,
  count: u64,
}

impl<S> Take<S> {
  pub fn new(source: S, count: u64) -> Self { Take { source, count } }
}

impl<S: Flowable> Flowable for Take<S> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    self.source.subscribe_actual(TakeSubscriber {
      downstream: Some(downstream),
      remaining: self.count,
      count: self.count,
      upstream: None,
      cancelled: Arc::default(),
    })
  }
}

struct TakeSubscriber<O> {
  downstream: Option<O>,
  remaining: u64,
  count: u64,
  upstream: Option<Arc<dyn Subscription>>,
  cancelled: Arc<AtomicBool>,
}

impl<O> TakeSubscriber<O> {
  fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for TakeSubscriber<O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let upstream = upstream.into_shared();
    if self.count == 0 {
      upstream.cancel();
      if let Some(mut downstream) = self.downstream.take() {
        downstream.on_subscribe(Upstream::empty());
        downstream.on_complete();
      }
      return;
    }
    self.upstream = Some(upstream.clone());
    if let Some(downstream) = self.downstream.as_mut() {
      downstream.on_subscribe(Upstream::plain(CappedRequests {
        upstream,
        budget: AtomicU64::new(self.count),
        cancelled: self.cancelled.clone(),
      }));
    }
  }

  fn on_next(&mut self, value: T) {
    if self.is_cancelled() {
      return;
    }
    let Some(downstream) = self.downstream.as_mut() else { return };
    self.remaining -= 1;
    downstream.on_next(value);
    if self.is_cancelled() {
      self.downstream = None;
      return;
    }
    if self.remaining == 0 {
      if let Some(upstream) = self.upstream.take() {
        upstream.cancel();
      }
      if let Some(downstream) = self.downstream.take() {
        downstream.on_complete();
      }
    }
  }

  fn on_error(self, err: Error) {
    match self.downstream {
      Some(downstream) if !self.cancelled.load(Ordering::Acquire) => downstream.on_error(err),
      _ => hooks::on_undeliverable(err),
    }
  }

  fn on_complete(self) {
    if self.cancelled.load(Ordering::Acquire) {
      return;
    }
    if let Some(downstream) = self.downstream {
      downstream.on_complete();
    }
  }
}

struct CappedRequests {
  upstream: Arc<dyn Subscription>,
  budget: AtomicU64,
  cancelled: Arc<AtomicBool>,
}

impl Subscription for CappedRequests {
  fn request(&self, n: u64) {
    if !validate_request(n) {
      return;
    }
    let prev = self
      .budget
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| (b > 0).then(|| b - n.min(b)))
      .unwrap_or(0);
    let granted = n.min(prev);
    if granted > 0 {
      self.upstream.request(granted);
    }
  }

  fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      self.upstream.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
  };

  use crate::prelude::*;

  #[test]
  fn takes_the_first_values_and_cancels() {
    let cancelled = Arc::new(AtomicUsize::new(0));
    let c = cancelled.clone();
    flowable::range(1, 100)
      .do_on_cancel(move || {
        c.fetch_add(1, Ordering::SeqCst);
      })
      .take(3)
      .test()
      .assert_result(&[1, 2, 3]);
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn caps_upstream_demand() {
    let requested = Arc::new(AtomicU64::new(0));
    let r = requested.clone();
    let ts = flowable::range(1, 100)
      .do_on_request(move |n| {
        r.fetch_add(n, Ordering::SeqCst);
      })
      .take(5)
      .test();
    ts.assert_result(&[1, 2, 3, 4, 5]);
    assert_eq!(requested.load(Ordering::SeqCst), 5);
  }

  #[derive(Default)]
  struct Counts {
    nexts: AtomicUsize,
    terminals: AtomicUsize,
  }

  /// Cancels its subscription from inside the first `on_next`.
  struct CancelOnFirst {
    upstream: Option<Upstream<i32>>,
    counts: Arc<Counts>,
  }

  impl Subscriber<i32> for CancelOnFirst {
    fn on_subscribe(&mut self, upstream: Upstream<i32>) {
      upstream.request(UNBOUNDED);
      self.upstream = Some(upstream);
    }

    fn on_next(&mut self, _: i32) {
      self.counts.nexts.fetch_add(1, Ordering::SeqCst);
      if let Some(upstream) = self.upstream.take() {
        upstream.cancel();
      }
    }

    fn on_error(self, _: Error) { self.counts.terminals.fetch_add(1, Ordering::SeqCst); }

    fn on_complete(self) { self.counts.terminals.fetch_add(1, Ordering::SeqCst); }
  }

  fn cancel_on_first(source: impl Flowable<Item = i32>) -> Arc<Counts> {
    let counts = Arc::new(Counts::default());
    source.subscribe_with(CancelOnFirst { upstream: None, counts: counts.clone() });
    counts
  }

  #[test]
  fn cancel_inside_the_last_value_suppresses_completion() {
    for counts in [
      cancel_on_first(flowable::range(1, 3).take(1)),
      cancel_on_first(flowable::range(1, 3).hide().take(1)),
      cancel_on_first(flowable::just(1).take(1).hide()),
    ] {
      assert_eq!(counts.nexts.load(Ordering::SeqCst), 1);
      assert_eq!(counts.terminals.load(Ordering::SeqCst), 0);
    }
  }

  #[test]
  fn cancel_before_the_limit_stops_values_and_terminal() {
    let counts = cancel_on_first(flowable::range(1, 10).take(5));
    assert_eq!(counts.nexts.load(Ordering::SeqCst), 1);
    assert_eq!(counts.terminals.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn take_zero_completes_immediately() {
    flowable::never::<i32>().take(0).test().assert_result(&[]);
  }
}
