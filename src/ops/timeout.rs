//! Timeouts driven by indicator streams.
//!
//! The first value has to arrive before the `first` indicator signals, every
//! later value before the indicator returned for its predecessor signals.
//! An index stamped on each indicator decides races: whoever moves it first
//! wins, and a timed-out source can no longer deliver anything.

use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc,
};

use parking_lot::Mutex;

use crate::{
  drain::DownstreamCell,
  error::Error,
  flowable::{BoxFlowable, Flowable},
  hooks,
  scheduler::Duration,
  subscriber::Subscriber,
  subscription::{Subscription, SubscriptionArbiter, SubscriptionSlot, Upstream, UNBOUNDED},
};

const TIMED_OUT: u64 = u64::MAX;

pub struct Timeout<S: Flowable, P0, F> {
  source: S,
  first: P0,
  per_item: F,
  error: Error,
  fallback: Option<BoxFlowable<S::Item>>,
}

impl<S: Flowable, P0, F> Timeout<S, P0, F> {
  pub fn new(source: S, first: P0, per_item: F) -> Self {
    Timeout { source, first, per_item, error: Error::Timeout(Duration::ZERO), fallback: None }
  }

  /// The error reported on a timeout when there is no fallback.
  pub fn with_error(mut self, error: Error) -> Self {
    self.error = error;
    self
  }

  /// Continues with `fallback` instead of failing. Outstanding demand is
  /// carried over.
  pub fn with_fallback<P: Flowable<Item = S::Item>>(mut self, fallback: P) -> Self {
    self.fallback = Some(fallback.boxed());
    self
  }
}

impl<S, P0, P, F> Flowable for Timeout<S, P0, F>
where
  S: Flowable,
  P0: Flowable,
  P: Flowable,
  F: Fn(&S::Item) -> P + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, mut downstream: O) {
    let state = Arc::new(TimeoutState {
      downstream: DownstreamCell::default(),
      index: AtomicU64::new(0),
      upstream: SubscriptionSlot::default(),
      arbiter: SubscriptionArbiter::default(),
      timer: Mutex::new(None),
      consumed: AtomicU64::new(0),
      error: Mutex::new(Some(self.error)),
      fallback: Mutex::new(self.fallback),
    });
    downstream.on_subscribe(Upstream::Plain(state.clone()));
    if !state.downstream.attach(downstream) {
      return;
    }
    self.first.subscribe_actual(TimerSubscriber { state: state.clone(), index: 0, fired: false });
    self.source.subscribe_actual(MainSubscriber { state, per_item: self.per_item });
  }
}

struct TimeoutState<T, O> {
  downstream: DownstreamCell<O>,
  index: AtomicU64,
  upstream: SubscriptionSlot,
  arbiter: SubscriptionArbiter,
  timer: Mutex<Option<Arc<dyn Subscription>>>,
  consumed: AtomicU64,
  error: Mutex<Option<Error>>,
  fallback: Mutex<Option<BoxFlowable<T>>>,
}

impl<T: Send + 'static, O: Subscriber<T>> TimeoutState<T, O> {
  fn cancel_timer(&self) {
    let timer = self.timer.lock().take();
    if let Some(timer) = timer {
      timer.cancel();
    }
  }

  /// Keeps `timer` if `index` is still the awaited one, cancels it
  /// otherwise.
  fn set_timer(&self, index: u64, timer: Arc<dyn Subscription>) -> bool {
    let mut slot = self.timer.lock();
    if self.index.load(Ordering::Acquire) != index || self.downstream.is_cancelled() {
      drop(slot);
      timer.cancel();
      return false;
    }
    let previous = slot.replace(timer);
    drop(slot);
    if let Some(previous) = previous {
      previous.cancel();
    }
    true
  }

  fn deliver(&self, value: T) {
    let mut slot = self.downstream.lock();
    if let Some(downstream) = slot.as_mut() {
      downstream.on_next(value);
    }
    if self.downstream.is_cancelled() {
      slot.take();
    }
  }

  fn terminate(&self, err: Option<Error>) {
    self.cancel_timer();
    if let Some(downstream) = self.downstream.take() {
      match err {
        Some(err) => downstream.on_error(err),
        None => downstream.on_complete(),
      }
    }
  }

  fn timeout(self: &Arc<Self>, index: u64) {
    if self.index.compare_exchange(index, TIMED_OUT, Ordering::AcqRel, Ordering::Acquire).is_err() {
      return;
    }
    self.upstream.cancel();
    self.cancel_timer();
    let fallback = self.fallback.lock().take();
    match fallback {
      Some(fallback) => {
        tracing::debug!(index, "timeout: switching to fallback");
        self.arbiter.produced(self.consumed.load(Ordering::Acquire));
        fallback.subscribe_actual(FallbackSubscriber { state: self.clone() });
      }
      None => {
        tracing::debug!(index, "timeout");
        let err = self.error.lock().take();
        self.terminate(err);
      }
    }
  }

  fn timeout_error(&self, index: u64, err: Error) {
    if self.index.compare_exchange(index, TIMED_OUT, Ordering::AcqRel, Ordering::Acquire).is_err() {
      hooks::on_undeliverable(err);
      return;
    }
    self.upstream.cancel();
    self.terminate(Some(err));
  }
}

impl<T: Send + 'static, O: Subscriber<T>> Subscription for TimeoutState<T, O> {
  fn request(&self, n: u64) { self.arbiter.request(n) }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.index.store(TIMED_OUT, Ordering::Release);
      self.arbiter.cancel();
      self.upstream.cancel();
      self.cancel_timer();
    }
  }
}

struct MainSubscriber<T, O, F> {
  state: Arc<TimeoutState<T, O>>,
  per_item: F,
}

impl<T, O, P, F> Subscriber<T> for MainSubscriber<T, O, F>
where
  T: Send + 'static,
  O: Subscriber<T>,
  P: Flowable,
  F: Fn(&T) -> P + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let shared = upstream.into_shared();
    if self.state.upstream.set_once(shared.clone()) {
      self.state.arbiter.set_subscription(shared);
    }
  }

  fn on_next(&mut self, value: T) {
    let state = &self.state;
    let index = state.index.load(Ordering::Acquire);
    if index == TIMED_OUT
      || state.index.compare_exchange(index, index + 1, Ordering::AcqRel, Ordering::Acquire).is_err()
    {
      return;
    }
    state.cancel_timer();
    state.consumed.fetch_add(1, Ordering::AcqRel);
    let indicator = (self.per_item)(&value);
    state.deliver(value);
    indicator.subscribe_actual(TimerSubscriber { state: state.clone(), index: index + 1, fired: false });
  }

  fn on_error(self, err: Error) {
    if self.state.index.swap(TIMED_OUT, Ordering::AcqRel) == TIMED_OUT {
      hooks::on_undeliverable(err);
      return;
    }
    self.state.upstream.release();
    self.state.terminate(Some(err));
  }

  fn on_complete(self) {
    if self.state.index.swap(TIMED_OUT, Ordering::AcqRel) == TIMED_OUT {
      return;
    }
    self.state.upstream.release();
    self.state.terminate(None);
  }
}

/// Any signal of the indicator counts as the timeout.
struct TimerSubscriber<T, O> {
  state: Arc<TimeoutState<T, O>>,
  index: u64,
  fired: bool,
}

impl<U, T, O> Subscriber<U> for TimerSubscriber<T, O>
where
  U: Send + 'static,
  T: Send + 'static,
  O: Subscriber<T>,
{
  fn on_subscribe(&mut self, upstream: Upstream<U>) {
    let shared = upstream.into_shared();
    if self.state.set_timer(self.index, shared.clone()) {
      shared.request(UNBOUNDED);
    }
  }

  fn on_next(&mut self, _: U) {
    if !self.fired {
      self.fired = true;
      self.state.timeout(self.index);
    }
  }

  fn on_error(self, err: Error) {
    if self.fired {
      hooks::on_undeliverable(err);
    } else {
      self.state.timeout_error(self.index, err);
    }
  }

  fn on_complete(self) {
    if !self.fired {
      self.state.timeout(self.index);
    }
  }
}

struct FallbackSubscriber<T, O> {
  state: Arc<TimeoutState<T, O>>,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for FallbackSubscriber<T, O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) { self.state.arbiter.set_subscription(upstream.into_shared()) }

  fn on_next(&mut self, value: T) { self.state.deliver(value) }

  fn on_error(self, err: Error) { self.state.terminate(Some(err)) }

  fn on_complete(self) { self.state.terminate(None) }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::prelude::*;

  type Slot<T> = Arc<Mutex<Option<Emitter<T>>>>;

  fn manual() -> (Slot<i32>, impl Flowable<Item = i32>) {
    let slot: Slot<i32> = Arc::new(Mutex::new(None));
    let s = slot.clone();
    (slot, flowable::create(move |e| *s.lock() = Some(e), BackpressureStrategy::Buffer))
  }

  fn emit(slot: &Slot<i32>, value: i32) {
    if let Some(e) = slot.lock().as_mut() {
      e.next(value);
    }
  }

  #[test]
  fn fails_when_nothing_arrives_in_time() {
    let scheduler = TestScheduler::new();
    let ts = flowable::never::<i32>().timeout(Duration::from_millis(10), scheduler.clone()).test();
    scheduler.advance_time_by(Duration::from_millis(9));
    ts.assert_empty();
    scheduler.advance_time_by(Duration::from_millis(1));
    ts.assert_failure(&Error::Timeout(Duration::from_millis(10)), &[]);
  }

  #[test]
  fn every_value_restarts_the_timer() {
    let scheduler = TestScheduler::new();
    let ts = flowable::interval(Duration::from_millis(5), Duration::from_millis(5), scheduler.clone())
      .take(3)
      .timeout(Duration::from_millis(10), scheduler.clone())
      .test();
    scheduler.advance_time_by(Duration::from_millis(100));
    ts.assert_result(&[0, 1, 2]);
    assert_eq!(scheduler.pending(), 0);
  }

  #[test]
  fn switches_to_the_fallback_once() {
    let scheduler = TestScheduler::new();
    let (source, flow) = manual();
    let ts = flow
      .timeout_fallback(Duration::from_millis(10), scheduler.clone(), flowable::range(100, 2))
      .test();
    emit(&source, 1);
    scheduler.advance_time_by(Duration::from_millis(10));
    emit(&source, 2);
    ts.assert_result(&[1, 100, 101]);
    assert!(source.lock().as_ref().is_some_and(|e| e.is_cancelled()));
  }

  #[test]
  fn fallback_inherits_outstanding_demand() {
    let scheduler = TestScheduler::new();
    let (source, flow) = manual();
    let ts = flow
      .timeout_fallback(Duration::from_millis(10), scheduler.clone(), flowable::range(100, 5))
      .test_with(2);
    emit(&source, 1);
    scheduler.advance_time_by(Duration::from_millis(10));
    ts.assert_values(&[1, 100]).assert_not_complete();
    ts.request(10);
    ts.assert_result(&[1, 100, 101, 102, 103, 104]);
  }

  #[test]
  fn an_empty_first_indicator_times_out_immediately() {
    flowable::range(1, 3)
      .timeout_selector(flowable::empty::<()>(), |_| flowable::never::<()>())
      .test()
      .assert_failure(&Error::Timeout(Duration::ZERO), &[]);
  }

  #[test]
  fn indicator_errors_fail_the_stream() {
    flowable::never::<i32>()
      .timeout_selector(flowable::error::<()>(Error::msg("indicator")), |_| flowable::never::<()>())
      .test()
      .assert_failure(&Error::msg("indicator"), &[]);
  }
}
