use std::sync::Arc;

use crate::{
  disposable::Disposable,
  drain::DownstreamCell,
  error::Error,
  flowable::Flowable,
  hooks,
  scheduler::{Duration, Scheduler, Worker},
  subscriber::Subscriber,
  subscription::{DeferredSubscription, Subscription, SubscriptionSlot, Upstream, UNBOUNDED},
};

// ==================== Delay ====================

/// Re-emits every signal `delay` later on a worker of its own. Signals keep
/// their order; an error is delivered without delay unless
/// [`delay_error`](Self::delay_error) is set.
#[derive(Clone)]
pub struct Delay<S, Sch> {
  source: S,
  delay: Duration,
  scheduler: Sch,
  delay_error: bool,
}

impl<S, Sch> Delay<S, Sch> {
  pub fn new(source: S, delay: Duration, scheduler: Sch) -> Self {
    Delay { source, delay, scheduler, delay_error: false }
  }

  pub fn delay_error(mut self, delay_error: bool) -> Self {
    self.delay_error = delay_error;
    self
  }
}

impl<S: Flowable, Sch: Scheduler> Flowable for Delay<S, Sch> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    let state = Arc::new(DelayState {
      downstream: DownstreamCell::default(),
      worker: self.scheduler.create_worker(),
      upstream: SubscriptionSlot::default(),
    });
    self.source.subscribe_actual(DelaySubscriber {
      state,
      downstream: Some(downstream),
      delay: self.delay,
      delay_error: self.delay_error,
    })
  }
}

struct DelayState<O> {
  downstream: DownstreamCell<O>,
  worker: Arc<dyn Worker>,
  upstream: SubscriptionSlot,
}

impl<O: Send + 'static> DelayState<O> {
  fn finish(&self, signal: impl FnOnce(O)) {
    self.worker.dispose();
    if let Some(downstream) = self.downstream.take() {
      signal(downstream);
    }
  }
}

impl<O: Send + 'static> Subscription for DelayState<O> {
  fn request(&self, n: u64) { self.upstream.request(n) }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.upstream.cancel();
      self.worker.dispose();
    }
  }
}

struct DelaySubscriber<O> {
  state: Arc<DelayState<O>>,
  downstream: Option<O>,
  delay: Duration,
  delay_error: bool,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for DelaySubscriber<O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    if !self.state.upstream.set_once(upstream.into_shared()) {
      return;
    }
    let Some(mut downstream) = self.downstream.take() else { return };
    downstream.on_subscribe(Upstream::Plain(self.state.clone()));
    self.state.downstream.attach(downstream);
  }

  fn on_next(&mut self, value: T) {
    let state = self.state.clone();
    self.state.worker.schedule(
      Box::new(move || {
        let mut slot = state.downstream.lock();
        if let Some(downstream) = slot.as_mut() {
          downstream.on_next(value);
        }
        if state.downstream.is_cancelled() {
          slot.take();
        }
      }),
      self.delay,
    );
  }

  fn on_error(self, err: Error) {
    let delay = if self.delay_error { self.delay } else { Duration::ZERO };
    let state = self.state.clone();
    self.state.upstream.release();
    self.state.worker.schedule(Box::new(move || state.finish(|d| d.on_error(err))), delay);
  }

  fn on_complete(self) {
    let state = self.state.clone();
    self.state.upstream.release();
    self.state.worker.schedule(Box::new(move || state.finish(|d| d.on_complete())), self.delay);
  }
}

// ==================== DelaySubscription ====================

/// Subscribes to the source once `other` emits its first value or
/// completes. An error of `other` fails the stream instead.
#[derive(Clone)]
pub struct DelaySubscription<S, P> {
  source: S,
  other: P,
}

impl<S, P> DelaySubscription<S, P> {
  pub fn new(source: S, other: P) -> Self { DelaySubscription { source, other } }
}

impl<S: Flowable, P: Flowable> Flowable for DelaySubscription<S, P> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, mut downstream: O) {
    let state = Arc::new(DelaySubscriptionState {
      other: SubscriptionSlot::default(),
      main: DeferredSubscription::default(),
    });
    downstream.on_subscribe(Upstream::Plain(state.clone()));
    if state.main.is_cancelled() {
      return;
    }
    self.other.subscribe_actual(OtherSubscriber {
      state,
      source: Some(self.source),
      downstream: Some(downstream),
    });
  }
}

struct DelaySubscriptionState {
  other: SubscriptionSlot,
  main: DeferredSubscription,
}

impl Subscription for DelaySubscriptionState {
  fn request(&self, n: u64) { self.main.request(n) }

  fn cancel(&self) {
    self.other.cancel();
    self.main.cancel();
  }
}

struct OtherSubscriber<S, O> {
  state: Arc<DelaySubscriptionState>,
  source: Option<S>,
  downstream: Option<O>,
}

impl<S: Flowable, O: Subscriber<S::Item>> OtherSubscriber<S, O> {
  fn subscribe_main(&mut self) {
    let (Some(source), Some(downstream)) = (self.source.take(), self.downstream.take()) else { return };
    if self.state.main.is_cancelled() {
      return;
    }
    source.subscribe_actual(MainSubscriber { state: self.state.clone(), downstream });
  }
}

impl<U, S, O> Subscriber<U> for OtherSubscriber<S, O>
where
  U: Send + 'static,
  S: Flowable,
  O: Subscriber<S::Item>,
{
  fn on_subscribe(&mut self, upstream: Upstream<U>) {
    let shared = upstream.into_shared();
    if self.state.other.set_once(shared.clone()) {
      shared.request(UNBOUNDED);
    }
  }

  fn on_next(&mut self, _: U) {
    if self.source.is_some() {
      self.state.other.cancel();
      self.subscribe_main();
    }
  }

  fn on_error(mut self, err: Error) {
    self.source.take();
    match self.downstream.take() {
      Some(downstream) => {
        self.state.other.release();
        downstream.on_error(err);
      }
      None => hooks::on_undeliverable(err),
    }
  }

  fn on_complete(mut self) {
    self.state.other.release();
    self.subscribe_main();
  }
}

struct MainSubscriber<O> {
  state: Arc<DelaySubscriptionState>,
  downstream: O,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for MainSubscriber<O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) { self.state.main.set(upstream.into_shared()); }

  fn on_next(&mut self, value: T) { self.downstream.on_next(value) }

  fn on_error(self, err: Error) {
    self.state.main.release();
    self.downstream.on_error(err)
  }

  fn on_complete(self) {
    self.state.main.release();
    self.downstream.on_complete()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  };

  use crate::prelude::*;

  #[test]
  fn shifts_values_and_completion() {
    let scheduler = TestScheduler::new();
    let ts = flowable::range(1, 3).delay(Duration::from_millis(10), scheduler.clone()).test();
    scheduler.advance_time_by(Duration::from_millis(9));
    ts.assert_empty();
    scheduler.advance_time_by(Duration::from_millis(1));
    ts.assert_result(&[1, 2, 3]);
    assert_eq!(scheduler.pending(), 0);
  }

  #[test]
  fn errors_cut_ahead_unless_delayed() {
    let scheduler = TestScheduler::new();
    let source = || flowable::just(1).concat_with(flowable::error(Error::msg("x")));
    let eager = source().delay(Duration::from_millis(10), scheduler.clone()).test();
    let delayed = source().delay(Duration::from_millis(10), scheduler.clone()).delay_error(true).test();
    scheduler.trigger_actions();
    eager.assert_failure(&Error::msg("x"), &[]);
    delayed.assert_empty();
    scheduler.advance_time_by(Duration::from_millis(10));
    delayed.assert_failure(&Error::msg("x"), &[1]);
  }

  #[test]
  fn cancel_drops_scheduled_signals() {
    let scheduler = TestScheduler::new();
    let ts = flowable::just(1).delay(Duration::from_millis(10), scheduler.clone()).test();
    ts.cancel();
    assert_eq!(scheduler.pending(), 0);
    scheduler.advance_time_by(Duration::from_millis(10));
    ts.assert_empty();
  }

  #[test]
  fn delay_subscription_waits_for_the_other_stream() {
    let scheduler = TestScheduler::new();
    let subscribed = Arc::new(AtomicBool::new(false));
    let flag = subscribed.clone();
    let source = flowable::defer(move || {
      flag.store(true, Ordering::SeqCst);
      flowable::just(1)
    });
    let ts = source.delay_subscription(flowable::timer(Duration::from_millis(10), scheduler.clone())).test();
    assert!(!subscribed.load(Ordering::SeqCst));
    scheduler.advance_time_by(Duration::from_millis(10));
    assert!(subscribed.load(Ordering::SeqCst));
    ts.assert_result(&[1]);
  }

  #[test]
  fn an_empty_other_also_triggers_the_subscription() {
    flowable::range(1, 2).delay_subscription(flowable::empty::<()>()).test().assert_result(&[1, 2]);
  }

  #[test]
  fn other_error_wins() {
    flowable::just(1)
      .delay_subscription(flowable::error::<()>(Error::msg("other")))
      .test()
      .assert_failure(&Error::msg("other"), &[]);
  }
}
