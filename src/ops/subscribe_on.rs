use std::sync::Arc;

use crate::{
  disposable::Disposable,
  error::Error,
  flowable::Flowable,
  scheduler::{Duration, Scheduler, Worker},
  subscriber::Subscriber,
  subscription::{DeferredSubscription, Subscription, Upstream},
};

/// Subscribes to the source from a worker of `scheduler`. Requests made
/// before the source is subscribed are held and forwarded once it is.
#[derive(Clone)]
pub struct SubscribeOn<S, Sch> {
  source: S,
  scheduler: Sch,
}

impl<S, Sch> SubscribeOn<S, Sch> {
  pub fn new(source: S, scheduler: Sch) -> Self { SubscribeOn { source, scheduler } }
}

impl<S: Flowable, Sch: Scheduler> Flowable for SubscribeOn<S, Sch> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, mut downstream: O) {
    let worker = self.scheduler.create_worker();
    let state = Arc::new(SubscribeOnState { upstream: DeferredSubscription::default(), worker: worker.clone() });
    downstream.on_subscribe(Upstream::Plain(state.clone()));
    if state.upstream.is_cancelled() {
      return;
    }
    let source = self.source;
    worker.schedule(
      Box::new(move || source.subscribe_actual(SubscribeOnSubscriber { state, downstream })),
      Duration::ZERO,
    );
  }
}

struct SubscribeOnState {
  upstream: DeferredSubscription,
  worker: Arc<dyn Worker>,
}

impl Subscription for SubscribeOnState {
  fn request(&self, n: u64) { self.upstream.request(n) }

  fn cancel(&self) {
    self.upstream.cancel();
    self.worker.dispose();
  }
}

struct SubscribeOnSubscriber<O> {
  state: Arc<SubscribeOnState>,
  downstream: O,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for SubscribeOnSubscriber<O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) { self.state.upstream.set(upstream.into_shared()); }

  fn on_next(&mut self, value: T) { self.downstream.on_next(value) }

  fn on_error(self, err: Error) {
    self.state.worker.dispose();
    self.state.upstream.release();
    self.downstream.on_error(err)
  }

  fn on_complete(self) {
    self.state.worker.dispose();
    self.state.upstream.release();
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
  fn subscribes_when_the_worker_runs() {
    let scheduler = TestScheduler::new();
    let subscribed = Arc::new(AtomicBool::new(false));
    let flag = subscribed.clone();
    let source = flowable::defer(move || {
      flag.store(true, Ordering::SeqCst);
      flowable::range(1, 3)
    });
    let ts = source.subscribe_on(scheduler.clone()).test_with(2);
    assert!(!subscribed.load(Ordering::SeqCst));
    scheduler.trigger_actions();
    ts.assert_values(&[1, 2]).assert_not_complete();
    ts.request(1);
    ts.assert_result(&[1, 2, 3]);
  }

  #[test]
  fn cancel_before_the_worker_runs_skips_the_subscription() {
    let scheduler = TestScheduler::new();
    let subscribed = Arc::new(AtomicBool::new(false));
    let flag = subscribed.clone();
    let source = flowable::defer(move || {
      flag.store(true, Ordering::SeqCst);
      flowable::just(1)
    });
    let ts = source.subscribe_on(scheduler.clone()).test();
    ts.cancel();
    assert_eq!(scheduler.pending(), 0);
    scheduler.trigger_actions();
    assert!(!subscribed.load(Ordering::SeqCst));
    ts.assert_empty();
  }
}
