//! Side-effect operators that observe a stream without changing it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
  error::Error,
  flowable::Flowable,
  subscriber::Subscriber,
  subscription::{Subscription, Upstream},
};

// ==================== DoOnNext ====================

#[derive(Clone)]
pub struct DoOnNext<S, F> {
  source: S,
  func: F,
}

impl<S, F> DoOnNext<S, F> {
  pub fn new(source: S, func: F) -> Self { DoOnNext { source, func } }
}

impl<S, F> Flowable for DoOnNext<S, F>
where
  S: Flowable,
  F: Fn(&S::Item) + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    self.source.subscribe_actual(DoOnNextSubscriber { downstream, func: self.func })
  }
}

struct DoOnNextSubscriber<O, F> {
  downstream: O,
  func: F,
}

impl<T, O, F> Subscriber<T> for DoOnNextSubscriber<O, F>
where
  T: Send + 'static,
  O: Subscriber<T>,
  F: Fn(&T) + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    self.downstream.on_subscribe(Upstream::Plain(upstream.into_shared()))
  }

  fn on_next(&mut self, value: T) {
    (self.func)(&value);
    self.downstream.on_next(value);
  }

  fn on_error(self, err: Error) { self.downstream.on_error(err) }

  fn on_complete(self) { self.downstream.on_complete() }
}

// ==================== DoOnRequest / DoOnCancel ====================

#[derive(Clone)]
pub struct DoOnRequest<S, F> {
  source: S,
  func: F,
}

impl<S, F> DoOnRequest<S, F> {
  pub fn new(source: S, func: F) -> Self { DoOnRequest { source, func } }
}

impl<S, F> Flowable for DoOnRequest<S, F>
where
  S: Flowable,
  F: Fn(u64) + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    let hooks = SubscriptionHooks { on_request: Some(Arc::new(self.func) as RequestHook), on_cancel: None };
    self.source.subscribe_actual(HookedSubscriber { downstream, hooks: Some(hooks) })
  }
}

#[derive(Clone)]
pub struct DoOnCancel<S, F> {
  source: S,
  func: F,
}

impl<S, F> DoOnCancel<S, F> {
  pub fn new(source: S, func: F) -> Self { DoOnCancel { source, func } }
}

impl<S, F> Flowable for DoOnCancel<S, F>
where
  S: Flowable,
  F: Fn() + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    let hooks = SubscriptionHooks { on_request: None, on_cancel: Some(Arc::new(self.func) as CancelHook) };
    self.source.subscribe_actual(HookedSubscriber { downstream, hooks: Some(hooks) })
  }
}

type RequestHook = Arc<dyn Fn(u64) + Send + Sync>;

type CancelHook = Arc<dyn Fn() + Send + Sync>;

struct SubscriptionHooks {
  on_request: Option<RequestHook>,
  on_cancel: Option<CancelHook>,
}

struct HookedSubscriber<O> {
  downstream: O,
  hooks: Option<SubscriptionHooks>,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for HookedSubscriber<O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let Some(hooks) = self.hooks.take() else {
      upstream.cancel();
      return;
    };
    self.downstream.on_subscribe(Upstream::plain(HookedSubscription {
      upstream: upstream.into_shared(),
      hooks,
    }))
  }

  fn on_next(&mut self, value: T) { self.downstream.on_next(value) }

  fn on_error(self, err: Error) { self.downstream.on_error(err) }

  fn on_complete(self) { self.downstream.on_complete() }
}

struct HookedSubscription {
  upstream: Arc<dyn Subscription>,
  hooks: SubscriptionHooks,
}

impl Subscription for HookedSubscription {
  fn request(&self, n: u64) {
    if let Some(on_request) = &self.hooks.on_request {
      on_request(n);
    }
    self.upstream.request(n);
  }

  fn cancel(&self) {
    if let Some(on_cancel) = &self.hooks.on_cancel {
      on_cancel();
    }
    self.upstream.cancel();
  }
}

// ==================== Finalize ====================

/// Runs an action exactly once after the downstream received its terminal
/// signal, or when the downstream cancels.
pub struct Finalize<S, F> {
  source: S,
  action: F,
}

impl<S, F> Finalize<S, F> {
  pub fn new(source: S, action: F) -> Self { Finalize { source, action } }
}

impl<S, F> Flowable for Finalize<S, F>
where
  S: Flowable,
  F: FnOnce() + Send + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    let action: FinalAction = Arc::new(Mutex::new(Some(Box::new(self.action))));
    self.source.subscribe_actual(FinalizeSubscriber { downstream, action })
  }
}

type FinalAction = Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>;

fn run_once(action: &FinalAction) {
  let action = action.lock().take();
  if let Some(action) = action {
    action();
  }
}

struct FinalizeSubscriber<O> {
  downstream: O,
  action: FinalAction,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for FinalizeSubscriber<O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    self.downstream.on_subscribe(Upstream::plain(FinalizeSubscription {
      upstream: upstream.into_shared(),
      action: self.action.clone(),
    }))
  }

  fn on_next(&mut self, value: T) { self.downstream.on_next(value) }

  fn on_error(self, err: Error) {
    self.downstream.on_error(err);
    run_once(&self.action);
  }

  fn on_complete(self) {
    self.downstream.on_complete();
    run_once(&self.action);
  }
}

struct FinalizeSubscription {
  upstream: Arc<dyn Subscription>,
  action: FinalAction,
}

impl Subscription for FinalizeSubscription {
  fn request(&self, n: u64) { self.upstream.request(n) }

  fn cancel(&self) {
    self.upstream.cancel();
    run_once(&self.action);
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use parking_lot::Mutex;

  use crate::prelude::*;

  #[test]
  fn do_on_next_sees_every_value() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    flowable::range(1, 3).do_on_next(move |v| s.lock().push(*v)).test().assert_result(&[1, 2, 3]);
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
  }

  #[test]
  fn finalize_runs_once_after_terminal_or_cancel() {
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    flowable::range(1, 2)
      .finalize(move || {
        r.fetch_add(1, Ordering::SeqCst);
      })
      .test()
      .assert_result(&[1, 2]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let r = runs.clone();
    let ts = flowable::never::<i32>()
      .finalize(move || {
        r.fetch_add(1, Ordering::SeqCst);
      })
      .test();
    ts.cancel();
    ts.cancel();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
  }
}
