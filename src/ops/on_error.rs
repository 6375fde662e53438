//! Operators that recover from an upstream error.

use std::sync::Arc;

use super::post_complete::PostComplete;
use crate::{
  error::Error,
  flowable::Flowable,
  subscriber::Subscriber,
  subscription::{SubscriptionArbiter, Upstream},
};

// ==================== OnErrorReturn ====================

/// Replaces an error with one last value, emitted once there is demand.
#[derive(Clone)]
pub struct OnErrorReturn<S, F> {
  source: S,
  func: F,
}

impl<S, F> OnErrorReturn<S, F> {
  pub fn new(source: S, func: F) -> Self { OnErrorReturn { source, func } }
}

impl<S, F> Flowable for OnErrorReturn<S, F>
where
  S: Flowable,
  F: Fn(Error) -> S::Item + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    self.source.subscribe_actual(OnErrorReturnSubscriber {
      state: PostComplete::new(),
      downstream: Some(downstream),
      func: self.func,
    })
  }
}

struct OnErrorReturnSubscriber<T, O, F> {
  state: Arc<PostComplete<T, O>>,
  downstream: Option<O>,
  func: F,
}

impl<T, O, F> Subscriber<T> for OnErrorReturnSubscriber<T, O, F>
where
  T: Send + 'static,
  O: Subscriber<T>,
  F: Fn(Error) -> T + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) { self.state.attach(upstream, &mut self.downstream) }

  fn on_next(&mut self, value: T) { self.state.next(value) }

  fn on_error(self, err: Error) {
    tracing::debug!(error = %err, "on_error_return: replacing error");
    self.state.finish(Some((self.func)(err)))
  }

  fn on_complete(self) { self.state.finish(None) }
}

// ==================== OnErrorComplete ====================

/// Turns an error into a normal completion.
#[derive(Clone)]
pub struct OnErrorComplete<S> {
  source: S,
}

impl<S> OnErrorComplete<S> {
  pub fn new(source: S) -> Self { OnErrorComplete { source } }
}

impl<S: Flowable> Flowable for OnErrorComplete<S> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    self.source.subscribe_actual(OnErrorCompleteSubscriber { downstream })
  }
}

struct OnErrorCompleteSubscriber<O> {
  downstream: O,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for OnErrorCompleteSubscriber<O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    self.downstream.on_subscribe(Upstream::Plain(upstream.into_shared()))
  }

  fn on_next(&mut self, value: T) { self.downstream.on_next(value) }

  fn on_error(self, err: Error) {
    tracing::debug!(error = %err, "on_error_complete: swallowing error");
    self.downstream.on_complete()
  }

  fn on_complete(self) { self.downstream.on_complete() }
}

// ==================== OnErrorResumeNext ====================

/// Continues with the stream returned for the error. Demand not yet
/// fulfilled by the failed source carries over.
#[derive(Clone)]
pub struct OnErrorResumeNext<S, F> {
  source: S,
  func: F,
}

impl<S, F> OnErrorResumeNext<S, F> {
  pub fn new(source: S, func: F) -> Self { OnErrorResumeNext { source, func } }
}

impl<S, P, F> Flowable for OnErrorResumeNext<S, F>
where
  S: Flowable,
  P: Flowable<Item = S::Item>,
  F: Fn(Error) -> P + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, mut downstream: O) {
    let arbiter = Arc::new(SubscriptionArbiter::default());
    downstream.on_subscribe(Upstream::Plain(arbiter.clone()));
    self.source.subscribe_actual(ResumeSubscriber { downstream, arbiter, func: self.func, produced: 0 })
  }
}

struct ResumeSubscriber<O, F> {
  downstream: O,
  arbiter: Arc<SubscriptionArbiter>,
  func: F,
  produced: u64,
}

impl<T, P, O, F> Subscriber<T> for ResumeSubscriber<O, F>
where
  T: Send + 'static,
  P: Flowable<Item = T>,
  O: Subscriber<T>,
  F: Fn(Error) -> P + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) { self.arbiter.set_subscription(upstream.into_shared()) }

  fn on_next(&mut self, value: T) {
    self.produced += 1;
    self.downstream.on_next(value)
  }

  fn on_error(self, err: Error) {
    if self.arbiter.is_cancelled() {
      return;
    }
    tracing::debug!(error = %err, "on_error_resume_next: switching source");
    self.arbiter.produced(self.produced);
    let next = (self.func)(err);
    next.subscribe_actual(FallbackSubscriber { downstream: self.downstream, arbiter: self.arbiter })
  }

  fn on_complete(self) { self.downstream.on_complete() }
}

struct FallbackSubscriber<O> {
  downstream: O,
  arbiter: Arc<SubscriptionArbiter>,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for FallbackSubscriber<O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) { self.arbiter.set_subscription(upstream.into_shared()) }

  fn on_next(&mut self, value: T) { self.downstream.on_next(value) }

  fn on_error(self, err: Error) { self.downstream.on_error(err) }

  fn on_complete(self) { self.downstream.on_complete() }
}
