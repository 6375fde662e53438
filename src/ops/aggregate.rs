//! Shared subscriber for operators that fold a [`Flowable`](crate::flowable::Flowable)
//! into a single [`Maybe`](crate::maybe::Maybe) outcome.

use std::sync::Arc;

use crate::{
  disposable::Disposable,
  error::Error,
  hooks,
  maybe::{MaybeObserver, SubscriptionDisposable},
  subscriber::Subscriber,
  subscription::{Subscription, Upstream, UNBOUNDED},
};

/// One subscription's worth of folding state.
pub(crate) trait Aggregator<T>: Send + 'static {
  type Output: Send + 'static;

  /// `Ok(Some(_))` decides the outcome early and cancels the upstream.
  fn next(&mut self, value: T) -> Result<Option<Self::Output>, Error>;

  /// The outcome once the upstream completed; `None` completes empty.
  fn finish(self) -> Option<Self::Output>;
}

pub(crate) struct AggregateSubscriber<A, O> {
  aggregator: Option<A>,
  observer: Option<O>,
  upstream: Option<Arc<dyn Subscription>>,
  handle: Option<Arc<SubscriptionDisposable>>,
}

impl<A, O> AggregateSubscriber<A, O> {
  pub fn new(aggregator: A, observer: O) -> Self {
    AggregateSubscriber {
      aggregator: Some(aggregator),
      observer: Some(observer),
      upstream: None,
      handle: None,
    }
  }

  fn is_disposed(&self) -> bool { self.handle.as_ref().is_some_and(|h| h.is_disposed()) }

  fn cancel_upstream(&mut self) {
    if let Some(upstream) = self.upstream.take() {
      upstream.cancel();
    }
  }
}

impl<T, A, O> Subscriber<T> for AggregateSubscriber<A, O>
where
  T: Send + 'static,
  A: Aggregator<T>,
  O: MaybeObserver<A::Output>,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let upstream = upstream.into_shared();
    let handle = SubscriptionDisposable::new(upstream.clone());
    if let Some(observer) = self.observer.as_mut() {
      observer.on_subscribe(handle.clone());
    }
    if !handle.is_disposed() {
      upstream.request(UNBOUNDED);
    }
    self.upstream = Some(upstream);
    self.handle = Some(handle);
  }

  fn on_next(&mut self, value: T) {
    if self.is_disposed() {
      return;
    }
    let Some(aggregator) = self.aggregator.as_mut() else { return };
    let outcome = aggregator.next(value);
    match outcome {
      Ok(None) => {}
      Ok(Some(result)) => {
        self.aggregator = None;
        self.cancel_upstream();
        if let Some(observer) = self.observer.take() {
          observer.on_success(result);
        }
      }
      Err(err) => {
        self.aggregator = None;
        self.cancel_upstream();
        if let Some(observer) = self.observer.take() {
          observer.on_error(err);
        }
      }
    }
  }

  fn on_error(self, err: Error) {
    let disposed = self.is_disposed();
    match self.observer {
      Some(observer) if !disposed => observer.on_error(err),
      _ => hooks::on_undeliverable(err),
    }
  }

  fn on_complete(self) {
    if self.is_disposed() {
      return;
    }
    let (Some(observer), Some(aggregator)) = (self.observer, self.aggregator) else { return };
    match aggregator.finish() {
      Some(result) => observer.on_success(result),
      None => observer.on_complete(),
    }
  }
}
