//! Ways out of a [`Maybe`]: closures, a [`Flowable`], a blocking call and a
//! `Future`.

use std::{
  future::Future,
  pin::Pin,
  sync::Arc,
  task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use super::{DisposableSubscription, Maybe, MaybeObserver};
use crate::{
  disposable::{BoxDisposable, Disposable},
  error::Error,
  flowable::Flowable,
  hooks,
  ops::{
    blocking::{self, Interrupt},
    post_complete::PostComplete,
  },
  subscriber::{LambdaHandle, Subscriber},
  subscription::Upstream,
};

// ==================== Lambda ====================

/// Observer built from closures, used by
/// [`Maybe::subscribe_all`](super::Maybe::subscribe_all).
pub struct LambdaObserver<F, E, C> {
  on_success: F,
  on_error: E,
  on_complete: C,
  handle: Arc<LambdaHandle>,
}

impl<F, E, C> LambdaObserver<F, E, C> {
  pub fn new(on_success: F, on_error: E, on_complete: C) -> Self {
    LambdaObserver { on_success, on_error, on_complete, handle: Arc::default() }
  }

  /// Disposes the source; reports disposed once the outcome arrived.
  pub fn handle(&self) -> BoxDisposable { self.handle.clone() }
}

impl<T, F, E, C> MaybeObserver<T> for LambdaObserver<F, E, C>
where
  T: Send + 'static,
  F: FnOnce(T) + Send + 'static,
  E: FnOnce(Error) + Send + 'static,
  C: FnOnce() + Send + 'static,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) {
    self.handle.slot().set_once(Arc::new(DisposableSubscription(disposable)));
  }

  fn on_success(self, value: T) {
    if !self.handle.slot().is_cancelled() {
      self.handle.slot().release();
      (self.on_success)(value);
    }
  }

  fn on_complete(self) {
    if !self.handle.slot().is_cancelled() {
      self.handle.slot().release();
      (self.on_complete)();
    }
  }

  fn on_error(self, err: Error) {
    if self.handle.slot().is_cancelled() {
      hooks::on_undeliverable(err);
      return;
    }
    self.handle.slot().release();
    (self.on_error)(err);
  }
}

// ==================== To Flowable ====================

/// The outcome as a stream of at most one value, emitted once requested.
#[derive(Clone)]
pub struct MaybeToFlowable<S> {
  source: S,
}

impl<S> MaybeToFlowable<S> {
  pub fn new(source: S) -> Self { MaybeToFlowable { source } }
}

impl<S: Maybe> Flowable for MaybeToFlowable<S> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    self.source.subscribe_actual(ToFlowableObserver {
      state: PostComplete::new(),
      downstream: Some(downstream),
    })
  }
}

struct ToFlowableObserver<T, O> {
  state: Arc<PostComplete<T, O>>,
  downstream: Option<O>,
}

impl<T: Send + 'static, O: Subscriber<T>> MaybeObserver<T> for ToFlowableObserver<T, O> {
  fn on_subscribe(&mut self, disposable: BoxDisposable) {
    let upstream = Upstream::<T>::Plain(Arc::new(DisposableSubscription(disposable)));
    self.state.attach(upstream, &mut self.downstream);
  }

  fn on_success(self, value: T) { self.state.finish(Some(value)) }

  fn on_complete(self) { self.state.finish(None) }

  fn on_error(self, err: Error) { self.state.fail(err) }
}

// ==================== Blocking ====================

pub(super) fn blocking_get<M: Maybe>(
  source: M, interrupt: &Interrupt,
) -> Result<Option<M::Item>, Error> {
  let mut value = None;
  let mut failure = None;
  let flowable = source.to_flowable();
  blocking::subscribe(flowable, interrupt, |v| value = Some(v), |e| failure = Some(e), || {});
  match failure {
    Some(err) => Err(err),
    None => Ok(value),
  }
}

// ==================== Future ====================

struct FutureState<T> {
  outcome: Option<Result<Option<T>, Error>>,
  waker: Option<Waker>,
  upstream: Option<BoxDisposable>,
}

/// Resolves with the outcome of a [`Maybe`]: `Ok(Some(v))` on success,
/// `Ok(None)` on empty completion. Dropping it before that disposes the
/// source.
pub struct MaybeFuture<T> {
  state: Arc<Mutex<FutureState<T>>>,
}

impl<T: Send + 'static> MaybeFuture<T> {
  pub fn new<M: Maybe<Item = T>>(source: M) -> Self {
    let state = Arc::new(Mutex::new(FutureState { outcome: None, waker: None, upstream: None }));
    source.subscribe_actual(FutureObserver { state: state.clone() });
    MaybeFuture { state }
  }
}

impl<T> Future for MaybeFuture<T> {
  type Output = Result<Option<T>, Error>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut state = self.state.lock();
    match state.outcome.take() {
      Some(outcome) => Poll::Ready(outcome),
      None => {
        state.waker = Some(cx.waker().clone());
        Poll::Pending
      }
    }
  }
}

impl<T> Drop for MaybeFuture<T> {
  fn drop(&mut self) {
    let upstream = {
      let mut state = self.state.lock();
      if state.outcome.is_some() {
        None
      } else {
        state.upstream.take()
      }
    };
    if let Some(upstream) = upstream {
      upstream.dispose();
    }
  }
}

struct FutureObserver<T> {
  state: Arc<Mutex<FutureState<T>>>,
}

impl<T> FutureObserver<T> {
  fn resolve(self, outcome: Result<Option<T>, Error>) {
    let waker = {
      let mut state = self.state.lock();
      state.upstream = None;
      state.outcome = Some(outcome);
      state.waker.take()
    };
    if let Some(waker) = waker {
      waker.wake();
    }
  }
}

impl<T: Send + 'static> MaybeObserver<T> for FutureObserver<T> {
  fn on_subscribe(&mut self, disposable: BoxDisposable) {
    let mut state = self.state.lock();
    if state.outcome.is_none() {
      state.upstream = Some(disposable);
    }
  }

  fn on_success(self, value: T) { self.resolve(Ok(Some(value))) }

  fn on_complete(self) { self.resolve(Ok(None)) }

  fn on_error(self, err: Error) { self.resolve(Err(err)) }
}
