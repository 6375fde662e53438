//! The 0..1 value source.
//!
//! A [`Maybe`] ends with exactly one of `on_success`, `on_complete` (no
//! value) or `on_error`. There is no demand to negotiate; the consumer
//! receives a [`BoxDisposable`] in `on_subscribe` to cancel the work.
//!
//! ```rust
//! use rxflow::prelude::*;
//!
//! let to = maybe::just(20).map(|v| v + 1).filter(|v| v % 2 == 1).test();
//! to.assert_value(21);
//! ```

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use crate::{
  disposable::{BoxDisposable, Disposable},
  error::Error,
  flowable::Flowable,
  function::{Fallible, Infallible},
  ops::blocking::Interrupt,
  scheduler::{Duration, Scheduler},
  subscription::{validate_request, Subscription},
  testing::TestObserver,
};

mod bridge;
mod delay;
mod flat_map;
mod lifecycle;
mod map;
mod on_error;
mod source;
mod timeout;

pub use bridge::{LambdaObserver, MaybeFuture, MaybeToFlowable};
pub use delay::{Delay, DelayOther};
pub use flat_map::{FlatMap, SwitchIfEmpty};
pub use lifecycle::DoOnDispose;
pub use map::{Filter, Map};
pub use on_error::{OnErrorComplete, OnErrorResumeNext, OnErrorReturn};
pub use source::{
  defer, empty, error, from_fn, just, never, timer, Defer, Empty, ErrorMaybe, FromFn, Just, Never,
  Timer,
};
pub use timeout::Timeout;

/// Consumer of a [`Maybe`].
pub trait MaybeObserver<T>: Send + 'static {
  fn on_subscribe(&mut self, disposable: BoxDisposable);

  fn on_success(self, value: T);

  /// Finished without a value.
  fn on_complete(self);

  fn on_error(self, err: Error);
}

pub trait Maybe: Sized + Send + 'static {
  type Item: Send + 'static;

  /// Connects `observer` to a fresh run of this source. `on_subscribe` is
  /// called exactly once, before the outcome.
  fn subscribe_actual<O: MaybeObserver<Self::Item>>(self, observer: O);

  // ==================== Subscribing ====================

  fn subscribe_with<O: MaybeObserver<Self::Item>>(self, observer: O) {
    self.subscribe_actual(observer)
  }

  /// Calls `on_success` with the value, if any. Errors go to the error hook.
  fn subscribe<F>(self, on_success: F) -> BoxDisposable
  where
    F: FnOnce(Self::Item) + Send + 'static,
  {
    self.subscribe_all(on_success, crate::subscriber::lambda::unhandled, || {})
  }

  fn subscribe_all<F, E, C>(self, on_success: F, on_error: E, on_complete: C) -> BoxDisposable
  where
    F: FnOnce(Self::Item) + Send + 'static,
    E: FnOnce(Error) + Send + 'static,
    C: FnOnce() + Send + 'static,
  {
    let observer = LambdaObserver::new(on_success, on_error, on_complete);
    let handle = observer.handle();
    self.subscribe_actual(observer);
    handle
  }

  fn test(self) -> TestObserver<Self::Item> {
    let to = TestObserver::new();
    self.subscribe_actual(to.clone());
    to
  }

  fn boxed(self) -> BoxMaybe<Self::Item> { Box::new(self) }

  // ==================== Transforming ====================

  fn map<B, F>(self, f: F) -> Map<Self, Infallible<F>>
  where
    B: Send + 'static,
    F: Fn(Self::Item) -> B + Send + Sync + 'static,
  {
    Map::new(self, Infallible(f))
  }

  /// [`map`](Self::map) with a fallible function; an `Err` becomes the
  /// outcome.
  fn try_map<B, F>(self, f: F) -> Map<Self, Fallible<F>>
  where
    B: Send + 'static,
    F: Fn(Self::Item) -> Result<B, Error> + Send + Sync + 'static,
  {
    Map::new(self, Fallible(f))
  }

  /// Completes empty when the value is rejected.
  fn filter<F>(self, predicate: F) -> Filter<Self, F>
  where
    F: Fn(&Self::Item) -> bool + Send + Sync + 'static,
  {
    Filter::new(self, predicate)
  }

  fn flat_map<M, F>(self, mapper: F) -> FlatMap<Self, F>
  where
    M: Maybe,
    F: Fn(Self::Item) -> M + Send + Sync + 'static,
  {
    FlatMap::new(self, mapper)
  }

  /// Runs `other` when this source completes empty.
  fn switch_if_empty<M>(self, other: M) -> SwitchIfEmpty<Self, M>
  where
    M: Maybe<Item = Self::Item>,
  {
    SwitchIfEmpty::new(self, other)
  }

  // ==================== Time ====================

  /// Delays every outcome, errors included, by `delay`.
  fn delay<Sch: Scheduler>(self, delay: Duration, scheduler: Sch) -> Delay<Self, Sch> {
    Delay::new(self, delay, scheduler)
  }

  /// Holds the outcome back until `other` emits or completes.
  fn delay_other<P: Flowable>(self, other: P) -> DelayOther<Self, P> {
    DelayOther::new(self, other)
  }

  /// Fails with [`Error::Timeout`] when no outcome arrives within `timeout`.
  fn timeout<Sch: Scheduler>(self, timeout: Duration, scheduler: Sch) -> Timeout<Self, Timer<Sch>> {
    Timeout::new(self, timer(timeout, scheduler)).with_error(Error::Timeout(timeout))
  }

  /// Switches to `fallback` when no outcome arrives within `timeout`.
  fn timeout_fallback<Sch, M>(self, timeout: Duration, scheduler: Sch, fallback: M)
    -> Timeout<Self, Timer<Sch>>
  where
    Sch: Scheduler,
    M: Maybe<Item = Self::Item>,
  {
    Timeout::new(self, timer(timeout, scheduler)).with_fallback(fallback)
  }

  /// Times out as soon as `indicator` signals anything.
  fn timeout_by<I: Maybe>(self, indicator: I) -> Timeout<Self, I> { Timeout::new(self, indicator) }

  fn timeout_by_fallback<I, M>(self, indicator: I, fallback: M) -> Timeout<Self, I>
  where
    I: Maybe,
    M: Maybe<Item = Self::Item>,
  {
    Timeout::new(self, indicator).with_fallback(fallback)
  }

  // ==================== Error handling ====================

  fn on_error_return<F>(self, f: F) -> OnErrorReturn<Self, F>
  where
    F: Fn(Error) -> Self::Item + Send + Sync + 'static,
  {
    OnErrorReturn::new(self, f)
  }

  fn on_error_complete(self) -> OnErrorComplete<Self> { OnErrorComplete::new(self) }

  fn on_error_resume_next<M, F>(self, f: F) -> OnErrorResumeNext<Self, F>
  where
    M: Maybe<Item = Self::Item>,
    F: Fn(Error) -> M + Send + Sync + 'static,
  {
    OnErrorResumeNext::new(self, f)
  }

  // ==================== Side effects ====================

  /// Runs `f` when the consumer disposes before an outcome arrived.
  fn do_on_dispose<F>(self, f: F) -> DoOnDispose<Self, F>
  where
    F: Fn() + Send + Sync + 'static,
  {
    DoOnDispose::new(self, f)
  }

  // ==================== Bridges ====================

  /// A [`Flowable`] of at most one value, emitted once requested.
  fn to_flowable(self) -> MaybeToFlowable<Self> { MaybeToFlowable::new(self) }

  /// Blocks until the outcome arrives; `None` for an empty completion.
  fn blocking_get(self) -> Result<Option<Self::Item>, Error> {
    self.blocking_get_with(&Interrupt::new())
  }

  /// [`blocking_get`](Self::blocking_get) that `interrupt` can wake early
  /// with [`Error::Interrupted`].
  fn blocking_get_with(self, interrupt: &Interrupt) -> Result<Option<Self::Item>, Error> {
    bridge::blocking_get(self, interrupt)
  }

  /// Subscribes right away; the future resolves with the outcome and
  /// disposes the subscription when dropped early.
  fn into_future(self) -> MaybeFuture<Self::Item> { MaybeFuture::new(self) }
}

// ==================== Boxed ====================

/// Object-safe mirror of [`MaybeObserver`].
pub trait DynMaybeObserver<T>: Send {
  fn box_on_subscribe(&mut self, disposable: BoxDisposable);

  fn box_on_success(self: Box<Self>, value: T);

  fn box_on_complete(self: Box<Self>);

  fn box_on_error(self: Box<Self>, err: Error);
}

impl<T, O: MaybeObserver<T>> DynMaybeObserver<T> for O {
  fn box_on_subscribe(&mut self, disposable: BoxDisposable) { self.on_subscribe(disposable) }

  fn box_on_success(self: Box<Self>, value: T) { (*self).on_success(value) }

  fn box_on_complete(self: Box<Self>) { (*self).on_complete() }

  fn box_on_error(self: Box<Self>, err: Error) { (*self).on_error(err) }
}

pub type BoxMaybeObserver<T> = Box<dyn DynMaybeObserver<T>>;

impl<T: 'static> MaybeObserver<T> for BoxMaybeObserver<T> {
  fn on_subscribe(&mut self, disposable: BoxDisposable) { (**self).box_on_subscribe(disposable) }

  fn on_success(self, value: T) { self.box_on_success(value) }

  fn on_complete(self) { self.box_on_complete() }

  fn on_error(self, err: Error) { self.box_on_error(err) }
}

/// Object-safe mirror of [`Maybe`].
pub trait DynMaybe<T>: Send {
  fn box_subscribe(self: Box<Self>, observer: BoxMaybeObserver<T>);
}

impl<M: Maybe> DynMaybe<M::Item> for M {
  fn box_subscribe(self: Box<Self>, observer: BoxMaybeObserver<M::Item>) {
    (*self).subscribe_actual(observer)
  }
}

pub type BoxMaybe<T> = Box<dyn DynMaybe<T>>;

impl<T: Send + 'static> Maybe for BoxMaybe<T> {
  type Item = T;

  fn subscribe_actual<O: MaybeObserver<T>>(self, observer: O) {
    self.box_subscribe(Box::new(observer))
  }

  fn boxed(self) -> BoxMaybe<T> { self }
}

// ==================== Adapters ====================

/// Disposes a Maybe consumer's handle by cancelling a flowable upstream.
pub(crate) struct SubscriptionDisposable {
  upstream: Arc<dyn Subscription>,
  disposed: AtomicBool,
}

impl SubscriptionDisposable {
  pub fn new(upstream: Arc<dyn Subscription>) -> Arc<Self> {
    Arc::new(SubscriptionDisposable { upstream, disposed: AtomicBool::new(false) })
  }
}

impl Disposable for SubscriptionDisposable {
  fn dispose(&self) {
    if !self.disposed.swap(true, Ordering::AcqRel) {
      self.upstream.cancel();
    }
  }

  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

/// Cancels a Maybe source on behalf of a flowable consumer. Demand has no
/// meaning for it.
pub(crate) struct DisposableSubscription(pub BoxDisposable);

impl Subscription for DisposableSubscription {
  fn request(&self, n: u64) { validate_request(n); }

  fn cancel(&self) { self.0.dispose() }
}
