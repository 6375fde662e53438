//! The 0..N value stream with backpressure.
//!
//! A [`Flowable`] is a recipe: nothing happens until it is subscribed, and
//! every subscription builds its own chain of operator state. Operators are
//! plain structs that wrap their source, so a pipeline is one monomorphized
//! type; [`boxed`](Flowable::boxed) erases it when needed.
//!
//! ```rust
//! use rxflow::prelude::*;
//!
//! let ts = flowable::merge([flowable::just(1), flowable::just(2)])
//!   .concat_map(|v| flowable::range(v * 10, 2))
//!   .test();
//! ts.assert_result(&[10, 11, 20, 21]);
//! ```

use std::sync::Arc;

use crate::{
  config,
  disposable::BoxDisposable,
  error::Error,
  function::{Fallible, Infallible},
  maybe::Maybe,
  notification::Notification,
  ops::{
    amb::Amb,
    backpressure::{OnBackpressureBuffer, OnBackpressureDrop, OnBackpressureLatest},
    blocking::{self, BlockingIter, Interrupt},
    collect::Collect,
    concat_map::{ConcatMap, ErrorMode},
    concat_map_eager::ConcatMapEager,
    concat_map_maybe::ConcatMapMaybe,
    contains::Contains,
    debounce::ThrottleWithTimeout,
    delay::{Delay, DelaySubscription},
    filter::Filter,
    first::FirstElement,
    flat_map::FlatMap,
    hide::Hide,
    into_stream::FlowableStream,
    last::LastElement,
    lifecycle::{DoOnCancel, DoOnNext, DoOnRequest, Finalize},
    map::Map,
    materialize::{Dematerialize, Materialize},
    observe_on::ObserveOn,
    on_error::{OnErrorComplete, OnErrorResumeNext, OnErrorReturn},
    reduce::Reduce,
    scan::Scan,
    subscribe_on::SubscribeOn,
    switch_map::SwitchMap,
    take::Take,
    throttle_last::ThrottleLast,
    timeout::Timeout,
  },
  scheduler::{Duration, Scheduler},
  subscriber::{BoxSubscriber, LambdaSubscriber, Subscriber},
  testing::TestSubscriber,
};

mod create;
mod defer;
mod from_iter;
mod timer;
mod trivial;

pub use create::{create, BackpressureStrategy, Create, Emitter};
pub use defer::{defer, Defer};
pub use from_iter::{empty, from_iter, just, range, Empty, FromIter, Just, Range};
pub use timer::{interval, timer, Interval, Timer};
pub use trivial::{error, never, ErrorSource, Never};

pub trait Flowable: Sized + Send + 'static {
  type Item: Send + 'static;

  /// Connects `subscriber` to a fresh instance of this stream.
  ///
  /// Implementations call `on_subscribe` exactly once before any other
  /// signal and never call into the subscriber while its `on_subscribe` is
  /// still running.
  fn subscribe_actual<S: Subscriber<Self::Item>>(self, subscriber: S);

  // ==================== Subscribing ====================

  fn subscribe_with<S: Subscriber<Self::Item>>(self, subscriber: S) { self.subscribe_actual(subscriber) }

  /// Requests everything and calls `on_next` per value. Errors go to the
  /// error hook.
  fn subscribe<N>(self, on_next: N) -> BoxDisposable
  where
    N: FnMut(Self::Item) + Send + 'static,
  {
    self.subscribe_all(on_next, crate::subscriber::lambda::unhandled, || {})
  }

  fn subscribe_all<N, E, C>(self, on_next: N, on_error: E, on_complete: C) -> BoxDisposable
  where
    N: FnMut(Self::Item) + Send + 'static,
    E: FnOnce(Error) + Send + 'static,
    C: FnOnce() + Send + 'static,
  {
    let subscriber = LambdaSubscriber::new(on_next, on_error, on_complete);
    let handle = subscriber.handle();
    self.subscribe_actual(subscriber);
    handle
  }

  /// Subscribes a [`TestSubscriber`] that requests everything.
  fn test(self) -> TestSubscriber<Self::Item> {
    let ts = TestSubscriber::new();
    self.subscribe_actual(ts.clone());
    ts
  }

  /// Subscribes a [`TestSubscriber`] that initially requests `n`.
  fn test_with(self, n: u64) -> TestSubscriber<Self::Item> {
    let ts = TestSubscriber::with_request(n);
    self.subscribe_actual(ts.clone());
    ts
  }

  fn boxed(self) -> BoxFlowable<Self::Item> { Box::new(self) }

  // ==================== Transforming ====================

  fn map<B, F>(self, f: F) -> Map<Self, Infallible<F>>
  where
    B: Send + 'static,
    F: Fn(Self::Item) -> B + Send + Sync + 'static,
  {
    Map::new(self, Infallible(f))
  }

  /// Like [`map`](Self::map); an `Err` cancels the upstream and fails the
  /// stream.
  fn try_map<B, F>(self, f: F) -> Map<Self, Fallible<F>>
  where
    B: Send + 'static,
    F: Fn(Self::Item) -> Result<B, Error> + Send + Sync + 'static,
  {
    Map::new(self, Fallible(f))
  }

  fn filter<F>(self, predicate: F) -> Filter<Self, Infallible<F>>
  where
    F: Fn(&Self::Item) -> bool + Send + Sync + 'static,
  {
    Filter::new(self, Infallible(predicate))
  }

  fn try_filter<F>(self, predicate: F) -> Filter<Self, Fallible<F>>
  where
    F: Fn(&Self::Item) -> Result<bool, Error> + Send + Sync + 'static,
  {
    Filter::new(self, Fallible(predicate))
  }

  /// Emits every intermediate accumulation; the seed itself is not emitted.
  fn scan<B, F>(self, seed: B, f: F) -> Scan<Self, F, B>
  where
    B: Clone + Send + Sync + 'static,
    F: Fn(B, Self::Item) -> B + Send + Sync + 'static,
  {
    Scan::new(self, seed, f)
  }

  fn take(self, count: u64) -> Take<Self> { Take::new(self, count) }

  /// Hides the identity of the upstream, which also disables fusion.
  fn hide(self) -> Hide<Self> { Hide::new(self) }

  fn materialize(self) -> Materialize<Self> { Materialize::new(self) }

  /// Turns notifications selected from each value back into signals.
  fn dematerialize<R, F>(self, selector: F) -> Dematerialize<Self, F>
  where
    R: Send + 'static,
    F: Fn(Self::Item) -> Notification<R> + Send + Sync + 'static,
  {
    Dematerialize::new(self, selector)
  }

  // ==================== Side effects ====================

  fn do_on_next<F>(self, f: F) -> DoOnNext<Self, F>
  where
    F: Fn(&Self::Item) + Send + Sync + 'static,
  {
    DoOnNext::new(self, f)
  }

  fn do_on_request<F>(self, f: F) -> DoOnRequest<Self, F>
  where
    F: Fn(u64) + Send + Sync + 'static,
  {
    DoOnRequest::new(self, f)
  }

  fn do_on_cancel<F>(self, f: F) -> DoOnCancel<Self, F>
  where
    F: Fn() + Send + Sync + 'static,
  {
    DoOnCancel::new(self, f)
  }

  /// Runs `f` once, after the stream terminated or was cancelled.
  fn finalize<F>(self, f: F) -> Finalize<Self, F>
  where
    F: FnOnce() + Send + 'static,
  {
    Finalize::new(self, f)
  }

  // ==================== Combining ====================

  /// Merges the inner streams `mapper` returns. Tune with
  /// [`FlatMap::max_concurrency`], [`FlatMap::prefetch`] and
  /// [`FlatMap::delay_errors`].
  fn flat_map<P, F>(self, mapper: F) -> FlatMap<Self, Infallible<F>>
  where
    P: Flowable,
    F: Fn(Self::Item) -> P + Send + Sync + 'static,
  {
    FlatMap::new(self, Infallible(mapper))
  }

  /// [`flat_map`](Self::flat_map) that pairs each inner value with the outer
  /// value it came from.
  fn flat_map_with<P, R, F, C>(self, mapper: F, combiner: C) -> impl Flowable<Item = R>
  where
    Self::Item: Clone + Sync,
    P: Flowable,
    R: Send + 'static,
    F: Fn(Self::Item) -> P + Send + Sync + 'static,
    C: Fn(Self::Item, P::Item) -> R + Send + Sync + 'static,
  {
    let combiner = Arc::new(combiner);
    self.flat_map(move |outer: Self::Item| {
      let combiner = combiner.clone();
      let inner = mapper(outer.clone());
      inner.map(move |value| combiner(outer.clone(), value))
    })
  }

  fn merge_with<P>(self, other: P) -> impl Flowable<Item = Self::Item>
  where
    P: Flowable<Item = Self::Item>,
  {
    merge([self.boxed(), other.boxed()])
  }

  /// Subscribes the inner streams one after another.
  fn concat_map<P, F>(self, mapper: F) -> ConcatMap<Self, Infallible<F>>
  where
    P: Flowable,
    F: Fn(Self::Item) -> P + Send + Sync + 'static,
  {
    ConcatMap::new(self, Infallible(mapper))
  }

  /// [`concat_map`](Self::concat_map) that reports errors only after every
  /// inner stream ran.
  fn concat_map_delay_error<P, F>(self, mapper: F) -> ConcatMap<Self, Infallible<F>>
  where
    P: Flowable,
    F: Fn(Self::Item) -> P + Send + Sync + 'static,
  {
    ConcatMap::new(self, Infallible(mapper)).error_mode(ErrorMode::End)
  }

  /// Subscribes inner streams eagerly but emits them strictly in order.
  fn concat_map_eager<P, F>(self, mapper: F) -> ConcatMapEager<Self, Infallible<F>>
  where
    P: Flowable,
    F: Fn(Self::Item) -> P + Send + Sync + 'static,
  {
    ConcatMapEager::new(self, Infallible(mapper))
  }

  /// Maps every value to a [`Maybe`] and emits their results in order.
  fn concat_map_maybe<M, F>(self, mapper: F) -> ConcatMapMaybe<Self, F>
  where
    M: Maybe,
    F: Fn(Self::Item) -> M + Send + Sync + 'static,
  {
    ConcatMapMaybe::new(self, mapper)
  }

  fn concat_with<P>(self, other: P) -> impl Flowable<Item = Self::Item>
  where
    P: Flowable<Item = Self::Item>,
  {
    concat([self.boxed(), other.boxed()])
  }

  fn start_with<I>(self, values: I) -> impl Flowable<Item = Self::Item>
  where
    I: IntoIterator<Item = Self::Item>,
    I::IntoIter: Send + 'static,
  {
    concat([from_iter(values).boxed(), self.boxed()])
  }

  /// Mirrors the newest inner stream, cancelling the previous one.
  fn switch_map<P, F>(self, mapper: F) -> SwitchMap<Self, Infallible<F>>
  where
    P: Flowable,
    F: Fn(Self::Item) -> P + Send + Sync + 'static,
  {
    SwitchMap::new(self, Infallible(mapper))
  }

  // ==================== Errors ====================

  fn on_error_return<F>(self, f: F) -> OnErrorReturn<Self, F>
  where
    F: Fn(Error) -> Self::Item + Send + Sync + 'static,
  {
    OnErrorReturn::new(self, f)
  }

  fn on_error_complete(self) -> OnErrorComplete<Self> { OnErrorComplete::new(self) }

  fn on_error_resume_next<P, F>(self, f: F) -> OnErrorResumeNext<Self, F>
  where
    P: Flowable<Item = Self::Item>,
    F: Fn(Error) -> P + Send + Sync + 'static,
  {
    OnErrorResumeNext::new(self, f)
  }

  // ==================== Time & scheduling ====================

  /// Delivers signals on a worker of `scheduler`.
  fn observe_on<Sch: Scheduler>(self, scheduler: Sch) -> ObserveOn<Self, Sch> {
    ObserveOn::new(self, scheduler)
  }

  /// Subscribes to the upstream on a worker of `scheduler`.
  fn subscribe_on<Sch: Scheduler>(self, scheduler: Sch) -> SubscribeOn<Self, Sch> {
    SubscribeOn::new(self, scheduler)
  }

  /// Shifts every value and the completion by `delay`. Errors are delivered
  /// right away unless [`Delay::delay_error`] is set.
  fn delay<Sch: Scheduler>(self, delay: Duration, scheduler: Sch) -> Delay<Self, Sch> {
    Delay::new(self, delay, scheduler)
  }

  /// Subscribes to this stream once `other` emits or completes.
  fn delay_subscription<P: Flowable>(self, other: P) -> DelaySubscription<Self, P> {
    DelaySubscription::new(self, other)
  }

  /// Fails with [`Error::Timeout`] when the first value, or the next one,
  /// does not arrive within `timeout`.
  fn timeout<Sch: Scheduler>(self, timeout: Duration, scheduler: Sch)
    -> impl Flowable<Item = Self::Item> {
    let per_item = scheduler.clone();
    Timeout::new(self, timer(timeout, scheduler), move |_: &Self::Item| {
      timer(timeout, per_item.clone())
    })
    .with_error(Error::Timeout(timeout))
  }

  /// Switches to `fallback` when a value does not arrive within `timeout`.
  fn timeout_fallback<Sch, P>(self, timeout: Duration, scheduler: Sch, fallback: P)
    -> impl Flowable<Item = Self::Item>
  where
    Sch: Scheduler,
    P: Flowable<Item = Self::Item>,
  {
    let per_item = scheduler.clone();
    Timeout::new(self, timer(timeout, scheduler), move |_: &Self::Item| {
      timer(timeout, per_item.clone())
    })
    .with_error(Error::Timeout(timeout))
    .with_fallback(fallback)
  }

  /// Times out when `first` signals before the first value, or when the
  /// stream `per_item` returns for a value signals before the next value.
  fn timeout_selector<P0, P, F>(self, first: P0, per_item: F) -> Timeout<Self, P0, F>
  where
    P0: Flowable,
    P: Flowable,
    F: Fn(&Self::Item) -> P + Send + Sync + 'static,
  {
    Timeout::new(self, first, per_item)
  }

  /// Emits the latest value of every `period`; older values of the same
  /// period are dropped.
  fn throttle_last<Sch: Scheduler>(self, period: Duration, scheduler: Sch) -> ThrottleLast<Self, Sch> {
    ThrottleLast::new(self, period, scheduler)
  }

  /// Emits a value once `timeout` passed without a newer one.
  fn throttle_with_timeout<Sch: Scheduler>(self, timeout: Duration, scheduler: Sch)
    -> ThrottleWithTimeout<Self, Sch> {
    ThrottleWithTimeout::new(self, timeout, scheduler)
  }

  /// Alias of [`throttle_with_timeout`](Self::throttle_with_timeout).
  fn debounce<Sch: Scheduler>(self, timeout: Duration, scheduler: Sch) -> ThrottleWithTimeout<Self, Sch> {
    ThrottleWithTimeout::new(self, timeout, scheduler)
  }

  // ==================== Backpressure ====================

  /// Buffers values the downstream has not requested yet.
  fn on_backpressure_buffer(self) -> OnBackpressureBuffer<Self> { OnBackpressureBuffer::new(self) }

  /// Drops values the downstream has not requested.
  fn on_backpressure_drop(self) -> OnBackpressureDrop<Self> { OnBackpressureDrop::new(self) }

  /// Keeps only the latest value the downstream has not requested.
  fn on_backpressure_latest(self) -> OnBackpressureLatest<Self> { OnBackpressureLatest::new(self) }

  // ==================== To Maybe ====================

  fn first_element(self) -> FirstElement<Self> { FirstElement::new(self) }

  fn last_element(self) -> LastElement<Self> { LastElement::new(self) }

  /// Folds every value with `f`; empty when the stream is.
  fn reduce<F>(self, f: F) -> Reduce<Self, F>
  where
    F: Fn(Self::Item, Self::Item) -> Self::Item + Send + Sync + 'static,
  {
    Reduce::new(self, f)
  }

  /// Collects every value into a fresh container per subscription.
  fn collect<C, I, F>(self, init: I, accumulate: F) -> Collect<Self, I, C>
  where
    C: Send + 'static,
    I: Fn() -> C + Send + Sync + 'static,
    F: Fn(&mut C, Self::Item) + Send + Sync + 'static,
  {
    Collect::new(self, init, move |acc: &mut C, value| {
      accumulate(acc, value);
      Ok(())
    })
  }

  /// [`collect`](Self::collect) with a fallible accumulator.
  fn try_collect<C, I, F>(self, init: I, accumulate: F) -> Collect<Self, I, C>
  where
    C: Send + 'static,
    I: Fn() -> C + Send + Sync + 'static,
    F: Fn(&mut C, Self::Item) -> Result<(), Error> + Send + Sync + 'static,
  {
    Collect::new(self, init, accumulate)
  }

  fn to_list(self) -> Collect<Self, fn() -> Vec<Self::Item>, Vec<Self::Item>> {
    Collect::new(self, Vec::new as fn() -> Vec<Self::Item>, |acc: &mut Vec<Self::Item>, v| {
      acc.push(v);
      Ok(())
    })
  }

  /// Succeeds with `true` at the first equal value, `false` on an empty or
  /// exhausted stream.
  fn contains(self, value: Self::Item) -> Contains<Self>
  where
    Self::Item: PartialEq + Sync,
  {
    Contains::new(self, value)
  }

  // ==================== Bridges ====================

  /// Blocks until the stream terminates, calling the callbacks on the
  /// current thread.
  fn blocking_subscribe<N, E, C>(self, on_next: N, on_error: E, on_complete: C)
  where
    N: FnMut(Self::Item),
    E: FnOnce(Error),
    C: FnOnce(),
  {
    blocking::subscribe(self, &Interrupt::new(), on_next, on_error, on_complete)
  }

  /// [`blocking_subscribe`](Self::blocking_subscribe) that can be woken up
  /// early by `interrupt`, which fails the stream with
  /// [`Error::Interrupted`].
  fn blocking_subscribe_with<N, E, C>(
    self, interrupt: &Interrupt, on_next: N, on_error: E, on_complete: C,
  ) where
    N: FnMut(Self::Item),
    E: FnOnce(Error),
    C: FnOnce(),
  {
    blocking::subscribe(self, interrupt, on_next, on_error, on_complete)
  }

  /// The first value, `None` for an empty stream.
  fn blocking_first(self) -> Result<Option<Self::Item>, Error> {
    self.first_element().blocking_get()
  }

  /// The last value, `None` for an empty stream.
  fn blocking_last(self) -> Result<Option<Self::Item>, Error> { self.last_element().blocking_get() }

  /// Iterates the values on the current thread, prefetching
  /// [`config::buffer_size`] at a time.
  fn blocking_iter(self) -> BlockingIter<Self::Item> { BlockingIter::new(self, config::buffer_size()) }

  /// A `futures::Stream` of the values; an error ends the stream after
  /// being yielded.
  fn into_stream(self) -> FlowableStream<Self::Item> {
    FlowableStream::new(self, config::buffer_size())
  }
}

// ==================== Boxed ====================

/// Object-safe mirror of [`Flowable`].
pub trait DynFlowable<T>: Send {
  fn box_subscribe(self: Box<Self>, subscriber: BoxSubscriber<T>);
}

impl<F: Flowable> DynFlowable<F::Item> for F {
  fn box_subscribe(self: Box<Self>, subscriber: BoxSubscriber<F::Item>) {
    (*self).subscribe_actual(subscriber)
  }
}

pub type BoxFlowable<T> = Box<dyn DynFlowable<T>>;

impl<T: Send + 'static> Flowable for BoxFlowable<T> {
  type Item = T;

  fn subscribe_actual<S: Subscriber<T>>(self, subscriber: S) { self.box_subscribe(Box::new(subscriber)) }

  fn boxed(self) -> BoxFlowable<T> { self }
}

// ==================== Static combinators ====================

type Identity<P> = Infallible<fn(P) -> P>;

fn identity<P>(p: P) -> P { p }

/// Subscribes to every source at once and interleaves their values.
pub fn merge<I>(sources: I) -> FlatMap<FromIter<I::IntoIter>, Identity<I::Item>>
where
  I: IntoIterator,
  I::IntoIter: Send + 'static,
  I::Item: Flowable,
{
  FlatMap::new(from_iter(sources), Infallible(identity as fn(I::Item) -> I::Item))
}

/// [`merge`] that reports errors after every source terminated.
pub fn merge_delay_error<I>(sources: I) -> FlatMap<FromIter<I::IntoIter>, Identity<I::Item>>
where
  I: IntoIterator,
  I::IntoIter: Send + 'static,
  I::Item: Flowable,
{
  merge(sources).delay_errors(true)
}

/// Runs the sources one after another.
pub fn concat<I>(sources: I) -> ConcatMap<FromIter<I::IntoIter>, Identity<I::Item>>
where
  I: IntoIterator,
  I::IntoIter: Send + 'static,
  I::Item: Flowable,
{
  ConcatMap::new(from_iter(sources), Infallible(identity as fn(I::Item) -> I::Item))
}

/// Subscribes the sources eagerly and emits them in order.
pub fn concat_eager<I>(sources: I) -> ConcatMapEager<FromIter<I::IntoIter>, Identity<I::Item>>
where
  I: IntoIterator,
  I::IntoIter: Send + 'static,
  I::Item: Flowable,
{
  ConcatMapEager::new(from_iter(sources), Infallible(identity as fn(I::Item) -> I::Item))
}

/// Mirrors whichever source signals first and cancels the rest.
pub fn amb<I>(sources: I) -> Amb<I::Item>
where
  I: IntoIterator,
  I::Item: Flowable,
{
  Amb::new(sources.into_iter().collect())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::prelude::*;

  #[test]
  fn boxed_flowables_compose() {
    let sources: Vec<BoxFlowable<i32>> =
      vec![flowable::just(1).boxed(), flowable::range(2, 2).boxed(), flowable::empty().boxed()];
    flowable::concat(sources).test().assert_result(&[1, 2, 3]);
  }

  #[test]
  fn start_with_and_concat_with() {
    flowable::just(3)
      .start_with([1, 2])
      .concat_with(flowable::just(4))
      .test()
      .assert_result(&[1, 2, 3, 4]);
  }

  #[test]
  fn merge_with_interleaves_synchronous_sources_in_order() {
    flowable::range(1, 2).merge_with(flowable::range(10, 2)).test().assert_result(&[1, 2, 10, 11]);
  }

  #[test]
  fn flat_map_with_pairs_outer_and_inner() {
    flowable::range(1, 2)
      .flat_map_with(|v| flowable::range(0, v as u32), |outer, inner| outer * 10 + inner)
      .test()
      .assert_result(&[10, 20, 21]);
  }

  #[test]
  fn subscribe_returns_a_handle() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let s = seen.clone();
    let handle = flowable::range(1, 3).subscribe(move |v| s.lock().push(v));
    assert!(handle.is_disposed());
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
  }
}
