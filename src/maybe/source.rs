use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use super::{Maybe, MaybeObserver};
use crate::{
  disposable::{BoolDisposable, Disposable, SerialDisposable},
  error::Error,
  scheduler::{Duration, Scheduler},
};

/// Succeeds with the given value.
#[derive(Clone)]
pub struct Just<T>(T);

pub fn just<T: Send + 'static>(value: T) -> Just<T> { Just(value) }

impl<T: Send + 'static> Maybe for Just<T> {
  type Item = T;

  fn subscribe_actual<O: MaybeObserver<T>>(self, mut observer: O) {
    let flag = Arc::new(BoolDisposable::default());
    observer.on_subscribe(flag.clone());
    if !flag.is_disposed() {
      observer.on_success(self.0);
    }
  }
}

/// Completes without a value.
pub struct Empty<T>(PhantomData<fn() -> T>);

impl<T> Clone for Empty<T> {
  fn clone(&self) -> Self { Empty(PhantomData) }
}

pub fn empty<T: Send + 'static>() -> Empty<T> { Empty(PhantomData) }

impl<T: Send + 'static> Maybe for Empty<T> {
  type Item = T;

  fn subscribe_actual<O: MaybeObserver<T>>(self, mut observer: O) {
    let flag = Arc::new(BoolDisposable::default());
    observer.on_subscribe(flag.clone());
    if !flag.is_disposed() {
      observer.on_complete();
    }
  }
}

/// Fails with the given error.
pub struct ErrorMaybe<T> {
  err: Error,
  _item: PhantomData<fn() -> T>,
}

impl<T> Clone for ErrorMaybe<T> {
  fn clone(&self) -> Self { ErrorMaybe { err: self.err.clone(), _item: PhantomData } }
}

pub fn error<T: Send + 'static>(err: Error) -> ErrorMaybe<T> {
  ErrorMaybe { err, _item: PhantomData }
}

impl<T: Send + 'static> Maybe for ErrorMaybe<T> {
  type Item = T;

  fn subscribe_actual<O: MaybeObserver<T>>(self, mut observer: O) {
    let flag = Arc::new(BoolDisposable::default());
    observer.on_subscribe(flag.clone());
    if !flag.is_disposed() {
      observer.on_error(self.err);
    }
  }
}

/// Never produces an outcome.
pub struct Never<T>(PhantomData<fn() -> T>);

impl<T> Clone for Never<T> {
  fn clone(&self) -> Self { Never(PhantomData) }
}

pub fn never<T: Send + 'static>() -> Never<T> { Never(PhantomData) }

impl<T: Send + 'static> Maybe for Never<T> {
  type Item = T;

  fn subscribe_actual<O: MaybeObserver<T>>(self, mut observer: O) {
    observer.on_subscribe(Arc::new(BoolDisposable::default()));
  }
}

/// Calls `f` on subscription: `Ok(Some(v))` succeeds, `Ok(None)` completes
/// empty, `Err` fails.
#[derive(Clone)]
pub struct FromFn<F>(F);

pub fn from_fn<T, F>(f: F) -> FromFn<F>
where
  T: Send + 'static,
  F: FnOnce() -> Result<Option<T>, Error> + Send + 'static,
{
  FromFn(f)
}

impl<T, F> Maybe for FromFn<F>
where
  T: Send + 'static,
  F: FnOnce() -> Result<Option<T>, Error> + Send + 'static,
{
  type Item = T;

  fn subscribe_actual<O: MaybeObserver<T>>(self, mut observer: O) {
    let flag = Arc::new(BoolDisposable::default());
    observer.on_subscribe(flag.clone());
    if flag.is_disposed() {
      return;
    }
    match (self.0)() {
      Ok(Some(value)) => observer.on_success(value),
      Ok(None) => observer.on_complete(),
      Err(err) => observer.on_error(err),
    }
  }
}

/// Builds the actual source per subscription.
#[derive(Clone)]
pub struct Defer<F>(F);

pub fn defer<M, F>(factory: F) -> Defer<F>
where
  M: Maybe,
  F: FnOnce() -> M + Send + 'static,
{
  Defer(factory)
}

impl<M, F> Maybe for Defer<F>
where
  M: Maybe,
  F: FnOnce() -> M + Send + 'static,
{
  type Item = M::Item;

  fn subscribe_actual<O: MaybeObserver<M::Item>>(self, observer: O) {
    (self.0)().subscribe_actual(observer)
  }
}

/// Succeeds with `0` after `delay`.
#[derive(Clone)]
pub struct Timer<Sch> {
  delay: Duration,
  scheduler: Sch,
}

pub fn timer<Sch: Scheduler>(delay: Duration, scheduler: Sch) -> Timer<Sch> {
  Timer { delay, scheduler }
}

impl<Sch: Scheduler> Maybe for Timer<Sch> {
  type Item = u64;

  fn subscribe_actual<O: MaybeObserver<u64>>(self, mut observer: O) {
    let task = Arc::new(SerialDisposable::default());
    observer.on_subscribe(task.clone());
    if task.is_disposed() {
      return;
    }
    let slot = Mutex::new(Some(observer));
    let handle = self.scheduler.schedule_direct(
      Box::new(move || {
        if let Some(observer) = slot.lock().take() {
          observer.on_success(0);
        }
      }),
      self.delay,
    );
    task.replace(Arc::new(handle));
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate::prelude::*;

  #[test]
  fn from_fn_maps_the_result() {
    maybe::from_fn(|| Ok(Some(1))).test().assert_value(1);
    maybe::from_fn(|| Ok(None::<i32>)).test().assert_complete();
    maybe::from_fn(|| Err::<Option<i32>, _>(Error::msg("x"))).test().assert_error(&Error::msg("x"));
  }

  #[test]
  fn defer_builds_per_subscription() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let source = maybe::defer(move || maybe::just(c.fetch_add(1, Ordering::SeqCst)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    source.test().assert_value(0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn timer_succeeds_after_the_delay() {
    let scheduler = TestScheduler::new();
    let to = maybe::timer(Duration::from_millis(5), scheduler.clone()).test();
    scheduler.advance_time_by(Duration::from_millis(4));
    to.assert_empty();
    scheduler.advance_time_by(Duration::from_millis(1));
    to.assert_value(0);
  }

  #[test]
  fn disposing_the_timer_cancels_it() {
    let scheduler = TestScheduler::new();
    let to = maybe::timer(Duration::from_millis(5), scheduler.clone()).test();
    to.dispose();
    assert_eq!(scheduler.pending(), 0);
    scheduler.advance_time_by(Duration::from_millis(5));
    to.assert_not_terminated();
  }

  #[test]
  fn never_stays_silent() {
    maybe::never::<i32>().test().assert_empty();
  }
}
