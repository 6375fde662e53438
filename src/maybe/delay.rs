use std::sync::Arc;

use parking_lot::Mutex;

use super::{Maybe, MaybeObserver, SubscriptionDisposable};
use crate::{
  disposable::{BoxDisposable, Disposable, SerialDisposable},
  error::Error,
  flowable::Flowable,
  hooks,
  scheduler::{Duration, Scheduler},
  subscriber::Subscriber,
  subscription::{Subscription, Upstream, UNBOUNDED},
};

enum Outcome<T> {
  Success(T),
  Complete,
  Failed(Error),
}

impl<T> Outcome<T> {
  fn deliver<O: MaybeObserver<T>>(self, observer: O) {
    match self {
      Outcome::Success(value) => observer.on_success(value),
      Outcome::Complete => observer.on_complete(),
      Outcome::Failed(err) => observer.on_error(err),
    }
  }
}

// ==================== Delay ====================

/// Shifts the outcome `delay` later. Errors are delayed too unless
/// [`delay_error(false)`](Self::delay_error) is set.
#[derive(Clone)]
pub struct Delay<S, Sch> {
  source: S,
  delay: Duration,
  scheduler: Sch,
  delay_error: bool,
}

impl<S, Sch> Delay<S, Sch> {
  pub fn new(source: S, delay: Duration, scheduler: Sch) -> Self {
    Delay { source, delay, scheduler, delay_error: true }
  }

  pub fn delay_error(mut self, delay_error: bool) -> Self {
    self.delay_error = delay_error;
    self
  }
}

impl<S: Maybe, Sch: Scheduler> Maybe for Delay<S, Sch> {
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    self.source.subscribe_actual(DelayObserver {
      observer: Some(observer),
      serial: Arc::default(),
      delay: self.delay,
      scheduler: self.scheduler,
      delay_error: self.delay_error,
    })
  }
}

struct DelayObserver<O, Sch> {
  observer: Option<O>,
  serial: Arc<SerialDisposable>,
  delay: Duration,
  scheduler: Sch,
  delay_error: bool,
}

impl<O, Sch> DelayObserver<O, Sch> {
  fn schedule<T>(self, outcome: Outcome<T>, delay: Duration)
  where
    T: Send + 'static,
    O: MaybeObserver<T>,
    Sch: Scheduler,
  {
    let Some(observer) = self.observer else { return };
    if self.serial.is_disposed() {
      return;
    }
    let serial = self.serial.clone();
    let handle = self.scheduler.schedule_direct(
      Box::new(move || {
        if !serial.is_disposed() {
          outcome.deliver(observer);
        }
      }),
      delay,
    );
    self.serial.replace(Arc::new(handle));
  }
}

impl<T, O, Sch> MaybeObserver<T> for DelayObserver<O, Sch>
where
  T: Send + 'static,
  O: MaybeObserver<T>,
  Sch: Scheduler,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) {
    if let Some(observer) = self.observer.as_mut() {
      observer.on_subscribe(self.serial.clone());
    }
    self.serial.replace(disposable);
  }

  fn on_success(self, value: T) {
    let delay = self.delay;
    self.schedule(Outcome::Success(value), delay)
  }

  fn on_complete(self) {
    let delay = self.delay;
    self.schedule(Outcome::<T>::Complete, delay)
  }

  fn on_error(self, err: Error) {
    let delay = if self.delay_error { self.delay } else { Duration::ZERO };
    self.schedule(Outcome::<T>::Failed(err), delay)
  }
}

// ==================== DelayOther ====================

/// Holds the outcome back until `other` emits its first value or
/// completes. An error from `other` replaces the outcome; when both failed
/// the two errors are combined.
#[derive(Clone)]
pub struct DelayOther<S, P> {
  source: S,
  other: P,
}

impl<S, P> DelayOther<S, P> {
  pub fn new(source: S, other: P) -> Self { DelayOther { source, other } }
}

impl<S: Maybe, P: Flowable> Maybe for DelayOther<S, P> {
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    self.source.subscribe_actual(DelayOtherObserver {
      observer: Some(observer),
      other: self.other,
      serial: Arc::default(),
    })
  }
}

struct DelayOtherObserver<O, P> {
  observer: Option<O>,
  other: P,
  serial: Arc<SerialDisposable>,
}

impl<O, P: Flowable> DelayOtherObserver<O, P> {
  fn hold<T>(self, outcome: Outcome<T>)
  where
    T: Send + 'static,
    O: MaybeObserver<T>,
  {
    let Some(observer) = self.observer else { return };
    if self.serial.is_disposed() {
      return;
    }
    self.other.subscribe_actual(OtherSubscriber {
      held: Arc::new(Mutex::new(Some((observer, outcome)))),
      serial: self.serial,
      upstream: None,
    });
  }
}

impl<T, O, P> MaybeObserver<T> for DelayOtherObserver<O, P>
where
  T: Send + 'static,
  O: MaybeObserver<T>,
  P: Flowable,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) {
    if let Some(observer) = self.observer.as_mut() {
      observer.on_subscribe(self.serial.clone());
    }
    self.serial.replace(disposable);
  }

  fn on_success(self, value: T) { self.hold(Outcome::Success(value)) }

  fn on_complete(self) { self.hold(Outcome::<T>::Complete) }

  fn on_error(self, err: Error) { self.hold(Outcome::<T>::Failed(err)) }
}

struct OtherSubscriber<O, T> {
  held: Arc<Mutex<Option<(O, Outcome<T>)>>>,
  serial: Arc<SerialDisposable>,
  upstream: Option<Arc<dyn Subscription>>,
}

impl<O: MaybeObserver<T>, T: Send + 'static> OtherSubscriber<O, T> {
  fn release(&self) {
    let held = self.held.lock().take();
    if let Some((observer, outcome)) = held {
      if !self.serial.is_disposed() {
        outcome.deliver(observer);
      }
    }
  }
}

impl<U, O, T> Subscriber<U> for OtherSubscriber<O, T>
where
  U: Send + 'static,
  O: MaybeObserver<T>,
  T: Send + 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<U>) {
    let shared = upstream.into_shared();
    self.serial.replace(SubscriptionDisposable::new(shared.clone()));
    shared.request(UNBOUNDED);
    self.upstream = Some(shared);
  }

  fn on_next(&mut self, _: U) {
    if let Some(upstream) = self.upstream.take() {
      upstream.cancel();
      self.release();
    }
  }

  fn on_error(self, err: Error) {
    let held = self.held.lock().take();
    let Some((observer, outcome)) = held else {
      hooks::on_undeliverable(err);
      return;
    };
    if self.serial.is_disposed() {
      hooks::on_undeliverable(err);
      return;
    }
    match outcome {
      Outcome::Failed(first) => observer.on_error(Error::combine(first, err)),
      _ => observer.on_error(err),
    }
  }

  fn on_complete(self) { self.release() }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::{flowable::Emitter, prelude::*};

  #[test]
  fn delay_shifts_the_outcome() {
    let scheduler = TestScheduler::new();
    let to = maybe::just(1).delay(Duration::from_millis(10), scheduler.clone()).test();
    scheduler.advance_time_by(Duration::from_millis(9));
    to.assert_empty();
    scheduler.advance_time_by(Duration::from_millis(1));
    to.assert_value(1);
  }

  #[test]
  fn errors_are_delayed_unless_told_otherwise() {
    let scheduler = TestScheduler::new();
    let delayed = maybe::error::<i32>(Error::msg("x"))
      .delay(Duration::from_millis(10), scheduler.clone())
      .test();
    let immediate = maybe::error::<i32>(Error::msg("x"))
      .delay(Duration::from_millis(10), scheduler.clone())
      .delay_error(false)
      .test();
    scheduler.trigger_actions();
    delayed.assert_not_terminated();
    immediate.assert_error(&Error::msg("x"));
    scheduler.advance_time_by(Duration::from_millis(10));
    delayed.assert_error(&Error::msg("x"));
  }

  #[test]
  fn dispose_drops_the_scheduled_outcome() {
    let scheduler = TestScheduler::new();
    let to = maybe::just(1).delay(Duration::from_millis(10), scheduler.clone()).test();
    to.dispose();
    assert_eq!(scheduler.pending(), 0);
    scheduler.advance_time_by(Duration::from_millis(10));
    to.assert_not_terminated();
  }

  fn manual() -> (Arc<Mutex<Option<Emitter<i32>>>>, impl Flowable<Item = i32>) {
    let slot = Arc::new(Mutex::new(None));
    let s = slot.clone();
    let source = flowable::create(move |e| *s.lock() = Some(e), BackpressureStrategy::Buffer);
    (slot, source)
  }

  #[test]
  fn delay_other_waits_for_the_first_value() {
    let (slot, other) = manual();
    let to = maybe::just(1).delay_other(other).test();
    to.assert_empty();
    let mut emitter = slot.lock().take().unwrap();
    emitter.next(0);
    to.assert_value(1);
    assert!(emitter.is_cancelled());
  }

  #[test]
  fn delay_other_completion_releases_empty_outcome() {
    maybe::empty::<i32>().delay_other(flowable::empty::<()>()).test().assert_complete();
  }

  #[test]
  fn both_errors_are_combined() {
    let to = maybe::error::<i32>(Error::msg("main"))
      .delay_other(flowable::error::<()>(Error::msg("other")))
      .test();
    to.assert_error_matches(|err| matches!(err, Error::Composite(c) if c.len() == 2));
    maybe::just(1)
      .delay_other(flowable::error::<()>(Error::msg("other")))
      .test()
      .assert_error(&Error::msg("other"));
  }
}
