use std::sync::Arc;

use super::{Maybe, MaybeObserver};
use crate::{
  disposable::{BoxDisposable, Disposable, SerialDisposable},
  error::Error,
  hooks,
};

/// Relays the outcome of a follow-up source. The shared `serial` is the
/// consumer's handle; once it is disposed nothing is relayed.
pub(super) struct InnerObserver<O> {
  pub observer: O,
  pub serial: Arc<SerialDisposable>,
}

impl<T: Send + 'static, O: MaybeObserver<T>> MaybeObserver<T> for InnerObserver<O> {
  fn on_subscribe(&mut self, disposable: BoxDisposable) { self.serial.replace(disposable) }

  fn on_success(self, value: T) {
    if !self.serial.is_disposed() {
      self.observer.on_success(value)
    }
  }

  fn on_complete(self) {
    if !self.serial.is_disposed() {
      self.observer.on_complete()
    }
  }

  fn on_error(self, err: Error) {
    if self.serial.is_disposed() {
      hooks::on_undeliverable(err);
    } else {
      self.observer.on_error(err)
    }
  }
}

// ==================== FlatMap ====================

/// Maps the value to another source and relays its outcome.
#[derive(Clone)]
pub struct FlatMap<S, F> {
  source: S,
  mapper: F,
}

impl<S, F> FlatMap<S, F> {
  pub fn new(source: S, mapper: F) -> Self { FlatMap { source, mapper } }
}

impl<S, M, F> Maybe for FlatMap<S, F>
where
  S: Maybe,
  M: Maybe,
  F: Fn(S::Item) -> M + Send + Sync + 'static,
{
  type Item = M::Item;

  fn subscribe_actual<O: MaybeObserver<M::Item>>(self, observer: O) {
    self.source.subscribe_actual(FlatMapObserver {
      observer: Some(observer),
      mapper: self.mapper,
      serial: Arc::default(),
    })
  }
}

struct FlatMapObserver<O, F> {
  observer: Option<O>,
  mapper: F,
  serial: Arc<SerialDisposable>,
}

impl<T, M, O, F> MaybeObserver<T> for FlatMapObserver<O, F>
where
  T: Send + 'static,
  M: Maybe,
  O: MaybeObserver<M::Item>,
  F: Fn(T) -> M + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) {
    if let Some(observer) = self.observer.as_mut() {
      observer.on_subscribe(self.serial.clone());
    }
    self.serial.replace(disposable);
  }

  fn on_success(self, value: T) {
    let Some(observer) = self.observer else { return };
    if self.serial.is_disposed() {
      return;
    }
    (self.mapper)(value).subscribe_actual(InnerObserver { observer, serial: self.serial });
  }

  fn on_complete(self) {
    if let Some(observer) = self.observer {
      observer.on_complete();
    }
  }

  fn on_error(self, err: Error) {
    if let Some(observer) = self.observer {
      observer.on_error(err);
    }
  }
}

// ==================== SwitchIfEmpty ====================

/// Subscribes `other` only after the source completed empty.
#[derive(Clone)]
pub struct SwitchIfEmpty<S, M> {
  source: S,
  other: M,
}

impl<S, M> SwitchIfEmpty<S, M> {
  pub fn new(source: S, other: M) -> Self { SwitchIfEmpty { source, other } }
}

impl<S, M> Maybe for SwitchIfEmpty<S, M>
where
  S: Maybe,
  M: Maybe<Item = S::Item>,
{
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    self.source.subscribe_actual(SwitchIfEmptyObserver {
      observer: Some(observer),
      other: self.other,
      serial: Arc::default(),
    })
  }
}

struct SwitchIfEmptyObserver<O, M> {
  observer: Option<O>,
  other: M,
  serial: Arc<SerialDisposable>,
}

impl<T, O, M> MaybeObserver<T> for SwitchIfEmptyObserver<O, M>
where
  T: Send + 'static,
  O: MaybeObserver<T>,
  M: Maybe<Item = T>,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) {
    if let Some(observer) = self.observer.as_mut() {
      observer.on_subscribe(self.serial.clone());
    }
    self.serial.replace(disposable);
  }

  fn on_success(self, value: T) {
    if let Some(observer) = self.observer {
      observer.on_success(value);
    }
  }

  fn on_complete(self) {
    let Some(observer) = self.observer else { return };
    if self.serial.is_disposed() {
      return;
    }
    tracing::trace!("switch_if_empty: subscribing fallback");
    self.other.subscribe_actual(InnerObserver { observer, serial: self.serial });
  }

  fn on_error(self, err: Error) {
    if let Some(observer) = self.observer {
      observer.on_error(err);
    }
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
  fn flat_map_relays_the_inner_outcome() {
    maybe::just(2).flat_map(|v| maybe::just(v * 10)).test().assert_value(20);
    maybe::just(2).flat_map(|_| maybe::empty::<i32>()).test().assert_complete();
    maybe::empty::<i32>().flat_map(maybe::just).test().assert_complete();
  }

  #[test]
  fn disposing_reaches_the_inner_source() {
    let disposed = Arc::new(AtomicBool::new(false));
    let d = disposed.clone();
    let to = maybe::just(1)
      .flat_map(move |_| {
        let d = d.clone();
        maybe::never::<i32>().do_on_dispose(move || d.store(true, Ordering::SeqCst))
      })
      .test();
    to.assert_empty();
    to.dispose();
    assert!(disposed.load(Ordering::SeqCst));
  }

  #[test]
  fn switch_if_empty_only_runs_for_empty_sources() {
    maybe::just(1).switch_if_empty(maybe::just(2)).test().assert_value(1);
    maybe::empty().switch_if_empty(maybe::just(2)).test().assert_value(2);
  }

  #[test]
  fn disposing_before_the_fallback_keeps_its_result_away() {
    let scheduler = TestScheduler::new();
    let to = maybe::timer(Duration::from_millis(5), scheduler.clone())
      .filter(|_| false)
      .switch_if_empty(maybe::timer(Duration::from_millis(5), scheduler.clone()))
      .test();
    scheduler.advance_time_by(Duration::from_millis(5));
    to.assert_empty();
    to.dispose();
    scheduler.advance_time_by(Duration::from_millis(5));
    to.assert_not_terminated();
    assert_eq!(scheduler.pending(), 0);
  }
}
