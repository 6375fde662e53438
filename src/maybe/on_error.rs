use std::sync::Arc;

use super::{flat_map::InnerObserver, Maybe, MaybeObserver};
use crate::{
  disposable::{BoxDisposable, Disposable, SerialDisposable},
  error::Error,
};

// ==================== OnErrorReturn ====================

/// Turns an error into a success with the value `func` returns.
#[derive(Clone)]
pub struct OnErrorReturn<S, F> {
  source: S,
  func: F,
}

impl<S, F> OnErrorReturn<S, F> {
  pub fn new(source: S, func: F) -> Self { OnErrorReturn { source, func } }
}

impl<S, F> Maybe for OnErrorReturn<S, F>
where
  S: Maybe,
  F: Fn(Error) -> S::Item + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    self.source.subscribe_actual(ReturnObserver { observer, func: self.func })
  }
}

struct ReturnObserver<O, F> {
  observer: O,
  func: F,
}

impl<T, O, F> MaybeObserver<T> for ReturnObserver<O, F>
where
  T: Send + 'static,
  O: MaybeObserver<T>,
  F: Fn(Error) -> T + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) { self.observer.on_subscribe(disposable) }

  fn on_success(self, value: T) { self.observer.on_success(value) }

  fn on_complete(self) { self.observer.on_complete() }

  fn on_error(self, err: Error) {
    tracing::debug!(error = %err, "maybe on_error_return: replacing error");
    self.observer.on_success((self.func)(err))
  }
}

// ==================== OnErrorComplete ====================

#[derive(Clone)]
pub struct OnErrorComplete<S> {
  source: S,
}

impl<S> OnErrorComplete<S> {
  pub fn new(source: S) -> Self { OnErrorComplete { source } }
}

impl<S: Maybe> Maybe for OnErrorComplete<S> {
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    self.source.subscribe_actual(CompleteObserver(observer))
  }
}

struct CompleteObserver<O>(O);

impl<T: Send + 'static, O: MaybeObserver<T>> MaybeObserver<T> for CompleteObserver<O> {
  fn on_subscribe(&mut self, disposable: BoxDisposable) { self.0.on_subscribe(disposable) }

  fn on_success(self, value: T) { self.0.on_success(value) }

  fn on_complete(self) { self.0.on_complete() }

  fn on_error(self, err: Error) {
    tracing::debug!(error = %err, "maybe on_error_complete: swallowing error");
    self.0.on_complete()
  }
}

// ==================== OnErrorResumeNext ====================

/// Continues with the source `func` builds from the error.
#[derive(Clone)]
pub struct OnErrorResumeNext<S, F> {
  source: S,
  func: F,
}

impl<S, F> OnErrorResumeNext<S, F> {
  pub fn new(source: S, func: F) -> Self { OnErrorResumeNext { source, func } }
}

impl<S, M, F> Maybe for OnErrorResumeNext<S, F>
where
  S: Maybe,
  M: Maybe<Item = S::Item>,
  F: Fn(Error) -> M + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    self.source.subscribe_actual(ResumeObserver {
      observer: Some(observer),
      func: self.func,
      serial: Arc::default(),
    })
  }
}

struct ResumeObserver<O, F> {
  observer: Option<O>,
  func: F,
  serial: Arc<SerialDisposable>,
}

impl<T, M, O, F> MaybeObserver<T> for ResumeObserver<O, F>
where
  T: Send + 'static,
  M: Maybe<Item = T>,
  O: MaybeObserver<T>,
  F: Fn(Error) -> M + Send + Sync + 'static,
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
    if let Some(observer) = self.observer {
      observer.on_complete();
    }
  }

  fn on_error(self, err: Error) {
    let Some(observer) = self.observer else { return };
    if self.serial.is_disposed() {
      return;
    }
    tracing::debug!(error = %err, "maybe on_error_resume_next: switching to fallback");
    (self.func)(err).subscribe_actual(InnerObserver { observer, serial: self.serial });
  }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn return_replaces_the_error() {
    maybe::error::<i32>(Error::msg("x")).on_error_return(|_| 7).test().assert_value(7);
    maybe::just(1).on_error_return(|_| 7).test().assert_value(1);
  }

  #[test]
  fn complete_swallows_the_error() {
    maybe::error::<i32>(Error::msg("x")).on_error_complete().test().assert_complete();
  }

  #[test]
  fn resume_switches_to_the_fallback() {
    maybe::error::<i32>(Error::msg("x"))
      .on_error_resume_next(|err| {
        assert_eq!(err, Error::msg("x"));
        maybe::just(9)
      })
      .test()
      .assert_value(9);
    maybe::error::<i32>(Error::msg("x"))
      .on_error_resume_next(|_| maybe::error(Error::msg("y")))
      .test()
      .assert_error(&Error::msg("y"));
  }
}
