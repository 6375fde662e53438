use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use parking_lot::Mutex;

use super::{flat_map::InnerObserver, BoxMaybe, Maybe, MaybeObserver};
use crate::{
  disposable::{BoxDisposable, Disposable, SerialDisposable},
  error::Error,
  hooks,
};

/// Races the source against an `indicator`. Whichever terminates first
/// wins; when the indicator does, the source is disposed and the consumer
/// gets the configured error or is switched to the fallback.
pub struct Timeout<S: Maybe, I> {
  source: S,
  indicator: I,
  error: Error,
  fallback: Option<BoxMaybe<S::Item>>,
}

impl<S: Maybe, I: Maybe> Timeout<S, I> {
  pub fn new(source: S, indicator: I) -> Self {
    Timeout { source, indicator, error: Error::Timeout(Default::default()), fallback: None }
  }

  /// The error delivered on timeout when there is no fallback.
  pub fn with_error(mut self, error: Error) -> Self {
    self.error = error;
    self
  }

  pub fn with_fallback<M: Maybe<Item = S::Item>>(mut self, fallback: M) -> Self {
    self.fallback = Some(fallback.boxed());
    self
  }
}

impl<S: Maybe, I: Maybe> Maybe for Timeout<S, I> {
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, mut observer: O) {
    let state = Arc::new(TimeoutState {
      downstream: Mutex::new(None),
      main: SerialDisposable::default(),
      other: SerialDisposable::default(),
      fallback: Arc::default(),
      done: AtomicBool::new(false),
    });
    observer.on_subscribe(state.clone());
    {
      let mut slot = state.downstream.lock();
      if state.done.load(Ordering::Acquire) {
        return;
      }
      *slot = Some(observer);
    }
    self.indicator.subscribe_actual(IndicatorObserver {
      state: state.clone(),
      fallback: self.fallback,
      error: self.error,
    });
    self.source.subscribe_actual(MainObserver { state });
  }
}

struct TimeoutState<O> {
  downstream: Mutex<Option<O>>,
  main: SerialDisposable,
  other: SerialDisposable,
  fallback: Arc<SerialDisposable>,
  done: AtomicBool,
}

impl<O: Send + 'static> TimeoutState<O> {
  /// Claims the single outcome; `None` when another party already won or
  /// the consumer disposed.
  fn win(&self) -> Option<O> {
    if self.done.swap(true, Ordering::AcqRel) {
      return None;
    }
    self.downstream.lock().take()
  }
}

impl<O: Send + 'static> Disposable for TimeoutState<O> {
  fn dispose(&self) {
    self.done.store(true, Ordering::Release);
    self.downstream.lock().take();
    self.main.dispose();
    self.other.dispose();
    self.fallback.dispose();
  }

  fn is_disposed(&self) -> bool { self.fallback.is_disposed() }
}

struct MainObserver<O> {
  state: Arc<TimeoutState<O>>,
}

impl<T: Send + 'static, O: MaybeObserver<T>> MaybeObserver<T> for MainObserver<O> {
  fn on_subscribe(&mut self, disposable: BoxDisposable) { self.state.main.replace(disposable) }

  fn on_success(self, value: T) {
    if let Some(observer) = self.state.win() {
      self.state.other.dispose();
      observer.on_success(value);
    }
  }

  fn on_complete(self) {
    if let Some(observer) = self.state.win() {
      self.state.other.dispose();
      observer.on_complete();
    }
  }

  fn on_error(self, err: Error) {
    match self.state.win() {
      Some(observer) => {
        self.state.other.dispose();
        observer.on_error(err);
      }
      None => hooks::on_undeliverable(err),
    }
  }
}

struct IndicatorObserver<T, O> {
  state: Arc<TimeoutState<O>>,
  fallback: Option<BoxMaybe<T>>,
  error: Error,
}

impl<T: Send + 'static, O: MaybeObserver<T>> IndicatorObserver<T, O> {
  fn timeout(self) {
    let Some(observer) = self.state.win() else { return };
    self.state.main.dispose();
    match self.fallback {
      Some(fallback) => {
        tracing::debug!("maybe timeout: switching to fallback");
        fallback.subscribe_actual(InnerObserver { observer, serial: self.state.fallback.clone() });
      }
      None => observer.on_error(self.error),
    }
  }
}

impl<U, T, O> MaybeObserver<U> for IndicatorObserver<T, O>
where
  U: Send + 'static,
  T: Send + 'static,
  O: MaybeObserver<T>,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) { self.state.other.replace(disposable) }

  fn on_success(self, _: U) { self.timeout() }

  fn on_complete(self) { self.timeout() }

  fn on_error(self, err: Error) {
    match self.state.win() {
      Some(observer) => {
        self.state.main.dispose();
        observer.on_error(err);
      }
      None => hooks::on_undeliverable(err),
    }
  }
}
