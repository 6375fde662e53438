use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use parking_lot::Mutex;

use super::{Maybe, MaybeObserver};
use crate::{
  disposable::{BoxDisposable, Disposable},
  error::Error,
  hooks,
};

#[derive(Clone)]
pub struct DoOnDispose<S, F> {
  source: S,
  func: F,
}

impl<S, F> DoOnDispose<S, F> {
  pub fn new(source: S, func: F) -> Self { DoOnDispose { source, func } }
}

impl<S, F> Maybe for DoOnDispose<S, F>
where
  S: Maybe,
  F: Fn() + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    self.source.subscribe_actual(DoOnDisposeObserver {
      observer,
      handle: Arc::new(Handle {
        func: self.func,
        upstream: Mutex::new(None),
        finished: AtomicBool::new(false),
      }),
    })
  }
}

struct Handle<F> {
  func: F,
  upstream: Mutex<Option<BoxDisposable>>,
  /// Set once an outcome passed or the consumer disposed.
  finished: AtomicBool,
}

impl<F: Fn() + Send + Sync + 'static> Disposable for Handle<F> {
  fn dispose(&self) {
    if self.finished.swap(true, Ordering::AcqRel) {
      return;
    }
    (self.func)();
    if let Some(upstream) = self.upstream.lock().take() {
      upstream.dispose();
    }
  }

  fn is_disposed(&self) -> bool { self.finished.load(Ordering::Acquire) }
}

struct DoOnDisposeObserver<O, F> {
  observer: O,
  handle: Arc<Handle<F>>,
}

impl<O, F> DoOnDisposeObserver<O, F> {
  fn finish(&self) -> bool { !self.handle.finished.swap(true, Ordering::AcqRel) }
}

impl<T, O, F> MaybeObserver<T> for DoOnDisposeObserver<O, F>
where
  T: Send + 'static,
  O: MaybeObserver<T>,
  F: Fn() + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) {
    *self.handle.upstream.lock() = Some(disposable);
    self.observer.on_subscribe(self.handle.clone());
  }

  fn on_success(self, value: T) {
    if self.finish() {
      self.observer.on_success(value)
    }
  }

  fn on_complete(self) {
    if self.finish() {
      self.observer.on_complete()
    }
  }

  fn on_error(self, err: Error) {
    if self.finish() {
      self.observer.on_error(err)
    } else {
      hooks::on_undeliverable(err)
    }
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
  fn runs_once_on_early_dispose() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let to = maybe::never::<i32>().do_on_dispose(move || {
      c.fetch_add(1, Ordering::SeqCst);
    });
    let to = to.test();
    to.dispose();
    to.dispose();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn skipped_after_the_outcome() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let to = maybe::just(1)
      .do_on_dispose(move || {
        c.fetch_add(1, Ordering::SeqCst);
      })
      .test();
    to.assert_value(1);
    to.dispose();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }
}
