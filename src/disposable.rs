//! Cancellable resources: the handle returned by `subscribe`, timer tasks,
//! and the containers operators use to release several of them at once.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use parking_lot::Mutex;

use crate::subscription::DynamicSet;

/// A resource that can be released once.
///
/// `dispose` is idempotent: the release work runs on the first call only.
pub trait Disposable: Send + Sync + 'static {
  fn dispose(&self);

  fn is_disposed(&self) -> bool;

  /// Wraps `self` so it is disposed when the guard goes out of scope.
  fn dispose_when_dropped(self) -> DisposeGuard
  where
    Self: Sized,
  {
    DisposeGuard::new(Arc::new(self))
  }
}

pub type BoxDisposable = Arc<dyn Disposable>;

impl<D: Disposable + ?Sized> Disposable for Arc<D> {
  fn dispose(&self) { (**self).dispose() }

  fn is_disposed(&self) -> bool { (**self).is_disposed() }
}

/// Runs a closure on the first `dispose`.
pub struct ActionDisposable {
  disposed: AtomicBool,
  action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ActionDisposable {
  pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
    ActionDisposable { disposed: AtomicBool::new(false), action: Mutex::new(Some(Box::new(action))) }
  }
}

impl Disposable for ActionDisposable {
  fn dispose(&self) {
    if self.disposed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
      if let Some(action) = self.action.lock().take() {
        action();
      }
    }
  }

  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

/// A disposable that runs `action` once when disposed.
pub fn from_fn(action: impl FnOnce() + Send + 'static) -> BoxDisposable {
  Arc::new(ActionDisposable::new(action))
}

/// A disposable that is already disposed.
pub fn disposed() -> BoxDisposable {
  let flag = BoolDisposable::default();
  flag.dispose();
  Arc::new(flag)
}

/// Just a flag.
#[derive(Default)]
pub struct BoolDisposable(AtomicBool);

impl Disposable for BoolDisposable {
  fn dispose(&self) { self.0.store(true, Ordering::Release); }

  fn is_disposed(&self) -> bool { self.0.load(Ordering::Acquire) }
}

/// A set of disposables released together.
///
/// Anything added after `dispose` is disposed immediately.
#[derive(Default)]
pub struct CompositeDisposable {
  inner: Mutex<Option<DynamicSet<BoxDisposable>>>,
  disposed: AtomicBool,
}

impl CompositeDisposable {
  /// Adds `item` and returns its key, or disposes it right away if the
  /// composite is already disposed.
  pub fn add(&self, item: BoxDisposable) -> Option<usize> {
    let mut inner = self.inner.lock();
    if self.disposed.load(Ordering::Acquire) {
      drop(inner);
      item.dispose();
      return None;
    }
    Some(inner.get_or_insert_with(DynamicSet::default).add(item))
  }

  /// Forgets the item without disposing it.
  pub fn remove(&self, key: usize) -> Option<BoxDisposable> {
    self.inner.lock().as_mut().and_then(|set| set.remove(key))
  }

  /// Removes and disposes the item.
  pub fn delete(&self, key: usize) {
    if let Some(item) = self.remove(key) {
      item.dispose();
    }
  }

  pub fn len(&self) -> usize { self.inner.lock().as_ref().map_or(0, DynamicSet::len) }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Disposable for CompositeDisposable {
  fn dispose(&self) {
    let items = {
      let mut inner = self.inner.lock();
      if self.disposed.swap(true, Ordering::AcqRel) {
        return;
      }
      inner.take()
    };
    if let Some(mut items) = items {
      for item in items.drain() {
        item.dispose();
      }
    }
  }

  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

/// Holds one disposable at a time; replacing it is possible until the
/// serial itself is disposed.
#[derive(Default)]
pub struct SerialDisposable {
  inner: Mutex<Serial>,
}

#[derive(Default)]
struct Serial {
  current: Option<BoxDisposable>,
  disposed: bool,
}

impl SerialDisposable {
  /// Installs `next` and disposes the previous one.
  pub fn set(&self, next: BoxDisposable) {
    if let Some(prev) = self.swap(next) {
      prev.dispose();
    }
  }

  /// Installs `next` without touching the previous one.
  pub fn replace(&self, next: BoxDisposable) { self.swap(next); }

  fn swap(&self, next: BoxDisposable) -> Option<BoxDisposable> {
    let mut inner = self.inner.lock();
    if inner.disposed {
      drop(inner);
      next.dispose();
      return None;
    }
    inner.current.replace(next)
  }

  pub fn get(&self) -> Option<BoxDisposable> { self.inner.lock().current.clone() }

  /// Disposes the current item but keeps the serial usable.
  pub fn clear(&self) {
    let current = self.inner.lock().current.take();
    if let Some(current) = current {
      current.dispose();
    }
  }
}

impl Disposable for SerialDisposable {
  fn dispose(&self) {
    let current = {
      let mut inner = self.inner.lock();
      if inner.disposed {
        return;
      }
      inner.disposed = true;
      inner.current.take()
    };
    if let Some(current) = current {
      current.dispose();
    }
  }

  fn is_disposed(&self) -> bool { self.inner.lock().disposed }
}

/// Disposes the wrapped handle when dropped.
#[must_use = "the resource is released as soon as the guard is dropped"]
pub struct DisposeGuard(Option<BoxDisposable>);

impl DisposeGuard {
  pub fn new(inner: BoxDisposable) -> Self { DisposeGuard(Some(inner)) }

  /// Gives the handle back without disposing it.
  pub fn into_inner(mut self) -> BoxDisposable {
    match self.0.take() {
      Some(inner) => inner,
      None => disposed(),
    }
  }
}

impl Drop for DisposeGuard {
  fn drop(&mut self) {
    if let Some(inner) = self.0.take() {
      inner.dispose();
    }
  }
}
