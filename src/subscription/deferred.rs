use std::sync::Arc;

use parking_lot::Mutex;

use super::{validate_request, Subscription, UNBOUNDED};
use crate::{error::ProtocolViolation, hooks};

/// Accumulates requests and cancellation until the real upstream arrives.
///
/// Operators that must call `on_subscribe` downstream before they have an
/// upstream of their own (`subscribe_on`, `delay_subscription`, `amb`) hand
/// this out and fill it in later with [`set`](Self::set).
#[derive(Default)]
pub struct DeferredSubscription {
  inner: Mutex<Deferred>,
}

#[derive(Default)]
struct Deferred {
  upstream: Option<Arc<dyn Subscription>>,
  pending: u64,
  cancelled: bool,
}

impl DeferredSubscription {
  /// Installs the upstream and forwards any demand accumulated so far.
  /// Returns `false` if the deferred was cancelled first.
  pub fn set(&self, upstream: Arc<dyn Subscription>) -> bool {
    let mut inner = self.inner.lock();
    if inner.cancelled {
      drop(inner);
      upstream.cancel();
      return false;
    }
    if inner.upstream.is_some() {
      drop(inner);
      upstream.cancel();
      hooks::on_undeliverable(ProtocolViolation::SubscriptionAlreadySet.into());
      return false;
    }
    inner.upstream = Some(upstream.clone());
    let pending = std::mem::take(&mut inner.pending);
    drop(inner);
    if pending > 0 {
      upstream.request(pending);
    }
    true
  }

  pub fn is_cancelled(&self) -> bool { self.inner.lock().cancelled }

  /// Drops the upstream reference after it terminated.
  pub fn release(&self) { self.inner.lock().upstream = None; }
}

impl Subscription for DeferredSubscription {
  fn request(&self, n: u64) {
    if !validate_request(n) {
      return;
    }
    let mut inner = self.inner.lock();
    let upstream = inner.upstream.clone();
    match upstream {
      Some(upstream) => {
        drop(inner);
        upstream.request(n);
      }
      None if !inner.cancelled => {
        inner.pending = if n == UNBOUNDED { UNBOUNDED } else { inner.pending.saturating_add(n) };
      }
      None => {}
    }
  }

  fn cancel(&self) {
    let upstream = {
      let mut inner = self.inner.lock();
      if inner.cancelled {
        return;
      }
      inner.cancelled = true;
      inner.upstream.take()
    };
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

  #[derive(Default)]
  struct Probe {
    requested: AtomicU64,
    cancelled: AtomicUsize,
  }

  impl Subscription for Probe {
    fn request(&self, n: u64) { self.requested.fetch_add(n, Ordering::SeqCst); }
    fn cancel(&self) { self.cancelled.fetch_add(1, Ordering::SeqCst); }
  }

  #[test]
  fn forwards_accumulated_demand() {
    let deferred = DeferredSubscription::default();
    deferred.request(2);
    deferred.request(3);
    let probe = Arc::new(Probe::default());
    assert!(deferred.set(probe.clone()));
    assert_eq!(probe.requested.load(Ordering::SeqCst), 5);
    deferred.request(1);
    assert_eq!(probe.requested.load(Ordering::SeqCst), 6);
  }

  #[test]
  fn cancel_before_set_cancels_upstream_once() {
    let deferred = DeferredSubscription::default();
    deferred.cancel();
    deferred.cancel();
    let probe = Arc::new(Probe::default());
    assert!(!deferred.set(probe.clone()));
    assert_eq!(probe.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(probe.requested.load(Ordering::SeqCst), 0);
  }
}
