use std::sync::Arc;

use parking_lot::Mutex;

use super::{validate_request, Subscription, UNBOUNDED};

/// Switches a single downstream between successive upstreams while keeping
/// track of demand that has not been fulfilled yet.
///
/// The current upstream reports what it delivered through
/// [`produced`](Self::produced) before the next one is installed with
/// [`set_subscription`](Self::set_subscription); the new upstream then
/// receives the outstanding demand.
#[derive(Default)]
pub struct SubscriptionArbiter {
  inner: Mutex<ArbiterState>,
}

#[derive(Default)]
struct ArbiterState {
  current: Option<Arc<dyn Subscription>>,
  requested: u64,
  cancelled: bool,
}

impl SubscriptionArbiter {
  /// Replaces the current upstream without cancelling it.
  pub fn set_subscription(&self, next: Arc<dyn Subscription>) {
    let mut inner = self.inner.lock();
    if inner.cancelled {
      drop(inner);
      next.cancel();
      return;
    }
    inner.current = Some(next.clone());
    let outstanding = inner.requested;
    drop(inner);
    if outstanding > 0 {
      next.request(outstanding);
    }
  }

  /// Records `n` values delivered by the current upstream.
  pub fn produced(&self, n: u64) {
    if n == 0 {
      return;
    }
    let mut inner = self.inner.lock();
    if inner.requested != UNBOUNDED {
      inner.requested = inner.requested.saturating_sub(n);
    }
  }

  pub fn is_cancelled(&self) -> bool { self.inner.lock().cancelled }

  pub fn requested(&self) -> u64 { self.inner.lock().requested }
}

impl Subscription for SubscriptionArbiter {
  fn request(&self, n: u64) {
    if !validate_request(n) {
      return;
    }
    let current = {
      let mut inner = self.inner.lock();
      if inner.cancelled {
        return;
      }
      inner.requested = if n == UNBOUNDED { UNBOUNDED } else { inner.requested.saturating_add(n) };
      inner.current.clone()
    };
    if let Some(current) = current {
      current.request(n);
    }
  }

  fn cancel(&self) {
    let current = {
      let mut inner = self.inner.lock();
      if inner.cancelled {
        return;
      }
      inner.cancelled = true;
      inner.current.take()
    };
    if let Some(current) = current {
      current.cancel();
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
  fn carries_unfulfilled_demand_to_next_upstream() {
    let arbiter = SubscriptionArbiter::default();
    arbiter.request(5);
    let first = Arc::new(Probe::default());
    arbiter.set_subscription(first.clone());
    assert_eq!(first.requested.load(Ordering::SeqCst), 5);

    arbiter.produced(3);
    let second = Arc::new(Probe::default());
    arbiter.set_subscription(second.clone());
    assert_eq!(second.requested.load(Ordering::SeqCst), 2);
    assert_eq!(first.cancelled.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn unbounded_stays_unbounded() {
    let arbiter = SubscriptionArbiter::default();
    arbiter.request(UNBOUNDED);
    arbiter.produced(10);
    assert_eq!(arbiter.requested(), UNBOUNDED);
  }

  #[test]
  fn cancel_reaches_current_and_later_upstreams() {
    let arbiter = SubscriptionArbiter::default();
    let first = Arc::new(Probe::default());
    arbiter.set_subscription(first.clone());
    arbiter.cancel();
    arbiter.cancel();
    let late = Arc::new(Probe::default());
    arbiter.set_subscription(late.clone());
    assert_eq!(first.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(late.cancelled.load(Ordering::SeqCst), 1);
  }
}
