//! The consumer-held side of the signal protocol: demand and cancellation,
//! plus the optional fusion contract.
//!
//! Demand is a saturating `u64`; [`UNBOUNDED`] switches a producer to
//! push-as-fast-as-possible mode. `request(0)` is a protocol violation: it
//! is reported to [`hooks`](crate::hooks) and otherwise ignored.

use std::{
  ops::{BitAnd, BitOr},
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  error::{Error, ProtocolViolation},
  hooks,
};

mod arbiter;
mod deferred;
mod dynamic;

pub use arbiter::SubscriptionArbiter;
pub use deferred::DeferredSubscription;
pub(crate) use dynamic::DynamicSet;

/// Demand value meaning "no limit".
pub const UNBOUNDED: u64 = u64::MAX;

/// Demand signalling and cancellation, held by a consumer.
pub trait Subscription: Send + Sync + 'static {
  /// Adds `n` to the outstanding demand.
  fn request(&self, n: u64);

  /// Stops the flow of signals and releases upstream resources. Idempotent.
  fn cancel(&self);
}

/// Fusion modes negotiated between adjacent operators.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FusionMode(u8);

impl FusionMode {
  /// No fusion; the plain signal protocol is used.
  pub const NONE: Self = Self(0);
  /// All values are already available; `poll` never waits.
  pub const SYNC: Self = Self(1);
  /// Values arrive over time; `on_available` announces them.
  pub const ASYNC: Self = Self(2);
  pub const ANY: Self = Self(Self::SYNC.0 | Self::ASYNC.0);
  /// The consumer sits on an asynchronous boundary; user callbacks must not
  /// be moved across it.
  pub const BOUNDARY: Self = Self(4);

  pub const fn intersects(self, other: Self) -> bool { self.0 & other.0 != 0 }

  pub const fn is_none(self) -> bool { self.0 == 0 }

  pub const fn is_sync(self) -> bool { self.intersects(Self::SYNC) }

  pub const fn is_async(self) -> bool { self.intersects(Self::ASYNC) }

  pub const fn is_boundary(self) -> bool { self.intersects(Self::BOUNDARY) }

  pub(crate) const fn bits(self) -> u8 { self.0 }

  pub(crate) const fn from_bits(bits: u8) -> Self { Self(bits) }
}

impl BitOr for FusionMode {
  type Output = Self;
  fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

impl BitAnd for FusionMode {
  type Output = Self;
  fn bitand(self, rhs: Self) -> Self { Self(self.0 & rhs.0) }
}

impl std::fmt::Debug for FusionMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self.0 & 3 {
      0 => "NONE",
      1 => "SYNC",
      2 => "ASYNC",
      _ => "ANY",
    };
    if self.is_boundary() {
      write!(f, "{name}|BOUNDARY")
    } else {
      f.write_str(name)
    }
  }
}

/// The queue side of a fused connection.
///
/// `poll` returning `Ok(None)` means "empty now". In SYNC mode that is also
/// completion; in ASYNC mode completion still arrives through `on_complete`.
pub trait FusedQueue<T>: Send + Sync {
  fn poll(&self) -> Result<Option<T>, Error>;

  fn is_empty(&self) -> bool;

  /// Drops every queued value without signalling anyone.
  fn clear(&self);

  fn size(&self) -> usize;
}

/// A subscription that can also act as a queue once fusion is established.
pub trait QueueSubscription<T>: Subscription + FusedQueue<T> {
  /// Proposes `mode`; returns what was established. Called at most once,
  /// from inside `on_subscribe`.
  fn request_fusion(&self, mode: FusionMode) -> FusionMode;
}

/// What a producer hands to its consumer in `on_subscribe`.
pub enum Upstream<T> {
  Plain(Arc<dyn Subscription>),
  Fuseable(Arc<dyn QueueSubscription<T>>),
}

impl<T> Clone for Upstream<T> {
  fn clone(&self) -> Self {
    match self {
      Upstream::Plain(s) => Upstream::Plain(s.clone()),
      Upstream::Fuseable(q) => Upstream::Fuseable(q.clone()),
    }
  }
}

impl<T: Send + 'static> Upstream<T> {
  pub fn plain<S: Subscription>(subscription: S) -> Self { Upstream::Plain(Arc::new(subscription)) }

  pub fn fuseable<Q: QueueSubscription<T>>(queue: Q) -> Self { Upstream::Fuseable(Arc::new(queue)) }

  /// A subscription that ignores requests and cancellation.
  pub fn empty() -> Self { Upstream::Plain(Arc::new(EmptySubscription)) }

  /// Fusion never succeeds on a plain upstream.
  pub fn request_fusion(&self, mode: FusionMode) -> FusionMode {
    match self {
      Upstream::Plain(_) => FusionMode::NONE,
      Upstream::Fuseable(q) => q.request_fusion(mode),
    }
  }

  pub fn queue(&self) -> Option<&Arc<dyn QueueSubscription<T>>> {
    match self {
      Upstream::Plain(_) => None,
      Upstream::Fuseable(q) => Some(q),
    }
  }

  /// Type-erases the subscription so it can be stored next to upstreams of
  /// other item types.
  pub fn into_shared(self) -> Arc<dyn Subscription> {
    match self {
      Upstream::Plain(s) => s,
      fused @ Upstream::Fuseable(_) => Arc::new(fused),
    }
  }
}

impl<T: Send + 'static> Subscription for Upstream<T> {
  fn request(&self, n: u64) {
    match self {
      Upstream::Plain(s) => s.request(n),
      Upstream::Fuseable(q) => q.request(n),
    }
  }

  fn cancel(&self) {
    match self {
      Upstream::Plain(s) => s.cancel(),
      Upstream::Fuseable(q) => q.cancel(),
    }
  }
}

/// Subscription of sources that never need demand or cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
  fn request(&self, n: u64) { validate_request(n); }

  fn cancel(&self) {}
}

/// Reports `request(0)` to the error hook; true when `n` is usable.
pub(crate) fn validate_request(n: u64) -> bool {
  if n == 0 {
    tracing::debug!("request(0) rejected");
    hooks::on_undeliverable(ProtocolViolation::NonPositiveRequest.into());
    return false;
  }
  true
}

/// Adds `n` to the demand counter, saturating at [`UNBOUNDED`]. Returns the
/// previous value.
pub(crate) fn add_demand(requested: &AtomicU64, n: u64) -> u64 {
  requested
    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
      if r == UNBOUNDED {
        None
      } else {
        Some(r.saturating_add(n))
      }
    })
    .unwrap_or_else(|r| r)
}

/// Subtracts `n` delivered values from the demand counter and returns what
/// is left. An unbounded counter stays unbounded.
pub(crate) fn produced(requested: &AtomicU64, n: u64) -> u64 {
  let prev = requested
    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
      if r == UNBOUNDED {
        None
      } else {
        Some(r.saturating_sub(n))
      }
    })
    .unwrap_or_else(|r| r);
  if prev == UNBOUNDED {
    return UNBOUNDED;
  }
  if prev < n {
    hooks::on_undeliverable(ProtocolViolation::MoreProducedThanRequested.into());
  }
  prev.saturating_sub(n)
}

/// A set-once holder for an upstream subscription that may be cancelled
/// before the upstream arrives.
#[derive(Default)]
pub(crate) struct SubscriptionSlot {
  state: Mutex<SlotState>,
}

#[derive(Default)]
enum SlotState {
  #[default]
  Empty,
  Set(Arc<dyn Subscription>),
  Cancelled,
}

impl SubscriptionSlot {
  /// Stores `upstream`. If the slot was cancelled meanwhile, `upstream` is
  /// cancelled and `false` returned.
  pub fn set_once(&self, upstream: Arc<dyn Subscription>) -> bool {
    let mut state = self.state.lock();
    if matches!(*state, SlotState::Empty) {
      *state = SlotState::Set(upstream);
      return true;
    }
    let already_set = matches!(*state, SlotState::Set(_));
    drop(state);
    upstream.cancel();
    if already_set {
      hooks::on_undeliverable(ProtocolViolation::SubscriptionAlreadySet.into());
    }
    false
  }

  pub fn request(&self, n: u64) {
    let current = match &*self.state.lock() {
      SlotState::Set(s) => Some(s.clone()),
      _ => None,
    };
    if let Some(s) = current {
      s.request(n);
    }
  }

  /// Cancels the held upstream. Returns `true` for the call that performed
  /// the transition.
  pub fn cancel(&self) -> bool {
    let prev = std::mem::replace(&mut *self.state.lock(), SlotState::Cancelled);
    match prev {
      SlotState::Set(s) => {
        s.cancel();
        true
      }
      SlotState::Empty => true,
      SlotState::Cancelled => false,
    }
  }

  /// Drops the reference to the upstream without cancelling it; used once
  /// the upstream has terminated.
  pub fn release(&self) { *self.state.lock() = SlotState::Cancelled; }

  pub fn is_cancelled(&self) -> bool { matches!(*self.state.lock(), SlotState::Cancelled) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::capture_undeliverable;
  use std::sync::atomic::AtomicUsize;

  #[derive(Default)]
  struct Counting {
    requested: AtomicU64,
    cancelled: AtomicUsize,
  }

  impl Subscription for Counting {
    fn request(&self, n: u64) { add_demand(&self.requested, n); }
    fn cancel(&self) { self.cancelled.fetch_add(1, Ordering::SeqCst); }
  }

  #[test]
  fn demand_saturates_and_stays_unbounded() {
    let requested = AtomicU64::new(0);
    add_demand(&requested, 5);
    assert_eq!(produced(&requested, 2), 3);
    add_demand(&requested, u64::MAX - 1);
    assert_eq!(requested.load(Ordering::SeqCst), UNBOUNDED);
    assert_eq!(produced(&requested, 10), UNBOUNDED);
  }

  #[test]
  fn zero_request_is_reported() {
    let (valid, routed) = capture_undeliverable(|| validate_request(0));
    assert!(!valid);
    assert_eq!(routed, vec![Error::Protocol(ProtocolViolation::NonPositiveRequest)]);
  }

  #[test]
  fn slot_cancels_late_upstream() {
    let slot = SubscriptionSlot::default();
    assert!(slot.cancel());
    assert!(!slot.cancel());
    let late = Arc::new(Counting::default());
    assert!(!slot.set_once(late.clone()));
    assert_eq!(late.cancelled.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn slot_rejects_second_upstream() {
    let slot = SubscriptionSlot::default();
    let first = Arc::new(Counting::default());
    let second = Arc::new(Counting::default());
    let (_, routed) = capture_undeliverable(|| {
      assert!(slot.set_once(first.clone()));
      assert!(!slot.set_once(second.clone()));
    });
    assert_eq!(second.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(routed, vec![Error::Protocol(ProtocolViolation::SubscriptionAlreadySet)]);
    slot.request(4);
    assert_eq!(first.requested.load(Ordering::SeqCst), 4);
  }

  #[test]
  fn fusion_mode_flags() {
    assert!(FusionMode::ANY.is_sync() && FusionMode::ANY.is_async());
    assert!(!(FusionMode::ANY | FusionMode::BOUNDARY).is_none());
    assert_eq!(FusionMode::ANY & FusionMode::ASYNC, FusionMode::ASYNC);
    assert_eq!(format!("{:?}", FusionMode::SYNC | FusionMode::BOUNDARY), "SYNC|BOUNDARY");
  }
}
