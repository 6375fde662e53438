//! Commonly used traits and types in one import.

pub use crate::{
  disposable::{BoxDisposable, CompositeDisposable, Disposable, DisposeGuard, SerialDisposable},
  error::{CompositeError, Error, ProtocolViolation},
  flowable::{self, BackpressureStrategy, BoxFlowable, Emitter, Flowable},
  hooks,
  maybe::{self, BoxMaybe, Maybe, MaybeObserver},
  notification::Notification,
  ops::{blocking::Interrupt, concat_map::ErrorMode},
  scheduler::{Duration, Scheduler, TestScheduler, Worker},
  subscriber::{BoxSubscriber, Subscriber},
  subscription::{FusionMode, Subscription, Upstream, UNBOUNDED},
  testing::{TestObserver, TestSubscriber},
};

#[cfg(feature = "futures-scheduler")]
pub use crate::scheduler::ThreadPoolScheduler;
