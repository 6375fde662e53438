//! Deferred and periodic execution for time-based operators.
//!
//! A [`Scheduler`] hands out [`Worker`]s. Every time-based operator owns one
//! worker per subscription and disposes it on cancellation or termination,
//! which cancels every task the worker still holds.
//!
//! | Scheduler | Time source |
//! |-----------|-------------|
//! | [`TestScheduler`] | virtual, advanced by the test |
//! | [`ThreadPoolScheduler`] | wall clock, `futures` thread pool (feature `futures-scheduler`) |

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

pub use std::time::Duration;

#[cfg(feature = "futures-scheduler")]
use parking_lot::Mutex;

use crate::disposable::Disposable;

mod test_scheduler;
#[cfg(feature = "futures-scheduler")]
mod thread_pool;

pub use test_scheduler::TestScheduler;
#[cfg(feature = "futures-scheduler")]
pub use thread_pool::ThreadPoolScheduler;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub type PeriodicTask = Box<dyn FnMut() + Send + 'static>;

pub trait Scheduler: Clone + Send + Sync + 'static {
  fn create_worker(&self) -> Arc<dyn Worker>;

  /// Current time of this scheduler, measured from an arbitrary epoch.
  fn now(&self) -> Duration;

  /// Runs `task` once on a throwaway worker.
  fn schedule_direct(&self, task: Task, delay: Duration) -> TaskHandle {
    let worker = self.create_worker();
    let owner = worker.clone();
    worker.schedule(
      Box::new(move || {
        task();
        owner.dispose();
      }),
      delay,
    )
  }
}

/// Runs tasks one at a time, in due-time order, until disposed.
pub trait Worker: Disposable {
  fn schedule(&self, task: Task, delay: Duration) -> TaskHandle;

  /// Runs `task` after `initial_delay`, then every `period`.
  fn schedule_periodic(&self, task: PeriodicTask, initial_delay: Duration, period: Duration)
    -> TaskHandle;

  fn now(&self) -> Duration;
}

/// Cancellation handle of one scheduled task.
///
/// Reports disposed once the task was cancelled or, for one-shot tasks,
/// once it ran.
#[derive(Clone, Default)]
pub struct TaskHandle(Arc<TaskState>);

#[derive(Default)]
struct TaskState {
  disposed: AtomicBool,
  #[cfg(feature = "futures-scheduler")]
  abort: Mutex<Option<futures::future::AbortHandle>>,
}

impl TaskHandle {
  pub fn new() -> Self { Self::default() }

  /// Marks a one-shot task as done.
  pub(crate) fn finish(&self) { self.0.disposed.store(true, Ordering::Release); }

  #[cfg(feature = "futures-scheduler")]
  pub(crate) fn set_abort(&self, abort: futures::future::AbortHandle) {
    let mut slot = self.0.abort.lock();
    if self.is_disposed() {
      drop(slot);
      abort.abort();
    } else {
      *slot = Some(abort);
    }
  }
}

impl Disposable for TaskHandle {
  fn dispose(&self) {
    if self.0.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    #[cfg(feature = "futures-scheduler")]
    if let Some(abort) = self.0.abort.lock().take() {
      abort.abort();
    }
  }

  fn is_disposed(&self) -> bool { self.0.disposed.load(Ordering::Acquire) }
}
