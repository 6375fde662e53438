use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::{Duration, Instant},
};

use futures::{executor::ThreadPool, future::abortable, FutureExt};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::{PeriodicTask, Scheduler, Task, TaskHandle, Worker};
use crate::{
  disposable::{CompositeDisposable, Disposable},
  drain::WorkInProgress,
};

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Runs tasks on a `futures` thread pool, sleeping with `futures-time`.
///
/// Tasks of one worker never overlap: due tasks are queued on the worker and
/// executed by whichever pool thread claims the worker's drain loop.
#[derive(Clone)]
pub struct ThreadPoolScheduler {
  pool: ThreadPool,
}

impl ThreadPoolScheduler {
  pub fn new() -> std::io::Result<Self> { Ok(Self::with_pool(ThreadPool::new()?)) }

  pub fn with_pool(pool: ThreadPool) -> Self { ThreadPoolScheduler { pool } }
}

impl Scheduler for ThreadPoolScheduler {
  fn create_worker(&self) -> Arc<dyn Worker> {
    Arc::new(PoolWorker {
      shared: Arc::new(WorkerShared {
        pool: self.pool.clone(),
        ready: Mutex::new(VecDeque::new()),
        wip: WorkInProgress::default(),
        tasks: CompositeDisposable::default(),
        disposed: AtomicBool::new(false),
      }),
    })
  }

  fn now(&self) -> Duration { EPOCH.elapsed() }
}

struct PoolWorker {
  shared: Arc<WorkerShared>,
}

struct WorkerShared {
  pool: ThreadPool,
  ready: Mutex<VecDeque<Task>>,
  wip: WorkInProgress,
  tasks: CompositeDisposable,
  disposed: AtomicBool,
}

impl WorkerShared {
  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }

  fn enqueue(&self, task: Task) {
    if self.is_disposed() {
      return;
    }
    self.ready.lock().push_back(task);
    self.wip.drain(|| {
      while let Some(task) = self.ready.lock().pop_front() {
        if self.is_disposed() {
          self.ready.lock().clear();
          break;
        }
        task();
      }
      std::ops::ControlFlow::Continue(())
    });
  }

  fn track(&self, handle: &TaskHandle) -> Option<usize> { self.tasks.add(Arc::new(handle.clone())) }
}

async fn sleep(delay: Duration) {
  if !delay.is_zero() {
    futures_time::task::sleep(delay.into()).await;
  }
}

impl Worker for PoolWorker {
  fn schedule(&self, task: Task, delay: Duration) -> TaskHandle {
    let handle = TaskHandle::new();
    let Some(key) = self.shared.track(&handle) else { return handle };
    let shared = self.shared.clone();
    let run_handle = handle.clone();
    let (future, abort) = abortable(async move {
      sleep(delay).await;
      shared.tasks.remove(key);
      let handle = run_handle.clone();
      shared.enqueue(Box::new(move || {
        if !handle.is_disposed() {
          task();
          handle.finish();
        }
      }));
    });
    handle.set_abort(abort);
    self.shared.pool.spawn_ok(future.map(drop));
    handle
  }

  fn schedule_periodic(&self, task: PeriodicTask, initial_delay: Duration, period: Duration)
    -> TaskHandle {
    let handle = TaskHandle::new();
    let Some(key) = self.shared.track(&handle) else { return handle };
    let shared = self.shared.clone();
    let run_handle = handle.clone();
    let task = Arc::new(Mutex::new(task));
    let (future, abort) = abortable(async move {
      sleep(initial_delay).await;
      while !run_handle.is_disposed() && !shared.is_disposed() {
        let handle = run_handle.clone();
        let task = task.clone();
        shared.enqueue(Box::new(move || {
          if !handle.is_disposed() {
            let mut run = task.lock();
            (*run)();
          }
        }));
        sleep(period).await;
      }
      shared.tasks.remove(key);
    });
    handle.set_abort(abort);
    self.shared.pool.spawn_ok(future.map(drop));
    handle
  }

  fn now(&self) -> Duration { EPOCH.elapsed() }
}

impl Disposable for PoolWorker {
  fn dispose(&self) {
    if !self.shared.disposed.swap(true, Ordering::AcqRel) {
      tracing::trace!("thread pool worker disposed");
      self.shared.tasks.dispose();
    }
  }

  fn is_disposed(&self) -> bool { self.shared.is_disposed() }
}
