//! Virtual-time scheduler for deterministic tests of time-based operators.
//!
//! Time only moves when the test says so. Tasks due at or before the target
//! time run synchronously on the calling thread, ordered by due time and
//! FIFO among tasks due at the same instant.
//!
//! ```rust
//! use rxflow::prelude::*;
//! use std::time::Duration;
//!
//! let scheduler = TestScheduler::new();
//! let ts = flowable::just(42).delay(Duration::from_millis(100), scheduler.clone()).test();
//!
//! scheduler.advance_time_by(Duration::from_millis(99));
//! ts.assert_empty();
//! scheduler.advance_time_by(Duration::from_millis(1));
//! ts.assert_result(&[42]);
//! ```
//!
//! Each instance owns its own clock, so tests running in parallel never see
//! each other's time.

use std::{
  cmp::Ordering,
  collections::BinaryHeap,
  sync::Arc,
  time::Duration,
};

use parking_lot::Mutex;

use super::{PeriodicTask, Scheduler, Task, TaskHandle, Worker};
use crate::disposable::{BoolDisposable, Disposable};

#[derive(Clone, Default)]
pub struct TestScheduler {
  clock: Arc<Mutex<VirtualClock>>,
}

#[derive(Default)]
struct VirtualClock {
  now: Duration,
  queue: BinaryHeap<ScheduledTask>,
  next_task_id: u64,
}

struct ScheduledTask {
  due: Duration,
  task_id: u64,
  kind: TaskKind,
  handle: TaskHandle,
  worker: Arc<BoolDisposable>,
}

enum TaskKind {
  Once(Task),
  Periodic { task: PeriodicTask, period: Duration },
}

impl PartialEq for ScheduledTask {
  fn eq(&self, other: &Self) -> bool { self.due == other.due && self.task_id == other.task_id }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ScheduledTask {
  fn cmp(&self, other: &Self) -> Ordering {
    // Min-heap: earlier times first, then FIFO by task_id
    other.due.cmp(&self.due).then_with(|| other.task_id.cmp(&self.task_id))
  }
}

impl ScheduledTask {
  fn is_cancelled(&self) -> bool { self.handle.is_disposed() || self.worker.is_disposed() }
}

impl TestScheduler {
  pub fn new() -> Self { Self::default() }

  pub fn now(&self) -> Duration { self.clock.lock().now }

  /// Number of tasks that are scheduled and not cancelled.
  pub fn pending(&self) -> usize { self.clock.lock().queue.iter().filter(|t| !t.is_cancelled()).count() }

  /// Moves the clock forward by `delta`, running every task that becomes due.
  pub fn advance_time_by(&self, delta: Duration) {
    let target = self.now() + delta;
    self.run_until(target);
  }

  /// Moves the clock to `target`. Time never goes backwards; an earlier
  /// target only runs the tasks already due.
  pub fn advance_time_to(&self, target: Duration) { self.run_until(target.max(self.now())); }

  /// Runs the tasks due at the current time.
  pub fn trigger_actions(&self) { self.run_until(self.now()); }

  fn run_until(&self, target: Duration) {
    loop {
      let next = {
        let mut clock = self.clock.lock();
        if clock.queue.peek().is_some_and(|t| t.due <= target) {
          let task = clock.queue.pop();
          if let Some(task) = &task {
            clock.now = clock.now.max(task.due);
          }
          task
        } else {
          None
        }
      };
      let Some(task) = next else { break };
      if task.is_cancelled() {
        continue;
      }
      let ScheduledTask { due, handle, worker, kind, .. } = task;
      match kind {
        TaskKind::Once(run) => {
          run();
          handle.finish();
        }
        TaskKind::Periodic { mut task, period } => {
          task();
          if !handle.is_disposed() && !worker.is_disposed() {
            self.push(due + period, TaskKind::Periodic { task, period }, handle, worker);
          }
        }
      }
    }
    let mut clock = self.clock.lock();
    clock.now = clock.now.max(target);
  }

  fn push(&self, due: Duration, kind: TaskKind, handle: TaskHandle, worker: Arc<BoolDisposable>) {
    let mut clock = self.clock.lock();
    let task_id = clock.next_task_id;
    clock.next_task_id += 1;
    clock.queue.push(ScheduledTask { due, task_id, kind, handle, worker });
  }
}

impl Scheduler for TestScheduler {
  fn create_worker(&self) -> Arc<dyn Worker> {
    Arc::new(TestWorker { scheduler: self.clone(), disposed: Arc::default() })
  }

  fn now(&self) -> Duration { TestScheduler::now(self) }
}

struct TestWorker {
  scheduler: TestScheduler,
  disposed: Arc<BoolDisposable>,
}

impl Worker for TestWorker {
  fn schedule(&self, task: Task, delay: Duration) -> TaskHandle {
    let handle = TaskHandle::new();
    if self.disposed.is_disposed() {
      handle.dispose();
      return handle;
    }
    let due = self.scheduler.now() + delay;
    self.scheduler.push(due, TaskKind::Once(task), handle.clone(), self.disposed.clone());
    handle
  }

  fn schedule_periodic(&self, task: PeriodicTask, initial_delay: Duration, period: Duration)
    -> TaskHandle {
    let handle = TaskHandle::new();
    if self.disposed.is_disposed() {
      handle.dispose();
      return handle;
    }
    let period = period.max(Duration::from_nanos(1));
    let due = self.scheduler.now() + initial_delay;
    self.scheduler.push(due, TaskKind::Periodic { task, period }, handle.clone(), self.disposed.clone());
    handle
  }

  fn now(&self) -> Duration { self.scheduler.now() }
}

impl Disposable for TestWorker {
  fn dispose(&self) { self.disposed.dispose(); }

  fn is_disposed(&self) -> bool { self.disposed.is_disposed() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex as PlMutex;

  fn recorder() -> (Arc<PlMutex<Vec<(u64, Duration)>>>, impl Fn(u64, &TestScheduler) -> Task) {
    let log = Arc::new(PlMutex::new(Vec::new()));
    let l = log.clone();
    (log, move |id, scheduler: &TestScheduler| {
      let l = l.clone();
      let s = scheduler.clone();
      Box::new(move || l.lock().push((id, s.now()))) as Task
    })
  }

  #[test]
  fn runs_due_tasks_in_time_then_fifo_order() {
    let scheduler = TestScheduler::new();
    let worker = scheduler.create_worker();
    let (log, task) = recorder();
    worker.schedule(task(1, &scheduler), Duration::from_millis(20));
    worker.schedule(task(2, &scheduler), Duration::from_millis(10));
    worker.schedule(task(3, &scheduler), Duration::from_millis(10));

    scheduler.advance_time_by(Duration::from_millis(15));
    assert_eq!(*log.lock(), vec![(2, Duration::from_millis(10)), (3, Duration::from_millis(10))]);
    assert_eq!(scheduler.now(), Duration::from_millis(15));

    scheduler.advance_time_to(Duration::from_millis(20));
    assert_eq!(log.lock().len(), 3);
    assert_eq!(scheduler.pending(), 0);
  }

  #[test]
  fn time_never_goes_backwards() {
    let scheduler = TestScheduler::new();
    scheduler.advance_time_by(Duration::from_secs(1));
    scheduler.advance_time_to(Duration::from_millis(10));
    assert_eq!(scheduler.now(), Duration::from_secs(1));
  }

  #[test]
  fn zero_delay_tasks_wait_for_trigger() {
    let scheduler = TestScheduler::new();
    let worker = scheduler.create_worker();
    let (log, task) = recorder();
    worker.schedule(task(1, &scheduler), Duration::ZERO);
    assert!(log.lock().is_empty());
    scheduler.trigger_actions();
    assert_eq!(log.lock().len(), 1);
  }

  #[test]
  fn cancelled_tasks_and_disposed_workers_do_not_run() {
    let scheduler = TestScheduler::new();
    let worker = scheduler.create_worker();
    let other = scheduler.create_worker();
    let (log, task) = recorder();
    let handle = worker.schedule(task(1, &scheduler), Duration::from_millis(5));
    other.schedule(task(2, &scheduler), Duration::from_millis(5));
    other.schedule(task(3, &scheduler), Duration::from_millis(6));
    handle.dispose();
    other.dispose();
    assert_eq!(scheduler.pending(), 0);
    scheduler.advance_time_by(Duration::from_millis(10));
    assert!(log.lock().is_empty());

    let late = other.schedule(task(4, &scheduler), Duration::ZERO);
    assert!(late.is_disposed());
  }

  #[test]
  fn periodic_tasks_repeat_until_disposed() {
    let scheduler = TestScheduler::new();
    let worker = scheduler.create_worker();
    let ticks = Arc::new(PlMutex::new(Vec::new()));
    let t = ticks.clone();
    let s = scheduler.clone();
    let handle = worker.schedule_periodic(
      Box::new(move || t.lock().push(s.now())),
      Duration::from_millis(5),
      Duration::from_millis(10),
    );
    scheduler.advance_time_by(Duration::from_millis(30));
    assert_eq!(
      *ticks.lock(),
      vec![Duration::from_millis(5), Duration::from_millis(15), Duration::from_millis(25)]
    );
    handle.dispose();
    scheduler.advance_time_by(Duration::from_millis(30));
    assert_eq!(ticks.lock().len(), 3);
  }

  #[test]
  fn one_shot_handle_reports_done_after_running() {
    let scheduler = TestScheduler::new();
    let (_, task) = recorder();
    let handle = scheduler.schedule_direct(task(1, &scheduler), Duration::from_millis(1));
    assert!(!handle.is_disposed());
    scheduler.advance_time_by(Duration::from_millis(1));
    assert!(handle.is_disposed());
  }
}
