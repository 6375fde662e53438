use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc,
};

use crate::{
  disposable::{Disposable, SerialDisposable},
  drain::DownstreamCell,
  error::Error,
  flowable::Flowable,
  scheduler::{Duration, Scheduler},
  subscriber::Subscriber,
  subscription::{add_demand, produced, validate_request, Subscription, Upstream},
};

// ==================== Timer ====================

/// Emits `0` after `delay`, then completes.
#[derive(Clone)]
pub struct Timer<Sch> {
  delay: Duration,
  scheduler: Sch,
}

pub fn timer<Sch: Scheduler>(delay: Duration, scheduler: Sch) -> Timer<Sch> { Timer { delay, scheduler } }

impl<Sch: Scheduler> Flowable for Timer<Sch> {
  type Item = u64;

  fn subscribe_actual<S: Subscriber<u64>>(self, mut subscriber: S) {
    let state = Arc::new(TickState {
      downstream: DownstreamCell::default(),
      requested: AtomicU64::new(0),
      count: AtomicU64::new(0),
      task: SerialDisposable::default(),
    });
    subscriber.on_subscribe(Upstream::Plain(state.clone()));
    if !state.downstream.attach(subscriber) {
      return;
    }
    let fire = state.clone();
    let handle = self.scheduler.schedule_direct(Box::new(move || fire.fire_once()), self.delay);
    state.task.replace(Arc::new(handle));
  }
}

// ==================== Interval ====================

/// Emits `0, 1, 2, ...` every `period` after `initial_delay`.
///
/// A tick without outstanding demand fails the stream with
/// [`Error::MissingBackpressure`].
#[derive(Clone)]
pub struct Interval<Sch> {
  initial_delay: Duration,
  period: Duration,
  scheduler: Sch,
}

pub fn interval<Sch: Scheduler>(initial_delay: Duration, period: Duration, scheduler: Sch) -> Interval<Sch> {
  Interval { initial_delay, period, scheduler }
}

impl<Sch: Scheduler> Flowable for Interval<Sch> {
  type Item = u64;

  fn subscribe_actual<S: Subscriber<u64>>(self, mut subscriber: S) {
    let state = Arc::new(TickState {
      downstream: DownstreamCell::default(),
      requested: AtomicU64::new(0),
      count: AtomicU64::new(0),
      task: SerialDisposable::default(),
    });
    subscriber.on_subscribe(Upstream::Plain(state.clone()));
    if !state.downstream.attach(subscriber) {
      return;
    }
    let worker = self.scheduler.create_worker();
    state.task.replace(Arc::new(worker.clone()));
    let tick = state.clone();
    worker.schedule_periodic(Box::new(move || tick.tick()), self.initial_delay, self.period);
  }
}

struct TickState<S> {
  downstream: DownstreamCell<S>,
  requested: AtomicU64,
  count: AtomicU64,
  task: SerialDisposable,
}

impl<S: Subscriber<u64>> TickState<S> {
  fn fire_once(&self) {
    let Some(downstream) = self.downstream.take() else { return };
    if self.requested.load(Ordering::Acquire) > 0 {
      let mut downstream = downstream;
      downstream.on_next(0);
      if !self.downstream.is_cancelled() {
        downstream.on_complete();
      }
    } else {
      downstream.on_error(Error::MissingBackpressure("timer: could not emit value due to lack of requests"));
    }
  }

  fn tick(&self) {
    let mut slot = self.downstream.lock();
    if slot.is_none() {
      return;
    }
    if self.requested.load(Ordering::Acquire) == 0 {
      self.task.dispose();
      if let Some(downstream) = slot.take() {
        downstream.on_error(Error::MissingBackpressure("interval: could not emit value due to lack of requests"));
      }
      return;
    }
    let count = self.count.fetch_add(1, Ordering::Relaxed);
    if let Some(downstream) = slot.as_mut() {
      downstream.on_next(count);
    }
    produced(&self.requested, 1);
    if self.downstream.is_cancelled() {
      slot.take();
    }
  }
}

impl<S: Subscriber<u64>> Subscription for TickState<S> {
  fn request(&self, n: u64) {
    if validate_request(n) {
      add_demand(&self.requested, n);
    }
  }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.task.dispose();
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn timer_emits_zero_after_delay() {
    let scheduler = TestScheduler::new();
    let ts = flowable::timer(Duration::from_millis(10), scheduler.clone()).test();
    scheduler.advance_time_by(Duration::from_millis(9));
    ts.assert_empty();
    scheduler.advance_time_by(Duration::from_millis(1));
    ts.assert_result(&[0]);
  }

  #[test]
  fn timer_without_demand_fails() {
    let scheduler = TestScheduler::new();
    let ts = flowable::timer(Duration::from_millis(1), scheduler.clone()).test_with(0);
    scheduler.advance_time_by(Duration::from_millis(1));
    ts.assert_error_matches(|e| matches!(e, Error::MissingBackpressure(_)));
  }

  #[test]
  fn interval_ticks_until_cancelled() {
    let scheduler = TestScheduler::new();
    let ts = flowable::interval(Duration::from_millis(5), Duration::from_millis(10), scheduler.clone()).test();
    scheduler.advance_time_by(Duration::from_millis(25));
    ts.assert_values(&[0, 1, 2]);
    ts.cancel();
    assert_eq!(scheduler.pending(), 0);
    scheduler.advance_time_by(Duration::from_millis(100));
    ts.assert_values(&[0, 1, 2]).assert_not_terminated();
  }

  #[test]
  fn interval_fails_when_the_consumer_falls_behind() {
    let scheduler = TestScheduler::new();
    let ts = flowable::interval(Duration::ZERO, Duration::from_millis(1), scheduler.clone()).test_with(2);
    scheduler.advance_time_by(Duration::from_millis(5));
    ts.assert_values(&[0, 1]).assert_error_matches(|e| matches!(e, Error::MissingBackpressure(_)));
    assert_eq!(scheduler.pending(), 0);
  }
}
