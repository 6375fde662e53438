use std::{
  ops::ControlFlow,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Weak,
  },
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
  config,
  disposable::Disposable,
  drain::{DownstreamCell, WorkInProgress},
  error::Error,
  flowable::Flowable,
  hooks,
  queue::{InnerQueue, SimpleQueue},
  scheduler::{Duration, Scheduler, Worker},
  subscriber::Subscriber,
  subscription::{
    add_demand, produced, validate_request, FusionMode, Subscription, SubscriptionSlot, Upstream,
  },
};

/// Moves the delivery of every signal onto one worker of `scheduler`.
///
/// Up to `prefetch` values are buffered between the upstream thread and the
/// worker. An error overtakes buffered values unless
/// [`delay_error`](Self::delay_error) is set.
#[derive(Clone)]
pub struct ObserveOn<S, Sch> {
  source: S,
  scheduler: Sch,
  prefetch: usize,
  delay_error: bool,
}

impl<S, Sch> ObserveOn<S, Sch> {
  pub fn new(source: S, scheduler: Sch) -> Self {
    ObserveOn { source, scheduler, prefetch: config::buffer_size(), delay_error: false }
  }

  pub fn prefetch(mut self, prefetch: usize) -> Self {
    self.prefetch = prefetch.max(1);
    self
  }

  pub fn delay_error(mut self, delay_error: bool) -> Self {
    self.delay_error = delay_error;
    self
  }
}

impl<S: Flowable, Sch: Scheduler> Flowable for ObserveOn<S, Sch> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    let state = Arc::new_cyclic(|this| ObserveOnState {
      this: this.clone(),
      downstream: DownstreamCell::default(),
      worker: self.scheduler.create_worker(),
      wip: WorkInProgress::default(),
      requested: AtomicU64::new(0),
      upstream: SubscriptionSlot::default(),
      queue: OnceCell::new(),
      sync_fused: AtomicBool::new(false),
      done: AtomicBool::new(false),
      error: Mutex::new(None),
      prefetch: self.prefetch,
      limit: config::replenish_limit(self.prefetch),
      consumed: AtomicUsize::new(0),
      delay_error: self.delay_error,
    });
    self.source.subscribe_actual(ObserveOnSubscriber { state, downstream: Some(downstream) })
  }
}

struct ObserveOnSubscriber<T, O> {
  state: Arc<ObserveOnState<T, O>>,
  downstream: Option<O>,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for ObserveOnSubscriber<T, O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let state = &self.state;
    if !state.upstream.set_once(upstream.clone().into_shared()) {
      return;
    }
    let Some(mut downstream) = self.downstream.take() else { return };
    let mode = upstream.request_fusion(FusionMode::ANY | FusionMode::BOUNDARY);
    match (upstream.queue(), mode) {
      (Some(queue), FusionMode::SYNC) => {
        let _ = state.queue.set(InnerQueue::Fused(queue.clone()));
        state.sync_fused.store(true, Ordering::Release);
        state.done.store(true, Ordering::Release);
        downstream.on_subscribe(Upstream::Plain(state.clone()));
        if state.downstream.attach(downstream) {
          state.schedule();
        }
        return;
      }
      (Some(queue), FusionMode::ASYNC) => {
        let _ = state.queue.set(InnerQueue::Fused(queue.clone()));
      }
      _ => {
        let _ = state.queue.set(InnerQueue::Own(SimpleQueue::bounded(state.prefetch)));
      }
    }
    downstream.on_subscribe(Upstream::Plain(state.clone()));
    if state.downstream.attach(downstream) {
      upstream.request(state.prefetch as u64);
    }
  }

  fn on_next(&mut self, value: T) {
    let state = &self.state;
    if state.done.load(Ordering::Acquire) {
      return;
    }
    let accepted = state.queue.get().is_some_and(|q| q.offer(value).is_ok());
    if !accepted {
      state.upstream.cancel();
      *state.error.lock() = Some(Error::MissingBackpressure("observe_on: queue is full"));
      state.done.store(true, Ordering::Release);
    }
    state.schedule();
  }

  fn on_error(self, err: Error) {
    let state = &self.state;
    if state.done.swap(true, Ordering::AcqRel) {
      hooks::on_undeliverable(err);
      return;
    }
    *state.error.lock() = Some(err);
    state.schedule();
  }

  fn on_complete(self) {
    self.state.done.store(true, Ordering::Release);
    self.state.schedule();
  }

  fn on_available(&mut self) { self.state.schedule() }
}

struct ObserveOnState<T, O> {
  this: Weak<Self>,
  downstream: DownstreamCell<O>,
  worker: Arc<dyn Worker>,
  wip: WorkInProgress,
  requested: AtomicU64,
  upstream: SubscriptionSlot,
  queue: OnceCell<InnerQueue<T>>,
  sync_fused: AtomicBool,
  done: AtomicBool,
  error: Mutex<Option<Error>>,
  prefetch: usize,
  limit: usize,
  consumed: AtomicUsize,
  delay_error: bool,
}

impl<T: Send + 'static, O: Subscriber<T>> ObserveOnState<T, O> {
  fn schedule(&self) {
    if !self.wip.enter() {
      return;
    }
    let Some(state) = self.this.upgrade() else { return };
    self.worker.schedule(Box::new(move || state.wip.run(&mut || state.round())), Duration::ZERO);
  }

  fn clear(&self) {
    if let Some(queue) = self.queue.get() {
      queue.clear();
    }
  }

  fn finish(&self, slot: &mut Option<O>, err: Option<Error>) -> ControlFlow<()> {
    self.upstream.release();
    self.worker.dispose();
    if let Some(downstream) = slot.take() {
      match err {
        Some(err) => downstream.on_error(err),
        None => downstream.on_complete(),
      }
    }
    ControlFlow::Break(())
  }

  fn fail(&self, slot: &mut Option<O>, err: Error) -> ControlFlow<()> {
    self.upstream.cancel();
    self.clear();
    self.finish(slot, Some(err))
  }

  /// `Some` once the downstream was terminated or dropped.
  fn check_terminated(&self, done: bool, empty: bool, slot: &mut Option<O>) -> Option<ControlFlow<()>> {
    if self.downstream.is_cancelled() {
      self.clear();
      slot.take();
      return Some(ControlFlow::Break(()));
    }
    if !done {
      return None;
    }
    if self.delay_error {
      if empty {
        let err = self.error.lock().take();
        return Some(self.finish(slot, err));
      }
      return None;
    }
    let err = self.error.lock().take();
    if let Some(err) = err {
      self.clear();
      return Some(self.finish(slot, Some(err)));
    }
    if empty {
      return Some(self.finish(slot, None));
    }
    None
  }

  fn round(&self) -> ControlFlow<()> {
    let mut slot = self.downstream.lock();
    if slot.is_none() {
      return ControlFlow::Continue(());
    }
    let Some(queue) = self.queue.get() else { return ControlFlow::Continue(()) };
    let sync = self.sync_fused.load(Ordering::Acquire);
    let requested = self.requested.load(Ordering::Acquire);
    let mut emitted = 0;

    while emitted != requested {
      let done = self.done.load(Ordering::Acquire);
      let polled = match queue.poll() {
        Ok(polled) => polled,
        Err(err) => return self.fail(&mut slot, err),
      };
      let empty = polled.is_none();
      if sync && empty {
        return self.finish(&mut slot, None);
      }
      if let Some(flow) = self.check_terminated(done, empty, &mut slot) {
        return flow;
      }
      let Some(value) = polled else { break };
      if let Some(downstream) = slot.as_mut() {
        downstream.on_next(value);
      }
      emitted += 1;
      if self.downstream.is_cancelled() {
        self.clear();
        slot.take();
        return ControlFlow::Break(());
      }
      if !sync {
        let consumed = self.consumed.fetch_add(1, Ordering::Relaxed) + 1;
        if consumed == self.limit {
          self.consumed.store(0, Ordering::Relaxed);
          self.upstream.request(consumed as u64);
        }
      }
    }

    if emitted == requested {
      if sync && queue.is_empty() {
        return self.finish(&mut slot, None);
      }
      let done = self.done.load(Ordering::Acquire);
      if let Some(flow) = self.check_terminated(done, queue.is_empty(), &mut slot) {
        return flow;
      }
    }
    if emitted > 0 {
      produced(&self.requested, emitted);
    }
    ControlFlow::Continue(())
  }
}

impl<T: Send + 'static, O: Subscriber<T>> Subscription for ObserveOnState<T, O> {
  fn request(&self, n: u64) {
    if validate_request(n) {
      add_demand(&self.requested, n);
      self.schedule();
    }
  }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.upstream.cancel();
      self.worker.dispose();
      if self.wip.enter() {
        self.clear();
        self.downstream.take();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::prelude::*;

  #[test]
  fn delivers_on_the_worker() {
    let scheduler = TestScheduler::new();
    let ts = flowable::range(1, 3).observe_on(scheduler.clone()).test();
    ts.assert_empty();
    scheduler.trigger_actions();
    ts.assert_result(&[1, 2, 3]);
  }

  #[test]
  fn replenishes_in_batches() {
    let scheduler = TestScheduler::new();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();
    let ts = flowable::range(1, 100)
      .do_on_request(move |n| log.lock().push(n))
      .observe_on(scheduler.clone())
      .prefetch(16)
      .test();
    scheduler.trigger_actions();
    ts.assert_value_count(100).assert_complete();
    let requests = requests.lock();
    assert_eq!(requests[0], 16);
    assert!(requests[1..].iter().all(|n| *n == 12));
  }

  #[test]
  fn honours_downstream_demand() {
    let scheduler = TestScheduler::new();
    let ts = flowable::range(1, 5).hide().observe_on(scheduler.clone()).test_with(2);
    scheduler.trigger_actions();
    ts.assert_values(&[1, 2]).assert_not_complete();
    ts.request(3);
    scheduler.trigger_actions();
    ts.assert_result(&[1, 2, 3, 4, 5]);
  }

  fn two_then_error() -> impl Flowable<Item = i32> {
    flowable::create(
      |mut e| {
        e.next(1);
        e.next(2);
        e.error(Error::msg("x"));
      },
      BackpressureStrategy::Buffer,
    )
  }

  #[test]
  fn error_overtakes_buffered_values_unless_delayed() {
    let scheduler = TestScheduler::new();
    let eager = two_then_error().observe_on(scheduler.clone()).test();
    let delayed = two_then_error().observe_on(scheduler.clone()).delay_error(true).test();
    scheduler.trigger_actions();
    eager.assert_failure(&Error::msg("x"), &[]);
    delayed.assert_failure(&Error::msg("x"), &[1, 2]);
  }

  #[test]
  fn cancel_disposes_the_worker() {
    let scheduler = TestScheduler::new();
    let ts = flowable::just(1).observe_on(scheduler.clone()).test();
    assert_eq!(scheduler.pending(), 1);
    ts.cancel();
    assert_eq!(scheduler.pending(), 0);
    scheduler.trigger_actions();
    ts.assert_empty();
  }
}
