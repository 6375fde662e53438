use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc,
};

use parking_lot::Mutex;

use crate::{
  disposable::{Disposable, SerialDisposable},
  drain::Serializer,
  error::Error,
  flowable::Flowable,
  function::OnDropped,
  scheduler::{Duration, Scheduler, Worker},
  subscriber::Subscriber,
  subscription::{add_demand, produced, validate_request, Subscription, SubscriptionSlot, Upstream, UNBOUNDED},
};

/// Emits a value only after `timeout` passed without a newer one. The value
/// pending when the upstream completes is emitted right away.
pub struct ThrottleWithTimeout<S: Flowable, Sch> {
  source: S,
  timeout: Duration,
  scheduler: Sch,
  on_dropped: Option<OnDropped<S::Item>>,
}

impl<S: Flowable, Sch: Scheduler> ThrottleWithTimeout<S, Sch> {
  pub fn new(source: S, timeout: Duration, scheduler: Sch) -> Self {
    ThrottleWithTimeout { source, timeout, scheduler, on_dropped: None }
  }

  /// Receives every value superseded before its timeout elapsed. An `Err`
  /// cancels the upstream and fails the stream.
  pub fn on_dropped<F>(mut self, on_dropped: F) -> Self
  where
    F: Fn(S::Item) -> Result<(), Error> + Send + Sync + 'static,
  {
    self.on_dropped = Some(Arc::new(on_dropped));
    self
  }
}

impl<S: Flowable, Sch: Scheduler> Flowable for ThrottleWithTimeout<S, Sch> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    let state = Arc::new(DebounceState {
      serializer: Serializer::default(),
      pending: Mutex::new(None),
      index: AtomicU64::new(0),
      requested: AtomicU64::new(0),
      upstream: SubscriptionSlot::default(),
      worker: self.scheduler.create_worker(),
      timer: SerialDisposable::default(),
      timeout: self.timeout,
      on_dropped: self.on_dropped,
    });
    self.source.subscribe_actual(DebounceSubscriber { state, downstream: Some(downstream) })
  }
}

struct DebounceState<T, O> {
  serializer: Serializer<T, O>,
  pending: Mutex<Option<(u64, T)>>,
  index: AtomicU64,
  requested: AtomicU64,
  upstream: SubscriptionSlot,
  worker: Arc<dyn Worker>,
  timer: SerialDisposable,
  timeout: Duration,
  on_dropped: Option<OnDropped<T>>,
}

impl<T: Send + 'static, O: Subscriber<T>> DebounceState<T, O> {
  fn stop(&self) {
    self.worker.dispose();
    self.timer.dispose();
  }

  fn fail(&self, err: Error) {
    self.upstream.cancel();
    self.stop();
    self.pending.lock().take();
    self.serializer.error(err);
  }

  fn emit(&self, value: T) {
    if self.requested.load(Ordering::Acquire) != 0 {
      self.serializer.next(value);
      produced(&self.requested, 1);
    } else {
      self.fail(Error::MissingBackpressure("debounce: could not emit value due to lack of requests"));
    }
  }

  fn fire(&self, index: u64) {
    let value = {
      let mut pending = self.pending.lock();
      match pending.take() {
        Some((i, value)) if i == index => Some(value),
        other => {
          *pending = other;
          None
        }
      }
    };
    if let Some(value) = value {
      self.emit(value);
    }
  }
}

impl<T: Send + 'static, O: Subscriber<T>> Subscription for DebounceState<T, O> {
  fn request(&self, n: u64) {
    if validate_request(n) {
      add_demand(&self.requested, n);
    }
  }

  fn cancel(&self) {
    self.upstream.cancel();
    self.stop();
    self.pending.lock().take();
    self.serializer.cancel();
  }
}

struct DebounceSubscriber<T, O> {
  state: Arc<DebounceState<T, O>>,
  downstream: Option<O>,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for DebounceSubscriber<T, O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let state = &self.state;
    let shared = upstream.into_shared();
    if !state.upstream.set_once(shared.clone()) {
      return;
    }
    let Some(mut downstream) = self.downstream.take() else { return };
    downstream.on_subscribe(Upstream::Plain(state.clone()));
    state.serializer.attach(downstream);
    if !state.serializer.is_cancelled() {
      shared.request(UNBOUNDED);
    }
  }

  fn on_next(&mut self, value: T) {
    let state = &self.state;
    if state.serializer.is_done() || state.serializer.is_cancelled() {
      return;
    }
    let index = state.index.fetch_add(1, Ordering::AcqRel) + 1;
    let replaced = state.pending.lock().replace((index, value));
    if let (Some((_, old)), Some(on_dropped)) = (replaced, &state.on_dropped) {
      if let Err(err) = on_dropped(old) {
        state.fail(err);
        return;
      }
    }
    let fire = state.clone();
    let handle = state.worker.schedule(Box::new(move || fire.fire(index)), state.timeout);
    state.timer.set(Arc::new(handle));
  }

  fn on_error(self, err: Error) {
    let state = &self.state;
    state.stop();
    state.upstream.release();
    state.pending.lock().take();
    state.serializer.error(err);
  }

  fn on_complete(self) {
    let state = &self.state;
    state.stop();
    state.upstream.release();
    let pending = state.pending.lock().take();
    if let Some((_, value)) = pending {
      state.emit(value);
    }
    state.serializer.complete();
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use parking_lot::Mutex;

  use crate::prelude::*;

  type Slot = Arc<Mutex<Option<Emitter<i32>>>>;

  fn manual() -> (Slot, impl Flowable<Item = i32>) {
    let slot: Slot = Arc::new(Mutex::new(None));
    let s = slot.clone();
    (slot, flowable::create(move |e| *s.lock() = Some(e), BackpressureStrategy::Buffer))
  }

  fn with(slot: &Slot, f: impl FnOnce(&mut Emitter<i32>)) {
    if let Some(e) = slot.lock().as_mut() {
      f(e);
    }
  }

  #[test]
  fn emits_after_a_quiet_period() {
    let scheduler = TestScheduler::new();
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let d = dropped.clone();
    let (source, flow) = manual();
    let ts = flow
      .debounce(Duration::from_millis(10), scheduler.clone())
      .on_dropped(move |v| {
        d.lock().push(v);
        Ok(())
      })
      .test();
    with(&source, |e| e.next(1));
    scheduler.advance_time_by(Duration::from_millis(5));
    with(&source, |e| e.next(2));
    scheduler.advance_time_by(Duration::from_millis(9));
    ts.assert_empty();
    scheduler.advance_time_by(Duration::from_millis(1));
    ts.assert_values(&[2]).assert_not_terminated();
    assert_eq!(*dropped.lock(), vec![1]);
  }

  #[test]
  fn completion_flushes_the_pending_value() {
    let scheduler = TestScheduler::new();
    let (source, flow) = manual();
    let ts = flow.throttle_with_timeout(Duration::from_millis(10), scheduler.clone()).test();
    with(&source, |e| {
      e.next(1);
      e.complete();
    });
    ts.assert_result(&[1]);
    assert_eq!(scheduler.pending(), 0);
  }

  #[test]
  fn failing_drop_callback_cancels_once() {
    let scheduler = TestScheduler::new();
    let cancels = Arc::new(AtomicUsize::new(0));
    let c = cancels.clone();
    flowable::range(1, 3)
      .do_on_cancel(move || {
        c.fetch_add(1, Ordering::SeqCst);
      })
      .debounce(Duration::from_millis(10), scheduler.clone())
      .on_dropped(|_| Err(Error::msg("drop failed")))
      .test()
      .assert_failure(&Error::msg("drop failed"), &[]);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.pending(), 0);
  }

  #[test]
  fn emission_without_demand_fails() {
    let scheduler = TestScheduler::new();
    let (source, flow) = manual();
    let ts = flow.debounce(Duration::from_millis(10), scheduler.clone()).test_with(0);
    with(&source, |e| e.next(1));
    scheduler.advance_time_by(Duration::from_millis(10));
    ts.assert_error_matches(|e| matches!(e, Error::MissingBackpressure(_)));
  }
}
