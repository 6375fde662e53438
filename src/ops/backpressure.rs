//! Operators that request everything from the upstream and reconcile it
//! with the downstream demand: buffer it, drop it or keep only the latest.

use std::{
  ops::ControlFlow,
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  drain::{DownstreamCell, WorkInProgress},
  error::Error,
  flowable::Flowable,
  function::OnDropped,
  hooks,
  queue::SimpleQueue,
  subscriber::Subscriber,
  subscription::{
    add_demand, produced, validate_request, FusedQueue, FusionMode, QueueSubscription, Subscription,
    SubscriptionSlot, Upstream, UNBOUNDED,
  },
};

// ==================== OnBackpressureBuffer ====================

/// Queues values until the downstream requests them. Offers ASYNC fusion.
#[derive(Clone)]
pub struct OnBackpressureBuffer<S> {
  source: S,
  capacity: Option<usize>,
}

impl<S> OnBackpressureBuffer<S> {
  pub fn new(source: S) -> Self { OnBackpressureBuffer { source, capacity: None } }

  /// Bounds the buffer; an overflow cancels the upstream and fails with
  /// [`Error::MissingBackpressure`].
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = Some(capacity);
    self
  }
}

impl<S: Flowable> Flowable for OnBackpressureBuffer<S> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    let queue = match self.capacity {
      Some(capacity) => SimpleQueue::bounded(capacity),
      None => SimpleQueue::unbounded(),
    };
    let state = BufferState::new(Store::Queue(queue), true);
    self.source.subscribe_actual(BufferSubscriber { state, downstream: Some(downstream) })
  }
}

// ==================== OnBackpressureLatest ====================

/// Keeps only the most recent value not yet requested.
#[derive(Clone)]
pub struct OnBackpressureLatest<S> {
  source: S,
}

impl<S> OnBackpressureLatest<S> {
  pub fn new(source: S) -> Self { OnBackpressureLatest { source } }
}

impl<S: Flowable> Flowable for OnBackpressureLatest<S> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    let state = BufferState::new(Store::Latest(Mutex::new(None)), false);
    self.source.subscribe_actual(BufferSubscriber { state, downstream: Some(downstream) })
  }
}

enum Store<T> {
  Queue(SimpleQueue<T>),
  Latest(Mutex<Option<T>>),
}

impl<T> Store<T> {
  fn offer(&self, value: T) -> Result<(), T> {
    match self {
      Store::Queue(q) => q.offer(value),
      Store::Latest(slot) => {
        *slot.lock() = Some(value);
        Ok(())
      }
    }
  }

  fn poll(&self) -> Option<T> {
    match self {
      Store::Queue(q) => q.pop(),
      Store::Latest(slot) => slot.lock().take(),
    }
  }

  fn len(&self) -> usize {
    match self {
      Store::Queue(q) => q.len(),
      Store::Latest(slot) => usize::from(slot.lock().is_some()),
    }
  }

  fn clear(&self) {
    match self {
      Store::Queue(q) => q.clear(),
      Store::Latest(slot) => drop(slot.lock().take()),
    }
  }
}

struct BufferState<T, O> {
  store: Store<T>,
  requested: AtomicU64,
  wip: WorkInProgress,
  downstream: DownstreamCell<O>,
  done: AtomicBool,
  error: Mutex<Option<Error>>,
  upstream: SubscriptionSlot,
  fuseable: bool,
  output_fused: AtomicBool,
}

impl<T: Send + 'static, O: Subscriber<T>> BufferState<T, O> {
  fn new(store: Store<T>, fuseable: bool) -> Arc<Self> {
    Arc::new(BufferState {
      store,
      requested: AtomicU64::new(0),
      wip: WorkInProgress::default(),
      downstream: DownstreamCell::default(),
      done: AtomicBool::new(false),
      error: Mutex::new(None),
      upstream: SubscriptionSlot::default(),
      fuseable,
      output_fused: AtomicBool::new(false),
    })
  }

  fn drain(&self) { self.wip.drain(|| self.round()) }

  fn terminate(&self, slot: &mut Option<O>) {
    let err = self.error.lock().take();
    if let Some(downstream) = slot.take() {
      match err {
        Some(err) => downstream.on_error(err),
        None => downstream.on_complete(),
      }
    }
  }

  fn round(&self) -> ControlFlow<()> {
    let mut slot = self.downstream.lock();
    if slot.is_none() {
      return ControlFlow::Continue(());
    }
    if self.output_fused.load(Ordering::Acquire) {
      if self.downstream.is_cancelled() {
        slot.take();
        return ControlFlow::Break(());
      }
      let done = self.done.load(Ordering::Acquire);
      if let Some(downstream) = slot.as_mut() {
        downstream.on_available();
      }
      if done {
        self.terminate(&mut slot);
        return ControlFlow::Break(());
      }
      return ControlFlow::Continue(());
    }

    let requested = self.requested.load(Ordering::Acquire);
    let mut emitted = 0;
    loop {
      if self.downstream.is_cancelled() {
        slot.take();
        self.store.clear();
        return ControlFlow::Break(());
      }
      let done = self.done.load(Ordering::Acquire);
      if done && self.error.lock().is_some() {
        self.store.clear();
        self.terminate(&mut slot);
        return ControlFlow::Break(());
      }
      let next = if emitted == requested { None } else { self.store.poll() };
      let Some(value) = next else {
        if done && self.store.len() == 0 {
          self.terminate(&mut slot);
          return ControlFlow::Break(());
        }
        break;
      };
      if let Some(downstream) = slot.as_mut() {
        downstream.on_next(value);
      }
      emitted += 1;
    }
    if emitted > 0 {
      produced(&self.requested, emitted);
    }
    ControlFlow::Continue(())
  }
}

impl<T: Send + 'static, O: Subscriber<T>> Subscription for BufferState<T, O> {
  fn request(&self, n: u64) {
    if !validate_request(n) {
      return;
    }
    add_demand(&self.requested, n);
    self.drain();
  }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.upstream.cancel();
      if self.wip.enter() {
        self.downstream.take();
        self.store.clear();
      }
    }
  }
}

impl<T: Send + 'static, O: Subscriber<T>> FusedQueue<T> for BufferState<T, O> {
  fn poll(&self) -> Result<Option<T>, Error> { Ok(self.store.poll()) }

  fn is_empty(&self) -> bool { self.store.len() == 0 }

  fn clear(&self) { self.store.clear() }

  fn size(&self) -> usize { self.store.len() }
}

impl<T: Send + 'static, O: Subscriber<T>> QueueSubscription<T> for BufferState<T, O> {
  fn request_fusion(&self, mode: FusionMode) -> FusionMode {
    if self.fuseable && mode.is_async() {
      self.output_fused.store(true, Ordering::Release);
      return FusionMode::ASYNC;
    }
    FusionMode::NONE
  }
}

struct BufferSubscriber<T, O> {
  state: Arc<BufferState<T, O>>,
  downstream: Option<O>,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for BufferSubscriber<T, O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let state = &self.state;
    let shared = upstream.into_shared();
    if !state.upstream.set_once(shared.clone()) {
      return;
    }
    let Some(mut downstream) = self.downstream.take() else { return };
    if state.fuseable {
      downstream.on_subscribe(Upstream::Fuseable(state.clone()));
    } else {
      downstream.on_subscribe(Upstream::Plain(state.clone()));
    }
    if state.downstream.attach(downstream) {
      shared.request(UNBOUNDED);
    }
  }

  fn on_next(&mut self, value: T) {
    let state = &self.state;
    if state.done.load(Ordering::Acquire) {
      return;
    }
    if state.store.offer(value).is_err() {
      tracing::debug!("on_backpressure_buffer: buffer is full");
      state.upstream.cancel();
      *state.error.lock() =
        Some(Error::MissingBackpressure("on_backpressure_buffer: buffer is full"));
      state.done.store(true, Ordering::Release);
    }
    state.drain();
  }

  fn on_error(self, err: Error) {
    let state = &self.state;
    if state.done.swap(true, Ordering::AcqRel) {
      hooks::on_undeliverable(err);
      return;
    }
    *state.error.lock() = Some(err);
    state.upstream.release();
    state.drain();
  }

  fn on_complete(self) {
    let state = &self.state;
    if state.done.swap(true, Ordering::AcqRel) {
      return;
    }
    state.upstream.release();
    state.drain();
  }
}

// ==================== OnBackpressureDrop ====================

/// Discards values the downstream has not requested.
pub struct OnBackpressureDrop<S: Flowable> {
  source: S,
  on_dropped: Option<OnDropped<S::Item>>,
}

impl<S: Flowable> OnBackpressureDrop<S> {
  pub fn new(source: S) -> Self { OnBackpressureDrop { source, on_dropped: None } }

  /// Receives every discarded value. An `Err` cancels the upstream and
  /// fails the stream.
  pub fn on_dropped<F>(mut self, on_dropped: F) -> Self
  where
    F: Fn(S::Item) -> Result<(), Error> + Send + Sync + 'static,
  {
    self.on_dropped = Some(Arc::new(on_dropped));
    self
  }
}

impl<S: Flowable> Flowable for OnBackpressureDrop<S> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    self.source.subscribe_actual(DropSubscriber {
      state: Arc::new(DropState { requested: AtomicU64::new(0), upstream: SubscriptionSlot::default() }),
      downstream: Some(downstream),
      on_dropped: self.on_dropped,
    })
  }
}

struct DropState {
  requested: AtomicU64,
  upstream: SubscriptionSlot,
}

impl Subscription for DropState {
  fn request(&self, n: u64) {
    if validate_request(n) {
      add_demand(&self.requested, n);
    }
  }

  fn cancel(&self) { self.upstream.cancel(); }
}

struct DropSubscriber<T, O> {
  state: Arc<DropState>,
  downstream: Option<O>,
  on_dropped: Option<OnDropped<T>>,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for DropSubscriber<T, O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let shared = upstream.into_shared();
    if !self.state.upstream.set_once(shared.clone()) {
      return;
    }
    if let Some(downstream) = self.downstream.as_mut() {
      downstream.on_subscribe(Upstream::Plain(self.state.clone()));
    }
    if !self.state.upstream.is_cancelled() {
      shared.request(UNBOUNDED);
    }
  }

  fn on_next(&mut self, value: T) {
    let Some(downstream) = self.downstream.as_mut() else { return };
    if self.state.requested.load(Ordering::Acquire) > 0 {
      downstream.on_next(value);
      produced(&self.state.requested, 1);
      return;
    }
    let Some(on_dropped) = &self.on_dropped else { return };
    if let Err(err) = on_dropped(value) {
      self.state.upstream.cancel();
      if let Some(downstream) = self.downstream.take() {
        downstream.on_error(err);
      }
    }
  }

  fn on_error(self, err: Error) {
    self.state.upstream.release();
    match self.downstream {
      Some(downstream) => downstream.on_error(err),
      None => hooks::on_undeliverable(err),
    }
  }

  fn on_complete(self) {
    self.state.upstream.release();
    if let Some(downstream) = self.downstream {
      downstream.on_complete();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::prelude::*;

  #[test]
  fn buffer_holds_values_until_requested() {
    let ts = flowable::range(1, 5).hide().on_backpressure_buffer().test_with(2);
    ts.assert_values(&[1, 2]).assert_not_complete();
    ts.request(3);
    ts.assert_result(&[1, 2, 3, 4, 5]);
  }

  #[test]
  fn buffer_offers_async_fusion() {
    let ts = TestSubscriber::with_fusion(FusionMode::ANY);
    flowable::range(1, 3).on_backpressure_buffer().subscribe_with(ts.clone());
    ts.assert_fusion_mode(FusionMode::ASYNC).assert_result(&[1, 2, 3]);
  }

  #[test]
  fn bounded_buffer_overflow_fails() {
    let ts = flowable::range(1, 5).on_backpressure_buffer().capacity(2).test_with(0);
    ts.assert_error_matches(|e| matches!(e, Error::MissingBackpressure(_)));
    assert_eq!(ts.value_count(), 0);
  }

  #[test]
  fn drop_discards_unrequested_values() {
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let d = dropped.clone();
    flowable::range(1, 5)
      .on_backpressure_drop()
      .on_dropped(move |v| {
        d.lock().push(v);
        Ok(())
      })
      .test_with(2)
      .assert_result(&[1, 2]);
    assert_eq!(*dropped.lock(), vec![3, 4, 5]);
  }

  #[test]
  fn failing_drop_callback_fails_the_stream() {
    flowable::range(1, 5)
      .on_backpressure_drop()
      .on_dropped(|_| Err(Error::msg("full")))
      .test_with(1)
      .assert_failure(&Error::msg("full"), &[1]);
  }

  #[test]
  fn latest_keeps_the_newest_value() {
    let ts = flowable::range(1, 5).on_backpressure_latest().test_with(1);
    ts.assert_values(&[1]).assert_not_complete();
    ts.request(1);
    ts.assert_result(&[1, 5]);
  }
}
