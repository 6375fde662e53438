//! The per-inner-source subscriber shared by the coordinators that run
//! several inner streams at once (`flat_map`, `concat_map_eager`,
//! `switch_map`).
//!
//! An inner buffers up to `prefetch` values, either in its own queue or by
//! fusing with its source, and wakes its parent's drain loop whenever
//! something changed. The parent polls it and reports consumption so the
//! inner can replenish in batches.

use std::sync::{
  atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
  Arc,
};

use once_cell::sync::OnceCell;

use crate::{
  config,
  error::Error,
  queue::{InnerQueue, SimpleQueue},
  subscriber::Subscriber,
  subscription::{FusionMode, Subscription, SubscriptionSlot, Upstream},
};

pub(crate) trait InnerParent<T>: Send + Sync + 'static {
  /// The inner failed; it is already marked done.
  fn inner_error(&self, inner: &Arc<InnerState<T>>, err: Error);

  /// Something changed: a value arrived or the inner completed.
  fn drain(&self);
}

pub(crate) struct InnerState<T> {
  pub id: usize,
  queue: OnceCell<InnerQueue<T>>,
  upstream: SubscriptionSlot,
  done: AtomicBool,
  exhausted: AtomicBool,
  fusion: AtomicU8,
  prefetch: usize,
  limit: usize,
  consumed: AtomicUsize,
}

impl<T: Send + 'static> InnerState<T> {
  pub fn new(id: usize, prefetch: usize) -> Self {
    InnerState {
      id,
      queue: OnceCell::new(),
      upstream: SubscriptionSlot::default(),
      done: AtomicBool::new(false),
      exhausted: AtomicBool::new(false),
      fusion: AtomicU8::new(FusionMode::NONE.bits()),
      prefetch,
      limit: config::replenish_limit(prefetch),
      consumed: AtomicUsize::new(0),
    }
  }

  /// In SYNC mode the first `Ok(None)` also means the source is exhausted.
  pub fn poll(&self) -> Result<Option<T>, Error> {
    let Some(queue) = self.queue.get() else { return Ok(None) };
    let polled = queue.poll()?;
    if polled.is_none() && self.fusion_mode() == FusionMode::SYNC {
      self.exhausted.store(true, Ordering::Release);
    }
    Ok(polled)
  }

  pub fn is_empty(&self) -> bool {
    self.exhausted.load(Ordering::Acquire) || self.queue.get().map_or(true, InnerQueue::is_empty)
  }

  pub fn is_done(&self) -> bool { self.done.load(Ordering::Acquire) }

  pub fn mark_done(&self) { self.done.store(true, Ordering::Release); }

  /// Done and nothing left to poll.
  pub fn is_finished(&self) -> bool { self.is_done() && self.is_empty() }

  /// Acknowledges `n` polled values; requests the next batch once enough
  /// were consumed.
  pub fn consumed(&self, n: usize) {
    if self.fusion_mode() == FusionMode::SYNC {
      return;
    }
    let total = self.consumed.fetch_add(n, Ordering::AcqRel) + n;
    if total >= self.limit {
      self.consumed.store(0, Ordering::Release);
      self.upstream.request(total as u64);
    }
  }

  pub fn cancel(&self) {
    self.upstream.cancel();
    self.exhausted.store(true, Ordering::Release);
    if let Some(queue) = self.queue.get() {
      queue.clear();
    }
  }

  fn fusion_mode(&self) -> FusionMode { FusionMode::from_bits(self.fusion.load(Ordering::Acquire)) }

  fn initial_request(&self) -> u64 {
    if self.prefetch == usize::MAX {
      u64::MAX
    } else {
      self.prefetch as u64
    }
  }
}

pub(crate) struct InnerSubscriber<T, P> {
  state: Arc<InnerState<T>>,
  parent: Arc<P>,
}

impl<T, P> InnerSubscriber<T, P> {
  pub fn new(state: Arc<InnerState<T>>, parent: Arc<P>) -> Self { InnerSubscriber { state, parent } }
}

impl<T: Send + 'static, P: InnerParent<T>> Subscriber<T> for InnerSubscriber<T, P> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let state = &self.state;
    if !state.upstream.set_once(upstream.clone().into_shared()) {
      return;
    }
    if let Upstream::Fuseable(queue) = &upstream {
      let mode = queue.request_fusion(FusionMode::ANY);
      if mode == FusionMode::SYNC {
        state.fusion.store(mode.bits(), Ordering::Release);
        let _ = state.queue.set(InnerQueue::Fused(queue.clone()));
        state.mark_done();
        self.parent.drain();
        return;
      }
      if mode == FusionMode::ASYNC {
        state.fusion.store(mode.bits(), Ordering::Release);
        let _ = state.queue.set(InnerQueue::Fused(queue.clone()));
        upstream.request(state.initial_request());
        return;
      }
    }
    let own = if state.prefetch == usize::MAX {
      SimpleQueue::unbounded()
    } else {
      SimpleQueue::bounded(state.prefetch)
    };
    let _ = state.queue.set(InnerQueue::Own(own));
    upstream.request(state.initial_request());
  }

  fn on_next(&mut self, value: T) {
    let offered = match self.state.queue.get() {
      Some(queue) => queue.offer(value).is_ok(),
      None => false,
    };
    if offered {
      self.parent.drain();
    } else {
      self.state.upstream.cancel();
      self.state.mark_done();
      self
        .parent
        .inner_error(&self.state, Error::MissingBackpressure("inner queue is full"));
    }
  }

  fn on_error(self, err: Error) {
    self.state.mark_done();
    self.parent.inner_error(&self.state, err);
  }

  fn on_complete(self) {
    self.state.mark_done();
    self.parent.drain();
  }

  fn on_available(&mut self) { self.parent.drain() }
}
