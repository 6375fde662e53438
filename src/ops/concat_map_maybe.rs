use std::{
  ops::ControlFlow,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Weak,
  },
};

use parking_lot::Mutex;

use crate::{
  config,
  disposable::{BoxDisposable, Disposable, SerialDisposable},
  drain::{DownstreamCell, WorkInProgress},
  error::{Error, ErrorCollector},
  flowable::Flowable,
  maybe::{Maybe, MaybeObserver},
  queue::SimpleQueue,
  subscriber::Subscriber,
  subscription::{
    add_demand, produced, validate_request, Subscription, SubscriptionSlot, Upstream,
  },
};

/// Maps every value to a [`Maybe`] and runs them one at a time, emitting
/// each success in order. Empty results are skipped; any error terminates
/// the stream right away.
#[derive(Clone)]
pub struct ConcatMapMaybe<S, F> {
  source: S,
  mapper: F,
  prefetch: usize,
}

impl<S, F> ConcatMapMaybe<S, F> {
  pub fn new(source: S, mapper: F) -> Self {
    ConcatMapMaybe { source, mapper, prefetch: config::buffer_size() }
  }

  pub fn prefetch(mut self, prefetch: usize) -> Self {
    self.prefetch = prefetch.max(1);
    self
  }
}

impl<S, M, F> Flowable for ConcatMapMaybe<S, F>
where
  S: Flowable,
  M: Maybe,
  F: Fn(S::Item) -> M + Send + Sync + 'static,
{
  type Item = M::Item;

  fn subscribe_actual<O: Subscriber<M::Item>>(self, downstream: O) {
    let state = Arc::new_cyclic(|me| State {
      me: me.clone(),
      downstream: DownstreamCell::default(),
      wip: WorkInProgress::default(),
      upstream: SubscriptionSlot::default(),
      queue: SimpleQueue::bounded(self.prefetch),
      mapper: self.mapper,
      inner: SerialDisposable::default(),
      slot: Mutex::new(InnerSlot::Idle),
      requested: AtomicU64::new(0),
      done: AtomicBool::new(false),
      errors: ErrorCollector::default(),
      consumed: AtomicUsize::new(0),
      prefetch: self.prefetch,
      limit: config::replenish_limit(self.prefetch),
    });
    self.source.subscribe_actual(Outer { state, downstream: Some(downstream) })
  }
}

enum InnerSlot<R> {
  Idle,
  Active,
  Ready(R),
}

struct State<T, R, O, F> {
  me: Weak<Self>,
  downstream: DownstreamCell<O>,
  wip: WorkInProgress,
  upstream: SubscriptionSlot,
  queue: SimpleQueue<T>,
  mapper: F,
  inner: SerialDisposable,
  slot: Mutex<InnerSlot<R>>,
  requested: AtomicU64,
  done: AtomicBool,
  errors: ErrorCollector,
  consumed: AtomicUsize,
  prefetch: usize,
  limit: usize,
}

impl<T, R, O, M, F> State<T, R, O, F>
where
  T: Send + 'static,
  R: Send + 'static,
  O: Subscriber<R>,
  M: Maybe<Item = R>,
  F: Fn(T) -> M + Send + Sync + 'static,
{
  fn clear(&self) {
    self.queue.clear();
    *self.slot.lock() = InnerSlot::Idle;
  }

  fn error_now(&self) {
    self.upstream.cancel();
    self.inner.dispose();
    self.clear();
    let err = self.errors.terminate();
    if let (Some(err), Some(downstream)) = (err, self.downstream.take()) {
      downstream.on_error(err);
    }
  }

  fn replenish(&self) {
    let consumed = self.consumed.fetch_add(1, Ordering::AcqRel) + 1;
    if consumed == self.limit {
      self.consumed.store(0, Ordering::Release);
      self.upstream.request(consumed as u64);
    }
  }

  fn emit(&self, value: R) {
    let mut slot = self.downstream.lock();
    if let Some(downstream) = slot.as_mut() {
      downstream.on_next(value);
    }
    if self.downstream.is_cancelled() {
      slot.take();
    }
  }

  fn drain_loop(&self) {
    self.wip.drain(|| loop {
      if self.downstream.is_cancelled() {
        self.clear();
        return ControlFlow::Break(());
      }
      if self.errors.has_error() {
        self.error_now();
        return ControlFlow::Break(());
      }
      let ready = {
        let mut slot = self.slot.lock();
        match &*slot {
          InnerSlot::Active => return ControlFlow::Continue(()),
          InnerSlot::Ready(_) if self.requested.load(Ordering::Acquire) == 0 => {
            return ControlFlow::Continue(());
          }
          InnerSlot::Ready(_) => std::mem::replace(&mut *slot, InnerSlot::Idle),
          InnerSlot::Idle => InnerSlot::Idle,
        }
      };
      if let InnerSlot::Ready(value) = ready {
        produced(&self.requested, 1);
        self.emit(value);
        continue;
      }
      let done = self.done.load(Ordering::Acquire);
      let Some(value) = self.queue.pop() else {
        if done {
          if let Some(downstream) = self.downstream.take() {
            downstream.on_complete();
          }
          return ControlFlow::Break(());
        }
        return ControlFlow::Continue(());
      };
      self.replenish();
      let Some(state) = self.me.upgrade() else { return ControlFlow::Break(()) };
      *self.slot.lock() = InnerSlot::Active;
      (self.mapper)(value).subscribe_actual(InnerObserver { state });
    });
  }
}

impl<T, R, O, M, F> Subscription for State<T, R, O, F>
where
  T: Send + 'static,
  R: Send + 'static,
  O: Subscriber<R>,
  M: Maybe<Item = R>,
  F: Fn(T) -> M + Send + Sync + 'static,
{
  fn request(&self, n: u64) {
    if !validate_request(n) {
      return;
    }
    add_demand(&self.requested, n);
    self.drain_loop();
  }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.upstream.cancel();
      self.inner.dispose();
      if self.wip.enter() {
        self.clear();
      }
    }
  }
}

struct Outer<T, R, O, F> {
  state: Arc<State<T, R, O, F>>,
  downstream: Option<O>,
}

impl<T, R, O, M, F> Subscriber<T> for Outer<T, R, O, F>
where
  T: Send + 'static,
  R: Send + 'static,
  O: Subscriber<R>,
  M: Maybe<Item = R>,
  F: Fn(T) -> M + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let state = &self.state;
    if !state.upstream.set_once(upstream.into_shared()) {
      return;
    }
    let Some(mut downstream) = self.downstream.take() else { return };
    downstream.on_subscribe(Upstream::Plain(state.clone()));
    if state.downstream.attach(downstream) {
      state.upstream.request(state.prefetch as u64);
    }
  }

  fn on_next(&mut self, value: T) {
    let state = &self.state;
    if state.queue.offer(value).is_err() {
      state.upstream.cancel();
      state.errors.add(Error::MissingBackpressure("concat_map_maybe: queue is full"));
    }
    state.drain_loop();
  }

  fn on_error(self, err: Error) {
    if self.state.errors.add(err) {
      self.state.done.store(true, Ordering::Release);
      self.state.drain_loop();
    }
  }

  fn on_complete(self) {
    self.state.done.store(true, Ordering::Release);
    self.state.drain_loop();
  }
}

struct InnerObserver<T, R, O, F> {
  state: Arc<State<T, R, O, F>>,
}

impl<T, R, O, M, F> MaybeObserver<R> for InnerObserver<T, R, O, F>
where
  T: Send + 'static,
  R: Send + 'static,
  O: Subscriber<R>,
  M: Maybe<Item = R>,
  F: Fn(T) -> M + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) { self.state.inner.replace(disposable) }

  fn on_success(self, value: R) {
    *self.state.slot.lock() = InnerSlot::Ready(value);
    self.state.drain_loop();
  }

  fn on_complete(self) {
    *self.state.slot.lock() = InnerSlot::Idle;
    self.state.drain_loop();
  }

  fn on_error(self, err: Error) {
    if self.state.errors.add(err) {
      self.state.drain_loop();
    }
  }
}
