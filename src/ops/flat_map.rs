use std::{
  ops::ControlFlow,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  config,
  drain::{DownstreamCell, WorkInProgress},
  error::{Error, ErrorCollector},
  flowable::Flowable,
  function::RxFn,
  ops::inner::{InnerParent, InnerState, InnerSubscriber},
  subscriber::Subscriber,
  subscription::{
    add_demand, produced, validate_request, DynamicSet, Subscription, SubscriptionSlot, Upstream,
    UNBOUNDED,
  },
};

/// Maps every value to an inner stream and merges their values.
///
/// At most `max_concurrency` inner streams run at once; each buffers up to
/// `prefetch` values. Values of one inner keep their order, values of
/// different inners interleave. The first error cancels everything unless
/// errors are delayed, in which case every failure is reported together
/// once all sources terminated.
#[derive(Clone)]
pub struct FlatMap<S, F> {
  source: S,
  mapper: F,
  max_concurrency: usize,
  prefetch: usize,
  delay_errors: bool,
}

impl<S, F> FlatMap<S, F> {
  pub fn new(source: S, mapper: F) -> Self {
    FlatMap {
      source,
      mapper,
      max_concurrency: usize::MAX,
      prefetch: config::buffer_size(),
      delay_errors: false,
    }
  }

  pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
    self.max_concurrency = max_concurrency.max(1);
    self
  }

  pub fn prefetch(mut self, prefetch: usize) -> Self {
    self.prefetch = prefetch.max(1);
    self
  }

  pub fn delay_errors(mut self, delay_errors: bool) -> Self {
    self.delay_errors = delay_errors;
    self
  }
}

impl<S, F> Flowable for FlatMap<S, F>
where
  S: Flowable,
  F: RxFn<S::Item>,
  F::Output: Flowable,
{
  type Item = <F::Output as Flowable>::Item;

  fn subscribe_actual<O: Subscriber<Self::Item>>(self, downstream: O) {
    let state = Arc::new(MergeState {
      downstream: DownstreamCell::default(),
      wip: WorkInProgress::default(),
      requested: AtomicU64::new(0),
      upstream: SubscriptionSlot::default(),
      inners: Mutex::new(DynamicSet::default()),
      cursor: AtomicUsize::new(0),
      errors: ErrorCollector::default(),
      done: AtomicBool::new(false),
      max_concurrency: self.max_concurrency,
      prefetch: self.prefetch,
      delay_errors: self.delay_errors,
    });
    self.source.subscribe_actual(MergeOuter { state, mapper: self.mapper, downstream: Some(downstream) })
  }
}

struct MergeOuter<U, O, F> {
  state: Arc<MergeState<U, O>>,
  mapper: F,
  downstream: Option<O>,
}

impl<T, U, O, F> Subscriber<T> for MergeOuter<U, O, F>
where
  T: Send + 'static,
  U: Send + 'static,
  F: RxFn<T>,
  F::Output: Flowable<Item = U>,
  O: Subscriber<U>,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let state = &self.state;
    if !state.upstream.set_once(upstream.into_shared()) {
      return;
    }
    let Some(mut downstream) = self.downstream.take() else { return };
    downstream.on_subscribe(Upstream::Plain(state.clone()));
    if !state.downstream.attach(downstream) {
      return;
    }
    let initial = if state.max_concurrency == usize::MAX {
      UNBOUNDED
    } else {
      state.max_concurrency as u64
    };
    state.upstream.request(initial);
    state.drain_loop();
  }

  fn on_next(&mut self, value: T) {
    let state = &self.state;
    if state.done.load(Ordering::Acquire) || state.downstream.is_cancelled() {
      return;
    }
    match self.mapper.call(value) {
      Ok(inner) => state.subscribe_inner(inner),
      Err(err) => {
        state.upstream.cancel();
        state.outer_error(err);
      }
    }
  }

  fn on_error(self, err: Error) { self.state.outer_error(err) }

  fn on_complete(self) {
    self.state.done.store(true, Ordering::Release);
    self.state.drain_loop();
  }
}

struct MergeState<U, O> {
  downstream: DownstreamCell<O>,
  wip: WorkInProgress,
  requested: AtomicU64,
  upstream: SubscriptionSlot,
  inners: Mutex<DynamicSet<Arc<InnerState<U>>>>,
  cursor: AtomicUsize,
  errors: ErrorCollector,
  done: AtomicBool,
  max_concurrency: usize,
  prefetch: usize,
  delay_errors: bool,
}

impl<U: Send + 'static, O: Subscriber<U>> MergeState<U, O> {
  fn subscribe_inner<P: Flowable<Item = U>>(self: &Arc<Self>, source: P) {
    let inner = {
      let mut inners = self.inners.lock();
      if self.downstream.is_cancelled() {
        return;
      }
      let id = inners.reserve_id();
      let inner = Arc::new(InnerState::new(id, self.prefetch));
      inners.insert(id, inner.clone());
      inner
    };
    source.subscribe_actual(InnerSubscriber::new(inner, self.clone()));
  }

  fn cancel_inners(&self) {
    let inners: Vec<_> = self.inners.lock().drain().collect();
    for inner in inners {
      inner.cancel();
    }
  }

  fn outer_error(&self, err: Error) {
    if self.errors.add(err) {
      self.done.store(true, Ordering::Release);
      if !self.delay_errors {
        self.cancel_inners();
      }
    }
    self.drain_loop();
  }

  fn drain_loop(&self) {
    self.wip.drain(|| {
      let mut slot = self.downstream.lock();
      if slot.is_none() {
        return ControlFlow::Continue(());
      }
      loop {
        if self.downstream.is_cancelled() {
          slot.take();
          self.cancel_inners();
          return ControlFlow::Break(());
        }
        if !self.delay_errors && self.errors.has_error() {
          self.upstream.cancel();
          self.cancel_inners();
          if let (Some(err), Some(downstream)) = (self.errors.terminate(), slot.take()) {
            downstream.on_error(err);
          }
          return ControlFlow::Break(());
        }

        let requested = self.requested.load(Ordering::Acquire);
        let inners = self.inners.lock().snapshot();
        let count = inners.len();
        let start = self.cursor.load(Ordering::Relaxed) % count.max(1);
        let mut emitted = 0;
        let mut finished = 0;
        let mut failed = false;
        for k in 0..count {
          let idx = (start + k) % count;
          let inner = &inners[idx];
          let mut polled = 0;
          while emitted != requested {
            match inner.poll() {
              Ok(Some(value)) => {
                if let Some(downstream) = slot.as_mut() {
                  downstream.on_next(value);
                }
                emitted += 1;
                polled += 1;
                if self.downstream.is_cancelled() {
                  slot.take();
                  self.cancel_inners();
                  return ControlFlow::Break(());
                }
              }
              Ok(None) => break,
              Err(err) => {
                inner.cancel();
                inner.mark_done();
                self.errors.add(err);
                failed = true;
                break;
              }
            }
          }
          if polled > 0 {
            inner.consumed(polled);
          }
          if inner.is_finished() {
            self.inners.lock().remove(inner.id);
            finished += 1;
          }
          if emitted == requested {
            self.cursor.store(idx, Ordering::Relaxed);
            break;
          }
        }
        if emitted > 0 {
          produced(&self.requested, emitted);
        }

        let done = self.done.load(Ordering::Acquire);
        if done && self.inners.lock().is_empty() {
          self.upstream.release();
          let err = self.errors.terminate();
          if let Some(downstream) = slot.take() {
            match err {
              Some(err) => downstream.on_error(err),
              None => downstream.on_complete(),
            }
          }
          return ControlFlow::Break(());
        }
        if finished > 0 && !done && self.max_concurrency != usize::MAX {
          self.upstream.request(finished);
        }
        if emitted == 0 && finished == 0 && !failed {
          return ControlFlow::Continue(());
        }
      }
    });
  }
}

impl<U: Send + 'static, O: Subscriber<U>> InnerParent<U> for MergeState<U, O> {
  fn inner_error(&self, _inner: &Arc<InnerState<U>>, err: Error) {
    if self.errors.add(err) && !self.delay_errors {
      self.upstream.cancel();
      self.cancel_inners();
    }
    self.drain_loop();
  }

  fn drain(&self) { self.drain_loop() }
}

impl<U: Send + 'static, O: Subscriber<U>> Subscription for MergeState<U, O> {
  fn request(&self, n: u64) {
    if validate_request(n) {
      add_demand(&self.requested, n);
      self.drain_loop();
    }
  }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.upstream.cancel();
      self.cancel_inners();
      if self.wip.enter() {
        self.downstream.take();
      }
    }
  }
}
