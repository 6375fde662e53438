use std::{
  marker::PhantomData,
  ops::ControlFlow,
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
  },
};

use once_cell::sync::OnceCell;

use crate::{
  config,
  drain::{DownstreamCell, WorkInProgress},
  error::{Error, ErrorCollector},
  flowable::Flowable,
  function::RxFn,
  queue::{InnerQueue, SimpleQueue},
  subscriber::Subscriber,
  subscription::{FusionMode, Subscription, SubscriptionArbiter, SubscriptionSlot, Upstream},
};

/// When a concatenating operator reports an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
  /// Right away, cancelling the running inner source.
  #[default]
  Immediate,
  /// Once the running inner source terminated.
  Boundary,
  /// After every source ran; several errors become one composite.
  End,
}

/// Maps every value to an inner stream and runs them one after another.
///
/// Outer values are prefetched (or polled from a fused upstream) and
/// mapped only when the previous inner completed. Demand that the previous
/// inner did not fulfil carries over to the next one.
#[derive(Clone)]
pub struct ConcatMap<S, F> {
  source: S,
  mapper: F,
  prefetch: usize,
  error_mode: ErrorMode,
}

impl<S, F> ConcatMap<S, F> {
  pub fn new(source: S, mapper: F) -> Self {
    ConcatMap { source, mapper, prefetch: config::buffer_size(), error_mode: ErrorMode::Immediate }
  }

  pub fn prefetch(mut self, prefetch: usize) -> Self {
    self.prefetch = prefetch.max(1);
    self
  }

  pub fn error_mode(mut self, error_mode: ErrorMode) -> Self {
    self.error_mode = error_mode;
    self
  }
}

impl<S, F> Flowable for ConcatMap<S, F>
where
  S: Flowable,
  F: RxFn<S::Item>,
  F::Output: Flowable,
{
  type Item = <F::Output as Flowable>::Item;

  fn subscribe_actual<O: Subscriber<Self::Item>>(self, downstream: O) {
    let state = Arc::new(ConcatState {
      downstream: DownstreamCell::default(),
      arbiter: SubscriptionArbiter::default(),
      wip: WorkInProgress::default(),
      upstream: SubscriptionSlot::default(),
      queue: OnceCell::new(),
      sync_fused: AtomicBool::new(false),
      mapper: self.mapper,
      active: AtomicBool::new(false),
      done: AtomicBool::new(false),
      errors: ErrorCollector::default(),
      consumed: AtomicUsize::new(0),
      prefetch: self.prefetch,
      limit: config::replenish_limit(self.prefetch),
      error_mode: self.error_mode,
      _item: PhantomData,
    });
    self.source.subscribe_actual(ConcatOuter { state, downstream: Some(downstream) })
  }
}

struct ConcatState<T, U, O, F> {
  downstream: DownstreamCell<O>,
  arbiter: SubscriptionArbiter,
  wip: WorkInProgress,
  upstream: SubscriptionSlot,
  queue: OnceCell<InnerQueue<T>>,
  sync_fused: AtomicBool,
  mapper: F,
  active: AtomicBool,
  done: AtomicBool,
  errors: ErrorCollector,
  consumed: AtomicUsize,
  prefetch: usize,
  limit: usize,
  error_mode: ErrorMode,
  _item: PhantomData<fn() -> U>,
}

impl<T, U, O, F> ConcatState<T, U, O, F>
where
  T: Send + 'static,
  U: Send + 'static,
  F: RxFn<T>,
  F::Output: Flowable<Item = U>,
  O: Subscriber<U>,
{
  fn poll(&self) -> Result<Option<T>, Error> {
    match self.queue.get() {
      Some(queue) => queue.poll(),
      None => Ok(None),
    }
  }

  fn clear(&self) {
    if let Some(queue) = self.queue.get() {
      queue.clear();
    }
  }

  /// Terminates downstream with the collected error right away.
  fn error_now(&self) {
    self.arbiter.cancel();
    self.upstream.cancel();
    self.clear();
    let err = self.errors.terminate();
    if let (Some(err), Some(downstream)) = (err, self.downstream.take()) {
      downstream.on_error(err);
    }
  }

  fn outer_error(self: &Arc<Self>, err: Error) {
    if !self.errors.add(err) {
      return;
    }
    self.done.store(true, Ordering::Release);
    if self.error_mode == ErrorMode::Immediate {
      self.error_now();
    } else {
      self.drain_loop();
    }
  }

  fn replenish(&self) {
    if self.sync_fused.load(Ordering::Acquire) {
      return;
    }
    let consumed = self.consumed.fetch_add(1, Ordering::AcqRel) + 1;
    if consumed == self.limit {
      self.consumed.store(0, Ordering::Release);
      self.upstream.request(consumed as u64);
    }
  }

  fn drain_loop(self: &Arc<Self>) {
    self.wip.drain(|| loop {
      if self.downstream.is_cancelled() {
        self.clear();
        return ControlFlow::Break(());
      }
      if self.active.load(Ordering::Acquire) {
        return ControlFlow::Continue(());
      }
      if self.error_mode != ErrorMode::End && self.errors.has_error() {
        self.error_now();
        return ControlFlow::Break(());
      }
      let done = self.done.load(Ordering::Acquire);
      let next = match self.poll() {
        Ok(next) => next,
        Err(err) => {
          self.upstream.cancel();
          self.errors.add(err);
          self.error_now();
          return ControlFlow::Break(());
        }
      };
      let Some(value) = next else {
        if done {
          let err = self.errors.terminate();
          if let Some(downstream) = self.downstream.take() {
            match err {
              Some(err) => downstream.on_error(err),
              None => downstream.on_complete(),
            }
          }
          return ControlFlow::Break(());
        }
        return ControlFlow::Continue(());
      };
      self.replenish();
      match self.mapper.call(value) {
        Ok(inner) => {
          self.active.store(true, Ordering::Release);
          inner.subscribe_actual(ConcatInner { state: self.clone(), produced: 0 });
        }
        Err(err) => {
          self.upstream.cancel();
          self.errors.add(err);
          self.error_now();
          return ControlFlow::Break(());
        }
      }
    });
  }

  fn inner_done(self: &Arc<Self>, produced: u64) {
    self.arbiter.produced(produced);
    self.active.store(false, Ordering::Release);
    self.drain_loop();
  }
}

impl<T, U, O, F> Subscription for ConcatState<T, U, O, F>
where
  T: Send + 'static,
  U: Send + 'static,
  F: RxFn<T>,
  F::Output: Flowable<Item = U>,
  O: Subscriber<U>,
{
  fn request(&self, n: u64) { self.arbiter.request(n) }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.arbiter.cancel();
      self.upstream.cancel();
      if self.wip.enter() {
        self.clear();
      }
    }
  }
}

struct ConcatOuter<T, U, O, F> {
  state: Arc<ConcatState<T, U, O, F>>,
  downstream: Option<O>,
}

impl<T, U, O, F> ConcatOuter<T, U, O, F>
where
  T: Send + 'static,
  U: Send + 'static,
  F: RxFn<T>,
  F::Output: Flowable<Item = U>,
  O: Subscriber<U>,
{
  /// Hands the coordinator to the downstream; false if it cancelled.
  fn connect_downstream(&mut self) -> bool {
    let Some(mut downstream) = self.downstream.take() else { return false };
    downstream.on_subscribe(Upstream::Plain(self.state.clone()));
    self.state.downstream.attach(downstream)
  }
}

impl<T, U, O, F> Subscriber<T> for ConcatOuter<T, U, O, F>
where
  T: Send + 'static,
  U: Send + 'static,
  F: RxFn<T>,
  F::Output: Flowable<Item = U>,
  O: Subscriber<U>,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let state = self.state.clone();
    if !state.upstream.set_once(upstream.clone().into_shared()) {
      return;
    }
    if let Upstream::Fuseable(queue) = &upstream {
      let mode = queue.request_fusion(FusionMode::ANY);
      if mode == FusionMode::SYNC {
        let _ = state.queue.set(InnerQueue::Fused(queue.clone()));
        state.sync_fused.store(true, Ordering::Release);
        state.done.store(true, Ordering::Release);
        if self.connect_downstream() {
          state.drain_loop();
        }
        return;
      }
      if mode == FusionMode::ASYNC {
        let _ = state.queue.set(InnerQueue::Fused(queue.clone()));
        if self.connect_downstream() {
          upstream.request(state.prefetch as u64);
        }
        return;
      }
    }
    let _ = state.queue.set(InnerQueue::Own(SimpleQueue::bounded(state.prefetch)));
    if self.connect_downstream() {
      upstream.request(state.prefetch as u64);
    }
  }

  fn on_next(&mut self, value: T) {
    let state = &self.state;
    let offered = state.queue.get().map_or(false, |queue| queue.offer(value).is_ok());
    if offered {
      state.drain_loop();
    } else {
      state.upstream.cancel();
      state.outer_error(Error::MissingBackpressure("concat_map: queue is full"));
    }
  }

  fn on_error(self, err: Error) { self.state.outer_error(err) }

  fn on_complete(self) {
    self.state.done.store(true, Ordering::Release);
    self.state.drain_loop();
  }

  fn on_available(&mut self) { self.state.drain_loop() }
}

struct ConcatInner<T, U, O, F> {
  state: Arc<ConcatState<T, U, O, F>>,
  produced: u64,
}

impl<T, U, O, F> Subscriber<U> for ConcatInner<T, U, O, F>
where
  T: Send + 'static,
  U: Send + 'static,
  F: RxFn<T>,
  F::Output: Flowable<Item = U>,
  O: Subscriber<U>,
{
  fn on_subscribe(&mut self, upstream: Upstream<U>) { self.state.arbiter.set_subscription(upstream.into_shared()) }

  fn on_next(&mut self, value: U) {
    self.produced += 1;
    let mut slot = self.state.downstream.lock();
    if let Some(downstream) = slot.as_mut() {
      downstream.on_next(value);
    }
    if self.state.downstream.is_cancelled() {
      slot.take();
    }
  }

  fn on_error(self, err: Error) {
    let state = self.state;
    if !state.errors.add(err) {
      return;
    }
    if state.error_mode == ErrorMode::Immediate {
      state.error_now();
    } else {
      state.inner_done(self.produced);
    }
  }

  fn on_complete(self) { self.state.inner_done(self.produced) }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate::prelude::*;

  fn value_then_error() -> impl Flowable<Item = i32> {
    flowable::create(
      |mut e: Emitter<i32>| {
        e.next(1);
        e.error(Error::msg("outer"));
      },
      BackpressureStrategy::Buffer,
    )
  }

  #[test]
  fn runs_inners_in_sequence() {
    flowable::range(1, 3)
      .concat_map(|v| flowable::range(v * 10, 2))
      .test()
      .assert_result(&[10, 11, 20, 21, 30, 31]);
  }

  #[test]
  fn demand_carries_across_sources() {
    let ts = flowable::concat([flowable::range(1, 3), flowable::range(4, 3)]).test_with(2);
    ts.assert_values(&[1, 2]);
    ts.request(2);
    ts.assert_values(&[1, 2, 3, 4]).assert_not_complete();
    ts.request(10);
    ts.assert_result(&[1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn immediate_mode_cancels_the_running_inner() {
    let cancelled = Arc::new(AtomicUsize::new(0));
    let c = cancelled.clone();
    value_then_error()
      .concat_map(move |_| {
        let c = c.clone();
        flowable::never::<i32>().do_on_cancel(move || {
          c.fetch_add(1, Ordering::SeqCst);
        })
      })
      .test()
      .assert_failure(&Error::msg("outer"), &[]);
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn boundary_and_end_modes_wait_for_the_inner() {
    for mode in [ErrorMode::Boundary, ErrorMode::End] {
      value_then_error()
        .concat_map(|_| flowable::never::<i32>())
        .error_mode(mode)
        .test()
        .assert_empty();
      value_then_error()
        .concat_map(|v| flowable::just(v * 10))
        .error_mode(mode)
        .test()
        .assert_failure(&Error::msg("outer"), &[10]);
    }
  }

  #[test]
  fn delay_error_keeps_going_and_reports_at_the_end() {
    flowable::range(1, 4)
      .concat_map_delay_error(|v| {
        if v % 2 == 0 {
          flowable::error(Error::msg(format!("e{v}"))).boxed()
        } else {
          flowable::just(v).boxed()
        }
      })
      .test()
      .assert_failure(&Error::combine(Error::msg("e2"), Error::msg("e4")), &[1, 3]);
  }

  #[test]
  fn plain_outer_is_prefetched() {
    flowable::range(1, 300)
      .hide()
      .concat_map(flowable::just)
      .test()
      .assert_value_count(300)
      .assert_complete();
  }
}
