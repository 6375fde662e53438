use std::{
  collections::VecDeque,
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
  subscription::{add_demand, produced, validate_request, Subscription, SubscriptionSlot, Upstream, UNBOUNDED},
};

/// Subscribes up to `max_concurrency` inner streams at once, buffers their
/// values, and emits them strictly in the order the inners were created.
#[derive(Clone)]
pub struct ConcatMapEager<S, F> {
  source: S,
  mapper: F,
  max_concurrency: usize,
  prefetch: usize,
  delay_errors: bool,
}

impl<S, F> ConcatMapEager<S, F> {
  pub fn new(source: S, mapper: F) -> Self {
    let size = config::buffer_size();
    ConcatMapEager { source, mapper, max_concurrency: size, prefetch: size, delay_errors: false }
  }

  pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
    self.max_concurrency = max_concurrency.max(1);
    self
  }

  pub fn prefetch(mut self, prefetch: usize) -> Self {
    self.prefetch = prefetch.max(1);
    self
  }

  /// Reports errors only after every source terminated.
  pub fn delay_errors(mut self, delay_errors: bool) -> Self {
    self.delay_errors = delay_errors;
    self
  }
}

impl<S, F> Flowable for ConcatMapEager<S, F>
where
  S: Flowable,
  F: RxFn<S::Item>,
  F::Output: Flowable,
{
  type Item = <F::Output as Flowable>::Item;

  fn subscribe_actual<O: Subscriber<Self::Item>>(self, downstream: O) {
    let state = Arc::new(EagerState {
      downstream: DownstreamCell::default(),
      wip: WorkInProgress::default(),
      requested: AtomicU64::new(0),
      upstream: SubscriptionSlot::default(),
      inners: Mutex::new(VecDeque::new()),
      next_id: AtomicUsize::new(0),
      errors: ErrorCollector::default(),
      done: AtomicBool::new(false),
      max_concurrency: self.max_concurrency,
      prefetch: self.prefetch,
      delay_errors: self.delay_errors,
    });
    self.source.subscribe_actual(EagerOuter { state, mapper: self.mapper, downstream: Some(downstream) })
  }
}

struct EagerOuter<U, O, F> {
  state: Arc<EagerState<U, O>>,
  mapper: F,
  downstream: Option<O>,
}

impl<T, U, O, F> Subscriber<T> for EagerOuter<U, O, F>
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
    if state.downstream.attach(downstream) {
      let initial = if state.max_concurrency == usize::MAX {
        UNBOUNDED
      } else {
        state.max_concurrency as u64
      };
      state.upstream.request(initial);
    }
  }

  fn on_next(&mut self, value: T) {
    let state = &self.state;
    if state.done.load(Ordering::Acquire) || state.downstream.is_cancelled() {
      return;
    }
    match self.mapper.call(value) {
      Ok(source) => {
        let id = state.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(InnerState::new(id, state.prefetch));
        state.inners.lock().push_back(inner.clone());
        if state.downstream.is_cancelled() {
          state.cancel_inners();
          return;
        }
        source.subscribe_actual(InnerSubscriber::new(inner, state.clone()));
      }
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

struct EagerState<U, O> {
  downstream: DownstreamCell<O>,
  wip: WorkInProgress,
  requested: AtomicU64,
  upstream: SubscriptionSlot,
  inners: Mutex<VecDeque<Arc<InnerState<U>>>>,
  next_id: AtomicUsize,
  errors: ErrorCollector,
  done: AtomicBool,
  max_concurrency: usize,
  prefetch: usize,
  delay_errors: bool,
}

impl<U: Send + 'static, O: Subscriber<U>> EagerState<U, O> {
  fn cancel_inners(&self) {
    let inners = std::mem::take(&mut *self.inners.lock());
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
        let done = self.done.load(Ordering::Acquire);
        let head = self.inners.lock().front().cloned();
        let Some(inner) = head else {
          if done {
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
          return ControlFlow::Continue(());
        };

        let requested = self.requested.load(Ordering::Acquire);
        let mut emitted = 0;
        while emitted != requested {
          match inner.poll() {
            Ok(Some(value)) => {
              if let Some(downstream) = slot.as_mut() {
                downstream.on_next(value);
              }
              emitted += 1;
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
              break;
            }
          }
        }
        if emitted > 0 {
          inner.consumed(emitted as usize);
          produced(&self.requested, emitted);
        }
        if inner.is_finished() {
          self.inners.lock().pop_front();
          if !done && self.max_concurrency != usize::MAX {
            self.upstream.request(1);
          }
          continue;
        }
        if emitted == 0 {
          return ControlFlow::Continue(());
        }
      }
    });
  }
}

impl<U: Send + 'static, O: Subscriber<U>> InnerParent<U> for EagerState<U, O> {
  fn inner_error(&self, _inner: &Arc<InnerState<U>>, err: Error) {
    if self.errors.add(err) && !self.delay_errors {
      self.upstream.cancel();
      self.cancel_inners();
    }
    self.drain_loop();
  }

  fn drain(&self) { self.drain_loop() }
}

impl<U: Send + 'static, O: Subscriber<U>> Subscription for EagerState<U, O> {
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

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::prelude::*;

  #[test]
  fn emits_in_order_while_buffering_later_sources() {
    let scheduler = TestScheduler::new();
    let slow = flowable::just(1).delay(Duration::from_millis(20), scheduler.clone());
    let fast = flowable::just(2).delay(Duration::from_millis(10), scheduler.clone());
    let ts = flowable::concat_eager([slow.boxed(), fast.boxed()]).test();
    scheduler.advance_time_by(Duration::from_millis(10));
    ts.assert_empty();
    scheduler.advance_time_by(Duration::from_millis(10));
    ts.assert_result(&[1, 2]);
  }

  #[test]
  fn subscribes_every_source_up_front() {
    let subscribed = Arc::new(Mutex::new(Vec::new()));
    let log = subscribed.clone();
    let ts = flowable::range(1, 3)
      .concat_map_eager(move |v| {
        let log = log.clone();
        flowable::defer(move || {
          log.lock().push(v);
          flowable::never::<i32>()
        })
      })
      .test();
    ts.assert_empty();
    assert_eq!(*subscribed.lock(), vec![1, 2, 3]);
  }

  #[test]
  fn respects_max_concurrency_and_demand() {
    let ts = flowable::range(1, 3)
      .concat_map_eager(|v| flowable::range(v * 10, 2))
      .max_concurrency(1)
      .test_with(3);
    ts.assert_values(&[10, 11, 20]).assert_not_complete();
    ts.request(5);
    ts.assert_result(&[10, 11, 20, 21, 30, 31]);
  }

  #[test]
  fn delayed_errors_keep_buffered_values() {
    let sources = [
      flowable::just(1).boxed(),
      flowable::error(Error::msg("x")).boxed(),
      flowable::just(3).boxed(),
    ];
    flowable::concat_eager(sources)
      .delay_errors(true)
      .test()
      .assert_failure(&Error::msg("x"), &[1, 3]);
    flowable::concat_eager([flowable::just(1).boxed(), flowable::error(Error::msg("x")).boxed()])
      .test()
      .assert_failure(&Error::msg("x"), &[1]);
  }
}
