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
  hooks,
  ops::inner::{InnerParent, InnerState, InnerSubscriber},
  subscriber::Subscriber,
  subscription::{add_demand, produced, validate_request, Subscription, SubscriptionSlot, Upstream, UNBOUNDED},
};

/// Mirrors the inner stream of the most recent outer value.
///
/// A new outer value cancels the active inner; values it buffered but did
/// not deliver yet are discarded. Errors of a replaced inner go to the error
/// hook.
#[derive(Clone)]
pub struct SwitchMap<S, F> {
  source: S,
  mapper: F,
  prefetch: usize,
  delay_errors: bool,
}

impl<S, F> SwitchMap<S, F> {
  pub fn new(source: S, mapper: F) -> Self {
    SwitchMap { source, mapper, prefetch: config::buffer_size(), delay_errors: false }
  }

  pub fn prefetch(mut self, prefetch: usize) -> Self {
    self.prefetch = prefetch.max(1);
    self
  }

  /// Keeps switching after an error and reports every error at the end.
  pub fn delay_errors(mut self, delay_errors: bool) -> Self {
    self.delay_errors = delay_errors;
    self
  }
}

impl<S, F> Flowable for SwitchMap<S, F>
where
  S: Flowable,
  F: RxFn<S::Item>,
  F::Output: Flowable,
{
  type Item = <F::Output as Flowable>::Item;

  fn subscribe_actual<O: Subscriber<Self::Item>>(self, downstream: O) {
    let state = Arc::new(SwitchState {
      downstream: DownstreamCell::default(),
      wip: WorkInProgress::default(),
      requested: AtomicU64::new(0),
      upstream: SubscriptionSlot::default(),
      current: Mutex::new(None),
      next_id: AtomicUsize::new(0),
      errors: ErrorCollector::default(),
      done: AtomicBool::new(false),
      prefetch: self.prefetch,
      delay_errors: self.delay_errors,
    });
    self.source.subscribe_actual(SwitchOuter { state, mapper: self.mapper, downstream: Some(downstream) })
  }
}

struct SwitchOuter<U, O, F> {
  state: Arc<SwitchState<U, O>>,
  mapper: F,
  downstream: Option<O>,
}

impl<T, U, O, F> Subscriber<T> for SwitchOuter<U, O, F>
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
      state.upstream.request(UNBOUNDED);
    }
  }

  fn on_next(&mut self, value: T) {
    let state = &self.state;
    if state.done.load(Ordering::Acquire) || state.downstream.is_cancelled() {
      return;
    }
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    if let Some(previous) = state.current.lock().take() {
      previous.cancel();
    }
    match self.mapper.call(value) {
      Ok(source) => {
        let inner = Arc::new(InnerState::new(id, state.prefetch));
        *state.current.lock() = Some(inner.clone());
        if state.downstream.is_cancelled() {
          state.cancel_current();
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

struct SwitchState<U, O> {
  downstream: DownstreamCell<O>,
  wip: WorkInProgress,
  requested: AtomicU64,
  upstream: SubscriptionSlot,
  current: Mutex<Option<Arc<InnerState<U>>>>,
  next_id: AtomicUsize,
  errors: ErrorCollector,
  done: AtomicBool,
  prefetch: usize,
  delay_errors: bool,
}

impl<U: Send + 'static, O: Subscriber<U>> SwitchState<U, O> {
  fn cancel_current(&self) {
    let current = self.current.lock().take();
    if let Some(inner) = current {
      inner.cancel();
    }
  }

  fn is_current(&self, inner: &InnerState<U>) -> bool {
    self.current.lock().as_ref().is_some_and(|c| c.id == inner.id)
  }

  fn outer_error(&self, err: Error) {
    if self.errors.add(err) {
      self.done.store(true, Ordering::Release);
      if !self.delay_errors {
        self.cancel_current();
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
          self.cancel_current();
          return ControlFlow::Break(());
        }
        if !self.delay_errors && self.errors.has_error() {
          self.upstream.cancel();
          self.cancel_current();
          if let (Some(err), Some(downstream)) = (self.errors.terminate(), slot.take()) {
            downstream.on_error(err);
          }
          return ControlFlow::Break(());
        }
        let done = self.done.load(Ordering::Acquire);
        let current = self.current.lock().clone();
        let Some(inner) = current else {
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
        let mut switched = false;
        while emitted != requested {
          if !self.is_current(&inner) {
            switched = true;
            break;
          }
          match inner.poll() {
            Ok(Some(value)) => {
              if let Some(downstream) = slot.as_mut() {
                downstream.on_next(value);
              }
              emitted += 1;
              if self.downstream.is_cancelled() {
                slot.take();
                self.cancel_current();
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
          let mut current = self.current.lock();
          if current.as_ref().is_some_and(|c| c.id == inner.id) {
            current.take();
          }
          continue;
        }
        if switched {
          continue;
        }
        if emitted == 0 {
          return ControlFlow::Continue(());
        }
      }
    });
  }
}

impl<U: Send + 'static, O: Subscriber<U>> InnerParent<U> for SwitchState<U, O> {
  fn inner_error(&self, inner: &Arc<InnerState<U>>, err: Error) {
    if !self.is_current(inner) {
      hooks::on_undeliverable(err);
      return;
    }
    if self.errors.add(err) && !self.delay_errors {
      self.upstream.cancel();
      self.cancel_current();
    }
    self.drain_loop();
  }

  fn drain(&self) { self.drain_loop() }
}

impl<U: Send + 'static, O: Subscriber<U>> Subscription for SwitchState<U, O> {
  fn request(&self, n: u64) {
    if validate_request(n) {
      add_demand(&self.requested, n);
      self.drain_loop();
    }
  }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.upstream.cancel();
      self.cancel_current();
      if self.wip.enter() {
        self.downstream.take();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::VecDeque, sync::Arc};

  use parking_lot::Mutex;

  use crate::{prelude::*, testing::capture_undeliverable};

  type Slot<T> = Arc<Mutex<Option<Emitter<T>>>>;

  fn manual<T: Send + 'static>() -> (Slot<T>, BoxFlowable<T>) {
    let slot: Slot<T> = Arc::new(Mutex::new(None));
    let s = slot.clone();
    let source = flowable::create(move |e| *s.lock() = Some(e), BackpressureStrategy::Buffer);
    (slot, source.boxed())
  }

  fn with<T>(slot: &Slot<T>, f: impl FnOnce(&mut Emitter<T>)) {
    if let Some(e) = slot.lock().as_mut() {
      f(e);
    }
  }

  fn switching(inners: Vec<BoxFlowable<i32>>) -> (Slot<i32>, impl Flowable<Item = i32>) {
    let (outer, source) = manual::<i32>();
    let inners = Arc::new(Mutex::new(VecDeque::from(inners)));
    let flow = source.switch_map(move |_| {
      let next = inners.lock().pop_front();
      next.unwrap_or_else(|| flowable::empty().boxed())
    });
    (outer, flow)
  }

  #[test]
  fn follows_only_the_latest_inner() {
    let (a, a_flow) = manual::<i32>();
    let (b, b_flow) = manual::<i32>();
    let (outer, flow) = switching(vec![a_flow, b_flow]);
    let ts = flow.test();

    with(&outer, |e| e.next(1));
    with(&a, |e| e.next(10));
    with(&outer, |e| e.next(2));
    with(&a, |e| e.next(11));
    with(&b, |e| e.next(20));
    with(&outer, |e| e.complete());
    ts.assert_values(&[10, 20]).assert_not_complete();
    with(&b, |e| e.complete());
    ts.assert_result(&[10, 20]);
    assert!(a.lock().as_ref().is_some_and(|e| e.is_cancelled()));
  }

  #[test]
  fn replaced_inner_errors_go_to_the_hook() {
    let (ts, routed) = capture_undeliverable(|| {
      let (a, a_flow) = manual::<i32>();
      let (outer, flow) = switching(vec![a_flow, flowable::just(5).boxed()]);
      let ts = flow.test();
      with(&outer, |e| e.next(1));
      let stale = a.lock().take();
      with(&outer, |e| e.next(2));
      with(&outer, |e| e.complete());
      if let Some(mut stale) = stale {
        stale.error(Error::msg("stale"));
      }
      ts
    });
    ts.assert_result(&[5]);
    assert_eq!(routed, vec![Error::msg("stale")]);
  }

  #[test]
  fn current_inner_error_fails_the_stream() {
    flowable::range(1, 3)
      .switch_map(|v| {
        if v == 2 {
          flowable::error(Error::msg("inner")).boxed()
        } else {
          flowable::just(v).boxed()
        }
      })
      .test()
      .assert_failure(&Error::msg("inner"), &[1]);
  }

  #[test]
  fn honours_demand_of_the_current_inner() {
    let ts = flowable::just(1).switch_map(|_| flowable::range(1, 5)).test_with(2);
    ts.assert_values(&[1, 2]).assert_not_complete();
    ts.request(3);
    ts.assert_result(&[1, 2, 3, 4, 5]);
  }
}
