use std::{
  collections::VecDeque,
  marker::PhantomData,
  ops::ControlFlow,
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  disposable::{self, BoxDisposable, Disposable, SerialDisposable},
  drain::{DownstreamCell, WorkInProgress},
  error::Error,
  flowable::Flowable,
  hooks,
  subscriber::{BoxSubscriber, Subscriber},
  subscription::{add_demand, produced, validate_request, Subscription, Upstream, UNBOUNDED},
};

/// What [`create`] does with values the downstream has not asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureStrategy {
  /// Ignore demand; the downstream has to cope.
  Missing,
  /// Fail with [`Error::MissingBackpressure`].
  Error,
  /// Queue everything.
  Buffer,
  /// Discard the value.
  Drop,
  /// Keep only the most recent value.
  Latest,
}

/// Bridges callback-style producers into a [`Flowable`].
pub struct Create<T, F> {
  source: F,
  strategy: BackpressureStrategy,
  _item: PhantomData<fn() -> T>,
}

impl<T, F: Clone> Clone for Create<T, F> {
  fn clone(&self) -> Self { Create { source: self.source.clone(), strategy: self.strategy, _item: PhantomData } }
}

/// Calls `source` with an [`Emitter`] for every subscription.
///
/// ```rust
/// use rxflow::prelude::*;
///
/// let ts = flowable::create(
///   |mut emitter| {
///     emitter.next(1);
///     emitter.next(2);
///     emitter.complete();
///   },
///   BackpressureStrategy::Buffer,
/// )
/// .test_with(1);
/// ts.assert_values(&[1]);
/// ts.request(1);
/// ts.assert_result(&[1, 2]);
/// ```
pub fn create<T, F>(source: F, strategy: BackpressureStrategy) -> Create<T, F>
where
  T: Send + 'static,
  F: FnOnce(Emitter<T>) + Send + 'static,
{
  Create { source, strategy, _item: PhantomData }
}

impl<T, F> Flowable for Create<T, F>
where
  T: Send + 'static,
  F: FnOnce(Emitter<T>) + Send + 'static,
{
  type Item = T;

  fn subscribe_actual<S: Subscriber<T>>(self, mut subscriber: S) {
    let state = Arc::new(EmitterState {
      strategy: self.strategy,
      queue: Mutex::new(VecDeque::new()),
      requested: AtomicU64::new(0),
      wip: WorkInProgress::default(),
      downstream: DownstreamCell::default(),
      done: AtomicBool::new(false),
      error: Mutex::new(None),
      resource: SerialDisposable::default(),
    });
    subscriber.on_subscribe(Upstream::Plain(state.clone()));
    if state.downstream.attach(Box::new(subscriber)) {
      state.drain();
    }
    (self.source)(Emitter { state });
  }
}

/// Producer side of [`create`]. Signals after a terminal one or after
/// cancellation are dropped; a late error goes to the error hook.
pub struct Emitter<T> {
  state: Arc<EmitterState<T>>,
}

struct EmitterState<T> {
  strategy: BackpressureStrategy,
  queue: Mutex<VecDeque<T>>,
  requested: AtomicU64,
  wip: WorkInProgress,
  downstream: DownstreamCell<BoxSubscriber<T>>,
  done: AtomicBool,
  error: Mutex<Option<Error>>,
  resource: SerialDisposable,
}

impl<T: Send + 'static> Emitter<T> {
  pub fn next(&mut self, value: T) {
    let state = &self.state;
    if state.done.load(Ordering::Acquire) || state.downstream.is_cancelled() {
      return;
    }
    let requested = state.requested.load(Ordering::Acquire);
    let overflow = {
      let mut queue = state.queue.lock();
      let queued = queue.len() as u64;
      match state.strategy {
        BackpressureStrategy::Missing | BackpressureStrategy::Buffer => {
          queue.push_back(value);
          false
        }
        BackpressureStrategy::Drop if queued >= requested => return,
        BackpressureStrategy::Latest if queued > requested => {
          if let Some(last) = queue.back_mut() {
            *last = value;
          }
          false
        }
        BackpressureStrategy::Error if queued >= requested => true,
        _ => {
          queue.push_back(value);
          false
        }
      }
    };
    if overflow {
      self.error(Error::MissingBackpressure("create: could not emit value due to lack of requests"));
    } else {
      self.state.drain();
    }
  }

  /// Fails the stream, or routes `err` to the error hook if it already
  /// terminated or was cancelled.
  pub fn error(&mut self, err: Error) {
    if let Err(err) = self.state.terminate_with(err) {
      hooks::on_undeliverable(err);
    }
  }

  /// Like [`error`](Self::error) but returns `false` instead of routing an
  /// undeliverable error.
  pub fn try_error(&mut self, err: Error) -> bool { self.state.terminate_with(err).is_ok() }

  pub fn complete(&mut self) {
    if self.state.downstream.is_cancelled() || self.state.done.swap(true, Ordering::AcqRel) {
      return;
    }
    self.state.drain();
  }

  /// Demand not yet covered by queued values.
  pub fn requested(&self) -> u64 {
    let requested = self.state.requested.load(Ordering::Acquire);
    if requested == UNBOUNDED {
      return UNBOUNDED;
    }
    requested.saturating_sub(self.state.queue.lock().len() as u64)
  }

  pub fn is_cancelled(&self) -> bool { self.state.downstream.is_cancelled() }

  /// Disposed when the stream terminates or is cancelled. Replaces (and
  /// disposes) a previously set resource.
  pub fn set_disposable(&mut self, resource: BoxDisposable) { self.state.resource.set(resource); }

  pub fn set_cancellable(&mut self, on_cancel: impl FnOnce() + Send + 'static) {
    self.set_disposable(disposable::from_fn(on_cancel));
  }
}

impl<T: Send + 'static> EmitterState<T> {
  fn terminate_with(&self, err: Error) -> Result<(), Error> {
    if self.downstream.is_cancelled() || self.done.swap(true, Ordering::AcqRel) {
      return Err(err);
    }
    *self.error.lock() = Some(err);
    self.drain();
    Ok(())
  }

  fn drain(&self) {
    self.wip.drain(|| {
      let mut slot = self.downstream.lock();
      if slot.is_none() {
        return ControlFlow::Continue(());
      }
      let bounded = self.strategy != BackpressureStrategy::Missing;
      let requested = self.requested.load(Ordering::Acquire);
      let mut emitted = 0;
      loop {
        if self.downstream.is_cancelled() {
          slot.take();
          self.queue.lock().clear();
          return ControlFlow::Break(());
        }
        let done = self.done.load(Ordering::Acquire);
        let next = if bounded && emitted == requested { None } else { self.queue.lock().pop_front() };
        let Some(value) = next else {
          if done && self.queue.lock().is_empty() {
            self.resource.dispose();
            let err = self.error.lock().take();
            if let Some(downstream) = slot.take() {
              match err {
                Some(err) => downstream.on_error(err),
                None => downstream.on_complete(),
              }
            }
            return ControlFlow::Break(());
          }
          break;
        };
        if let Some(downstream) = slot.as_mut() {
          downstream.on_next(value);
        }
        emitted += 1;
      }
      if bounded && emitted > 0 {
        produced(&self.requested, emitted);
      }
      ControlFlow::Continue(())
    });
  }
}

impl<T: Send + 'static> Subscription for EmitterState<T> {
  fn request(&self, n: u64) {
    if !validate_request(n) {
      return;
    }
    add_demand(&self.requested, n);
    self.drain();
  }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.resource.dispose();
      if self.wip.enter() {
        self.downstream.take();
        self.queue.lock().clear();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;

  use super::*;
  use crate::{prelude::*, testing::capture_undeliverable};

  fn emit_three(strategy: BackpressureStrategy) -> TestSubscriber<i32> {
    flowable::create(
      |mut e| {
        for v in 1..=3 {
          e.next(v);
        }
        e.complete();
      },
      strategy,
    )
    .test_with(1)
  }

  #[test]
  fn buffer_keeps_everything() {
    let ts = emit_three(BackpressureStrategy::Buffer);
    ts.assert_values(&[1]).assert_not_complete();
    ts.request(5);
    ts.assert_result(&[1, 2, 3]);
  }

  #[test]
  fn drop_and_latest_discard_unrequested_values() {
    emit_three(BackpressureStrategy::Drop).assert_result(&[1]);
    let latest = emit_three(BackpressureStrategy::Latest);
    latest.assert_values(&[1]).assert_not_complete();
    latest.request(1);
    latest.assert_result(&[1, 3]);
  }

  #[test]
  fn error_strategy_fails_without_demand() {
    emit_three(BackpressureStrategy::Error).assert_error_matches(|e| {
      matches!(e, Error::MissingBackpressure(_))
    });
  }

  #[test]
  fn missing_strategy_ignores_demand() {
    emit_three(BackpressureStrategy::Missing).assert_result(&[1, 2, 3]);
  }

  #[test]
  fn resource_released_once_on_cancel() {
    let released = Arc::new(AtomicUsize::new(0));
    let r = released.clone();
    let ts = flowable::create(
      move |mut e: Emitter<i32>| {
        e.set_cancellable(move || {
          r.fetch_add(1, Ordering::SeqCst);
        });
      },
      BackpressureStrategy::Buffer,
    )
    .test();
    ts.cancel();
    ts.cancel();
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn error_after_complete_is_undeliverable() {
    let (ts, routed) = capture_undeliverable(|| {
      flowable::create(
        |mut e: Emitter<i32>| {
          e.complete();
          e.error(Error::msg("late"));
          assert!(!e.try_error(Error::msg("quiet")));
        },
        BackpressureStrategy::Buffer,
      )
      .test()
    });
    ts.assert_result(&[]);
    assert_eq!(routed, vec![Error::msg("late")]);
  }
}
