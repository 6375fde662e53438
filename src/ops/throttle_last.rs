use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc,
};

use parking_lot::Mutex;

use crate::{
  disposable::Disposable,
  drain::Serializer,
  error::Error,
  flowable::Flowable,
  function::OnDropped,
  scheduler::{Duration, Scheduler, Worker},
  subscriber::Subscriber,
  subscription::{add_demand, produced, validate_request, Subscription, SubscriptionSlot, Upstream, UNBOUNDED},
};

/// Emits the most recent value at the end of every `period`, if one
/// arrived during it.
///
/// Values replaced before a tick go to [`on_dropped`](Self::on_dropped). A
/// tick that finds a value but no outstanding demand fails the stream with
/// [`Error::MissingBackpressure`].
pub struct ThrottleLast<S: Flowable, Sch> {
  source: S,
  period: Duration,
  scheduler: Sch,
  emit_last: bool,
  on_dropped: Option<OnDropped<S::Item>>,
}

impl<S: Flowable, Sch: Scheduler> ThrottleLast<S, Sch> {
  pub fn new(source: S, period: Duration, scheduler: Sch) -> Self {
    ThrottleLast { source, period, scheduler, emit_last: false, on_dropped: None }
  }

  /// Emits the value still pending when the upstream completes.
  pub fn emit_last(mut self, emit_last: bool) -> Self {
    self.emit_last = emit_last;
    self
  }

  /// Receives every value replaced by a newer one. An `Err` cancels the
  /// upstream and fails the stream.
  pub fn on_dropped<F>(mut self, on_dropped: F) -> Self
  where
    F: Fn(S::Item) -> Result<(), Error> + Send + Sync + 'static,
  {
    self.on_dropped = Some(Arc::new(on_dropped));
    self
  }
}

impl<S: Flowable, Sch: Scheduler> Flowable for ThrottleLast<S, Sch> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    let state = Arc::new(SampleState {
      serializer: Serializer::default(),
      latest: Mutex::new(None),
      requested: AtomicU64::new(0),
      upstream: SubscriptionSlot::default(),
      worker: self.scheduler.create_worker(),
      on_dropped: self.on_dropped,
      emit_last: self.emit_last,
    });
    self.source.subscribe_actual(SampleSubscriber {
      state,
      downstream: Some(downstream),
      period: self.period,
    })
  }
}

struct SampleState<T, O> {
  serializer: Serializer<T, O>,
  latest: Mutex<Option<T>>,
  requested: AtomicU64,
  upstream: SubscriptionSlot,
  worker: Arc<dyn Worker>,
  on_dropped: Option<OnDropped<T>>,
  emit_last: bool,
}

impl<T: Send + 'static, O: Subscriber<T>> SampleState<T, O> {
  fn fail(&self, err: Error) {
    self.upstream.cancel();
    self.worker.dispose();
    self.latest.lock().take();
    self.serializer.error(err);
  }

  fn emit(&self, value: T) {
    if self.requested.load(Ordering::Acquire) != 0 {
      self.serializer.next(value);
      produced(&self.requested, 1);
    } else {
      self.fail(Error::MissingBackpressure("throttle_last: could not emit value due to lack of requests"));
    }
  }

  fn tick(&self) {
    let latest = self.latest.lock().take();
    if let Some(value) = latest {
      self.emit(value);
    }
  }
}

impl<T: Send + 'static, O: Subscriber<T>> Subscription for SampleState<T, O> {
  fn request(&self, n: u64) {
    if validate_request(n) {
      add_demand(&self.requested, n);
    }
  }

  fn cancel(&self) {
    self.upstream.cancel();
    self.worker.dispose();
    self.latest.lock().take();
    self.serializer.cancel();
  }
}

struct SampleSubscriber<T, O> {
  state: Arc<SampleState<T, O>>,
  downstream: Option<O>,
  period: Duration,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for SampleSubscriber<T, O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let state = &self.state;
    let shared = upstream.into_shared();
    if !state.upstream.set_once(shared.clone()) {
      return;
    }
    let Some(mut downstream) = self.downstream.take() else { return };
    downstream.on_subscribe(Upstream::Plain(state.clone()));
    state.serializer.attach(downstream);
    if state.serializer.is_cancelled() {
      return;
    }
    let tick = state.clone();
    state.worker.schedule_periodic(Box::new(move || tick.tick()), self.period, self.period);
    shared.request(UNBOUNDED);
  }

  fn on_next(&mut self, value: T) {
    let state = &self.state;
    if state.serializer.is_done() || state.serializer.is_cancelled() {
      return;
    }
    let replaced = state.latest.lock().replace(value);
    if let (Some(old), Some(on_dropped)) = (replaced, &state.on_dropped) {
      if let Err(err) = on_dropped(old) {
        state.fail(err);
      }
    }
  }

  fn on_error(self, err: Error) {
    let state = &self.state;
    state.worker.dispose();
    state.upstream.release();
    state.latest.lock().take();
    state.serializer.error(err);
  }

  fn on_complete(self) {
    let state = &self.state;
    state.worker.dispose();
    state.upstream.release();
    if state.emit_last {
      let latest = state.latest.lock().take();
      if let Some(value) = latest {
        state.emit(value);
      }
    }
    state.serializer.complete();
  }
}
