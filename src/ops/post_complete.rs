//! Shared state for operators that append one value after the upstream
//! terminated and must wait for demand before emitting it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
  drain::DownstreamCell,
  error::Error,
  hooks,
  subscriber::Subscriber,
  subscription::{validate_request, Subscription, SubscriptionSlot, Upstream, UNBOUNDED},
};

struct Gate<T> {
  requested: u64,
  last: Option<T>,
}

pub(crate) struct PostComplete<T, O> {
  downstream: DownstreamCell<O>,
  upstream: SubscriptionSlot,
  gate: Mutex<Gate<T>>,
}

impl<T: Send + 'static, O: Subscriber<T>> PostComplete<T, O> {
  pub fn new() -> Arc<Self> {
    Arc::new(PostComplete {
      downstream: DownstreamCell::default(),
      upstream: SubscriptionSlot::default(),
      gate: Mutex::new(Gate { requested: 0, last: None }),
    })
  }

  /// Stores the upstream and hands this state to `downstream`.
  pub fn attach<U>(self: &Arc<Self>, upstream: Upstream<U>, downstream: &mut Option<O>)
  where
    U: Send + 'static,
  {
    if !self.upstream.set_once(upstream.into_shared()) {
      return;
    }
    let Some(mut downstream) = downstream.take() else { return };
    downstream.on_subscribe(Upstream::Plain(self.clone()));
    self.downstream.attach(downstream);
  }

  pub fn next(&self, value: T) {
    {
      let mut gate = self.gate.lock();
      if gate.requested != UNBOUNDED {
        gate.requested = gate.requested.saturating_sub(1);
      }
    }
    let mut slot = self.downstream.lock();
    if let Some(downstream) = slot.as_mut() {
      downstream.on_next(value);
    }
    if self.downstream.is_cancelled() {
      slot.take();
    }
  }

  /// Completes, emitting `last` first once there is demand for it.
  pub fn finish(&self, last: Option<T>) {
    self.upstream.release();
    let Some(last) = last else {
      if let Some(downstream) = self.downstream.take() {
        downstream.on_complete();
      }
      return;
    };
    let ready = {
      let mut gate = self.gate.lock();
      if gate.requested > 0 {
        Some(last)
      } else {
        gate.last = Some(last);
        None
      }
    };
    if let Some(last) = ready {
      self.emit_last(last);
    }
  }

  pub fn fail(&self, err: Error) {
    self.upstream.release();
    match self.downstream.take() {
      Some(downstream) => downstream.on_error(err),
      None => hooks::on_undeliverable(err),
    }
  }

  fn emit_last(&self, last: T) {
    if let Some(mut downstream) = self.downstream.take() {
      downstream.on_next(last);
      downstream.on_complete();
    }
  }
}

impl<T: Send + 'static, O: Subscriber<T>> Subscription for PostComplete<T, O> {
  fn request(&self, n: u64) {
    if !validate_request(n) {
      return;
    }
    let last = {
      let mut gate = self.gate.lock();
      let last = gate.last.take();
      if last.is_none() {
        gate.requested = gate.requested.saturating_add(n);
      }
      last
    };
    match last {
      Some(last) => self.emit_last(last),
      None => self.upstream.request(n),
    }
  }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.upstream.cancel();
      self.gate.lock().last.take();
    }
  }
}
