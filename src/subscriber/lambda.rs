use std::sync::Arc;

use crate::{
  disposable::Disposable,
  error::Error,
  hooks,
  subscriber::Subscriber,
  subscription::{Subscription, SubscriptionSlot, Upstream, UNBOUNDED},
};

/// Subscriber built from closures, returned by
/// [`Flowable::subscribe_all`](crate::flowable::Flowable::subscribe_all).
///
/// It requests everything and exposes a [`LambdaHandle`] that cancels the
/// upstream. Errors with nowhere to go end up in the error hook.
pub struct LambdaSubscriber<N, E, C> {
  on_next: N,
  on_error: E,
  on_complete: C,
  handle: Arc<LambdaHandle>,
}

/// Disposable side of a [`LambdaSubscriber`]; reports disposed once the
/// stream terminated.
#[derive(Default)]
pub struct LambdaHandle {
  upstream: SubscriptionSlot,
}

impl LambdaHandle {
  pub(crate) fn slot(&self) -> &SubscriptionSlot { &self.upstream }
}

impl Disposable for LambdaHandle {
  fn dispose(&self) { self.upstream.cancel(); }

  fn is_disposed(&self) -> bool { self.upstream.is_cancelled() }
}

impl<N, E, C> LambdaSubscriber<N, E, C> {
  pub fn new(on_next: N, on_error: E, on_complete: C) -> Self {
    LambdaSubscriber { on_next, on_error, on_complete, handle: Arc::default() }
  }

  pub fn handle(&self) -> Arc<LambdaHandle> { self.handle.clone() }
}

impl<T, N, E, C> Subscriber<T> for LambdaSubscriber<N, E, C>
where
  T: Send + 'static,
  N: FnMut(T) + Send + 'static,
  E: FnOnce(Error) + Send + 'static,
  C: FnOnce() + Send + 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    if self.handle.upstream.set_once(upstream.clone().into_shared()) {
      upstream.request(UNBOUNDED);
    }
  }

  fn on_next(&mut self, value: T) {
    if !self.handle.upstream.is_cancelled() {
      (self.on_next)(value);
    }
  }

  fn on_error(self, err: Error) {
    if self.handle.upstream.is_cancelled() {
      hooks::on_undeliverable(err);
      return;
    }
    self.handle.upstream.release();
    (self.on_error)(err);
  }

  fn on_complete(self) {
    if !self.handle.upstream.is_cancelled() {
      self.handle.upstream.release();
      (self.on_complete)();
    }
  }
}

/// Error callback used by `subscribe`: errors nobody handles are routed to
/// the hook.
pub(crate) fn unhandled(err: Error) { hooks::on_undeliverable(err) }

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{flowable, prelude::*, testing::capture_undeliverable};
  use parking_lot::Mutex;

  #[test]
  fn dispose_stops_delivery() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (handle, emitter) = {
      let seen = seen.clone();
      let (tx, rx) = std::sync::mpsc::channel();
      let handle = flowable::create(
        move |emitter| tx.send(emitter).unwrap(),
        BackpressureStrategy::Buffer,
      )
      .subscribe(move |v: i32| seen.lock().push(v));
      (handle, rx.recv().unwrap())
    };
    let mut emitter = emitter;
    emitter.next(1);
    handle.dispose();
    handle.dispose();
    emitter.next(2);
    assert!(handle.is_disposed());
    assert!(emitter.is_cancelled());
    assert_eq!(*seen.lock(), vec![1]);
  }

  #[test]
  fn unhandled_error_reaches_the_hook() {
    let (_, routed) = capture_undeliverable(|| {
      flowable::error::<i32>(Error::msg("boom")).subscribe(|_| {});
    });
    assert_eq!(routed, vec![Error::msg("boom")]);
  }

  #[test]
  fn handle_reports_disposed_after_completion() {
    let done = Arc::new(Mutex::new(false));
    let d = done.clone();
    let handle = flowable::range(1, 3).subscribe_all(|_| {}, |_| {}, move || *d.lock() = true);
    assert!(*done.lock());
    assert!(handle.is_disposed());
  }
}
