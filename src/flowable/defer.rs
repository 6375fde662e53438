use crate::{flowable::Flowable, subscriber::Subscriber};

/// Calls `factory` for every subscription and subscribes to its result.
#[derive(Clone)]
pub struct Defer<F> {
  factory: F,
}

pub fn defer<F, P>(factory: F) -> Defer<F>
where
  F: FnOnce() -> P + Send + 'static,
  P: Flowable,
{
  Defer { factory }
}

impl<F, P> Flowable for Defer<F>
where
  F: FnOnce() -> P + Send + 'static,
  P: Flowable,
{
  type Item = P::Item;

  fn subscribe_actual<S: Subscriber<P::Item>>(self, subscriber: S) {
    (self.factory)().subscribe_actual(subscriber)
  }
}
