//! The consumer side of the signal protocol.
//!
//! A subscriber receives exactly one `on_subscribe`, then any number of
//! `on_next` (never more than it requested), then at most one of
//! `on_error` / `on_complete`. The terminal methods take `self`, so nothing
//! can follow them.

use crate::{error::Error, subscription::Upstream};

pub(crate) mod lambda;

pub use lambda::{LambdaHandle, LambdaSubscriber};

pub trait Subscriber<T>: Send + 'static {
  /// Hands over the subscription. Fusion, if wanted, must be requested from
  /// inside this call.
  fn on_subscribe(&mut self, upstream: Upstream<T>);

  fn on_next(&mut self, value: T);

  fn on_error(self, err: Error);

  fn on_complete(self);

  /// ASYNC fusion only: values can be polled from the upstream queue.
  fn on_available(&mut self) {}
}

/// Object-safe mirror of [`Subscriber`] so subscribers can be boxed.
pub trait DynSubscriber<T>: Send {
  fn box_on_subscribe(&mut self, upstream: Upstream<T>);

  fn box_on_next(&mut self, value: T);

  fn box_on_error(self: Box<Self>, err: Error);

  fn box_on_complete(self: Box<Self>);

  fn box_on_available(&mut self);
}

impl<T, S: Subscriber<T>> DynSubscriber<T> for S {
  fn box_on_subscribe(&mut self, upstream: Upstream<T>) { self.on_subscribe(upstream) }

  fn box_on_next(&mut self, value: T) { self.on_next(value) }

  fn box_on_error(self: Box<Self>, err: Error) { (*self).on_error(err) }

  fn box_on_complete(self: Box<Self>) { (*self).on_complete() }

  fn box_on_available(&mut self) { self.on_available() }
}

pub type BoxSubscriber<T> = Box<dyn DynSubscriber<T>>;

impl<T: 'static> Subscriber<T> for BoxSubscriber<T> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) { (**self).box_on_subscribe(upstream) }

  fn on_next(&mut self, value: T) { (**self).box_on_next(value) }

  fn on_error(self, err: Error) { self.box_on_error(err) }

  fn on_complete(self) { self.box_on_complete() }

  fn on_available(&mut self) { (**self).box_on_available() }
}
