use super::{Maybe, MaybeObserver};
use crate::{disposable::BoxDisposable, error::Error, function::RxFn};

// ==================== Map ====================

#[derive(Clone)]
pub struct Map<S, F> {
  source: S,
  func: F,
}

impl<S, F> Map<S, F> {
  pub fn new(source: S, func: F) -> Self { Map { source, func } }
}

impl<S, B, F> Maybe for Map<S, F>
where
  S: Maybe,
  B: Send + 'static,
  F: RxFn<S::Item, Output = B>,
{
  type Item = B;

  fn subscribe_actual<O: MaybeObserver<B>>(self, observer: O) {
    self.source.subscribe_actual(MapObserver { observer, func: self.func })
  }
}

struct MapObserver<O, F> {
  observer: O,
  func: F,
}

impl<T, B, O, F> MaybeObserver<T> for MapObserver<O, F>
where
  T: Send + 'static,
  O: MaybeObserver<B>,
  F: RxFn<T, Output = B>,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) { self.observer.on_subscribe(disposable) }

  fn on_success(self, value: T) {
    match self.func.call(value) {
      Ok(mapped) => self.observer.on_success(mapped),
      Err(err) => self.observer.on_error(err),
    }
  }

  fn on_complete(self) { self.observer.on_complete() }

  fn on_error(self, err: Error) { self.observer.on_error(err) }
}

// ==================== Filter ====================

#[derive(Clone)]
pub struct Filter<S, F> {
  source: S,
  predicate: F,
}

impl<S, F> Filter<S, F> {
  pub fn new(source: S, predicate: F) -> Self { Filter { source, predicate } }
}

impl<S, F> Maybe for Filter<S, F>
where
  S: Maybe,
  F: Fn(&S::Item) -> bool + Send + Sync + 'static,
{
  type Item = S::Item;

  fn subscribe_actual<O: MaybeObserver<S::Item>>(self, observer: O) {
    self.source.subscribe_actual(FilterObserver { observer, predicate: self.predicate })
  }
}

struct FilterObserver<O, F> {
  observer: O,
  predicate: F,
}

impl<T, O, F> MaybeObserver<T> for FilterObserver<O, F>
where
  T: Send + 'static,
  O: MaybeObserver<T>,
  F: Fn(&T) -> bool + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, disposable: BoxDisposable) { self.observer.on_subscribe(disposable) }

  fn on_success(self, value: T) {
    if (self.predicate)(&value) {
      self.observer.on_success(value)
    } else {
      self.observer.on_complete()
    }
  }

  fn on_complete(self) { self.observer.on_complete() }

  fn on_error(self, err: Error) { self.observer.on_error(err) }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn map_transforms_the_value() {
    maybe::just(2).map(|v| v * 21).test().assert_value(42);
    maybe::empty::<i32>().map(|v| v * 21).test().assert_complete();
  }

  #[test]
  fn try_map_failure_becomes_the_outcome() {
    maybe::just(2)
      .try_map(|_| Err::<i32, _>(Error::msg("nope")))
      .test()
      .assert_error(&Error::msg("nope"));
  }

  #[test]
  fn filter_rejection_completes_empty() {
    maybe::just(3).filter(|v| v % 2 == 0).test().assert_complete();
    maybe::just(4).filter(|v| v % 2 == 0).test().assert_value(4);
  }
}
