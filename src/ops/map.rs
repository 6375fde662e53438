use std::sync::Arc;

use crate::{
  error::Error,
  flowable::Flowable,
  function::RxFn,
  hooks,
  subscriber::Subscriber,
  subscription::{FusedQueue, FusionMode, QueueSubscription, Subscription, Upstream},
};

/// Transforms every value with a (possibly fallible) function.
///
/// Fuses transitively: a fused consumer polls the upstream queue through
/// the mapper. Fusion across an asynchronous boundary is refused so the
/// mapper never runs on the consumer's thread.
#[derive(Clone)]
pub struct Map<S, F> {
  pub source: S,
  pub func: F,
}

impl<S, F> Map<S, F> {
  pub fn new(source: S, func: F) -> Self { Map { source, func } }
}

impl<S, F> Flowable for Map<S, F>
where
  S: Flowable,
  F: RxFn<S::Item>,
  F::Output: Send + 'static,
{
  type Item = F::Output;

  fn subscribe_actual<O: Subscriber<F::Output>>(self, downstream: O) {
    self.source.subscribe_actual(MapSubscriber {
      downstream: Some(downstream),
      func: Arc::new(self.func),
      upstream: None,
    })
  }
}

pub struct MapSubscriber<O, F> {
  downstream: Option<O>,
  func: Arc<F>,
  upstream: Option<Arc<dyn Subscription>>,
}

impl<O, F> MapSubscriber<O, F> {
  fn fail<T>(&mut self, err: Error)
  where
    O: Subscriber<T>,
  {
    if let Some(upstream) = self.upstream.take() {
      upstream.cancel();
    }
    if let Some(downstream) = self.downstream.take() {
      downstream.on_error(err);
    }
  }
}

impl<T, O, F> Subscriber<T> for MapSubscriber<O, F>
where
  T: Send + 'static,
  F: RxFn<T>,
  F::Output: Send + 'static,
  O: Subscriber<F::Output>,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let Some(downstream) = self.downstream.as_mut() else {
      upstream.cancel();
      return;
    };
    self.upstream = Some(upstream.clone().into_shared());
    let handed = match upstream {
      Upstream::Fuseable(queue) => {
        Upstream::Fuseable(Arc::new(MapQueue { upstream: queue, func: self.func.clone() }))
      }
      Upstream::Plain(plain) => Upstream::Plain(plain),
    };
    downstream.on_subscribe(handed);
  }

  fn on_next(&mut self, value: T) {
    if self.downstream.is_none() {
      return;
    }
    match self.func.call(value) {
      Ok(mapped) => {
        if let Some(downstream) = self.downstream.as_mut() {
          downstream.on_next(mapped);
        }
      }
      Err(err) => self.fail(err),
    }
  }

  fn on_error(self, err: Error) {
    match self.downstream {
      Some(downstream) => downstream.on_error(err),
      None => hooks::on_undeliverable(err),
    }
  }

  fn on_complete(self) {
    if let Some(downstream) = self.downstream {
      downstream.on_complete();
    }
  }

  fn on_available(&mut self) {
    if let Some(downstream) = self.downstream.as_mut() {
      downstream.on_available();
    }
  }
}

struct MapQueue<T, F> {
  upstream: Arc<dyn QueueSubscription<T>>,
  func: Arc<F>,
}

impl<T, F> Subscription for MapQueue<T, F>
where
  T: Send + 'static,
  F: RxFn<T>,
  F::Output: Send + 'static,
{
  fn request(&self, n: u64) { self.upstream.request(n) }

  fn cancel(&self) { self.upstream.cancel() }
}

impl<T, F> FusedQueue<F::Output> for MapQueue<T, F>
where
  T: Send + 'static,
  F: RxFn<T>,
  F::Output: Send + 'static,
{
  fn poll(&self) -> Result<Option<F::Output>, Error> {
    match self.upstream.poll()? {
      Some(value) => self.func.call(value).map(Some),
      None => Ok(None),
    }
  }

  fn is_empty(&self) -> bool { self.upstream.is_empty() }

  fn clear(&self) { self.upstream.clear() }

  fn size(&self) -> usize { self.upstream.size() }
}

impl<T, F> QueueSubscription<F::Output> for MapQueue<T, F>
where
  T: Send + 'static,
  F: RxFn<T>,
  F::Output: Send + 'static,
{
  fn request_fusion(&self, mode: FusionMode) -> FusionMode {
    if mode.is_boundary() {
      return FusionMode::NONE;
    }
    self.upstream.request_fusion(mode)
  }
}
