use crate::{error::Error, flowable::Flowable, subscriber::Subscriber, subscription::Upstream};

/// Hides the upstream's identity: the downstream only ever sees a plain
/// subscription, so no fusion happens across this point.
#[derive(Clone)]
pub struct Hide<S> {
  source: S,
}

impl<S> Hide<S> {
  pub fn new(source: S) -> Self { Hide { source } }
}

impl<S: Flowable> Flowable for Hide<S> {
  type Item = S::Item;

  fn subscribe_actual<O: Subscriber<S::Item>>(self, downstream: O) {
    self.source.subscribe_actual(HideSubscriber { downstream })
  }
}

struct HideSubscriber<O> {
  downstream: O,
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for HideSubscriber<O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    self.downstream.on_subscribe(Upstream::Plain(upstream.into_shared()))
  }

  fn on_next(&mut self, value: T) { self.downstream.on_next(value) }

  fn on_error(self, err: Error) { self.downstream.on_error(err) }

  fn on_complete(self) { self.downstream.on_complete() }
}

#[cfg(test)]
mod tests {
  use crate::prelude::*;

  #[test]
  fn hidden_source_refuses_fusion() {
    let ts = TestSubscriber::with_fusion(FusionMode::ANY);
    flowable::range(1, 3).hide().subscribe_with(ts.clone());
    ts.assert_fusion_mode(FusionMode::NONE).assert_result(&[1, 2, 3]);
  }
}
