use std::sync::Arc;

use super::post_complete::PostComplete;
use crate::{
  error::Error,
  flowable::Flowable,
  hooks,
  notification::Notification,
  subscriber::Subscriber,
  subscription::{Subscription, Upstream},
};

// ==================== Materialize ====================

/// Turns every signal into a [`Notification`]. The terminal notification is
/// held back until the downstream has demand for it.
#[derive(Clone)]
pub struct Materialize<S> {
  source: S,
}

impl<S> Materialize<S> {
  pub fn new(source: S) -> Self { Materialize { source } }
}

impl<S: Flowable> Flowable for Materialize<S> {
  type Item = Notification<S::Item>;

  fn subscribe_actual<O: Subscriber<Notification<S::Item>>>(self, downstream: O) {
    self.source.subscribe_actual(MaterializeSubscriber {
      state: PostComplete::new(),
      downstream: Some(downstream),
    })
  }
}

struct MaterializeSubscriber<T, O> {
  state: Arc<PostComplete<Notification<T>, O>>,
  downstream: Option<O>,
}

impl<T: Send + 'static, O: Subscriber<Notification<T>>> Subscriber<T> for MaterializeSubscriber<T, O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) { self.state.attach(upstream, &mut self.downstream) }

  fn on_next(&mut self, value: T) { self.state.next(Notification::Next(value)) }

  fn on_error(self, err: Error) { self.state.finish(Some(Notification::Error(err))) }

  fn on_complete(self) { self.state.finish(Some(Notification::Complete)) }
}

// ==================== Dematerialize ====================

/// Replays notifications selected from each value as signals. A terminal
/// notification cancels the upstream.
#[derive(Clone)]
pub struct Dematerialize<S, F> {
  source: S,
  selector: F,
}

impl<S, F> Dematerialize<S, F> {
  pub fn new(source: S, selector: F) -> Self { Dematerialize { source, selector } }
}

impl<S, R, F> Flowable for Dematerialize<S, F>
where
  S: Flowable,
  R: Send + 'static,
  F: Fn(S::Item) -> Notification<R> + Send + Sync + 'static,
{
  type Item = R;

  fn subscribe_actual<O: Subscriber<R>>(self, downstream: O) {
    self.source.subscribe_actual(DematerializeSubscriber {
      downstream: Some(downstream),
      selector: self.selector,
      upstream: None,
    })
  }
}

struct DematerializeSubscriber<O, F> {
  downstream: Option<O>,
  selector: F,
  upstream: Option<Arc<dyn Subscription>>,
}

impl<T, R, O, F> Subscriber<T> for DematerializeSubscriber<O, F>
where
  T: Send + 'static,
  R: Send + 'static,
  O: Subscriber<R>,
  F: Fn(T) -> Notification<R> + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let shared = upstream.into_shared();
    self.upstream = Some(shared.clone());
    if let Some(downstream) = self.downstream.as_mut() {
      downstream.on_subscribe(Upstream::Plain(shared));
    }
  }

  fn on_next(&mut self, value: T) {
    if self.downstream.is_none() {
      return;
    }
    match (self.selector)(value) {
      Notification::Next(v) => {
        if let Some(downstream) = self.downstream.as_mut() {
          downstream.on_next(v);
        }
      }
      terminal => {
        if let Some(upstream) = self.upstream.take() {
          upstream.cancel();
        }
        if let Some(downstream) = self.downstream.take() {
          match terminal {
            Notification::Error(err) => downstream.on_error(err),
            _ => downstream.on_complete(),
          }
        }
      }
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
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use crate::prelude::*;

  #[test]
  fn wraps_every_signal() {
    flowable::range(1, 2).materialize().test().assert_result(&[
      Notification::Next(1),
      Notification::Next(2),
      Notification::Complete,
    ]);
    flowable::error::<i32>(Error::msg("x"))
      .materialize()
      .test()
      .assert_result(&[Notification::Error(Error::msg("x"))]);
  }

  #[test]
  fn terminal_notification_waits_for_demand() {
    let ts = flowable::range(1, 2).materialize().test_with(2);
    ts.assert_values(&[Notification::Next(1), Notification::Next(2)]).assert_not_complete();
    ts.request(1);
    ts.assert_result(&[Notification::Next(1), Notification::Next(2), Notification::Complete]);
  }

  #[test]
  fn dematerialize_restores_the_stream() {
    flowable::range(1, 3).materialize().dematerialize(|n| n).test().assert_result(&[1, 2, 3]);
    flowable::just(1)
      .concat_with(flowable::error(Error::msg("x")))
      .materialize()
      .dematerialize(|n| n)
      .test()
      .assert_failure(&Error::msg("x"), &[1]);
  }

  #[test]
  fn terminal_notification_cancels_the_upstream() {
    let cancels = Arc::new(AtomicUsize::new(0));
    let c = cancels.clone();
    flowable::from_iter(vec![Notification::Next(1), Notification::Complete, Notification::Next(2)])
      .do_on_cancel(move || {
        c.fetch_add(1, Ordering::SeqCst);
      })
      .dematerialize(|n| n)
      .test()
      .assert_result(&[1]);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
  }
}
