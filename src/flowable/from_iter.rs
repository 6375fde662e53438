use std::{
  iter::Peekable,
  ops::ControlFlow,
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  drain::{DownstreamCell, WorkInProgress},
  error::Error,
  flowable::Flowable,
  subscriber::Subscriber,
  subscription::{
    add_demand, produced, validate_request, FusedQueue, FusionMode, QueueSubscription, Subscription,
    Upstream,
  },
};

/// Emits the values of an iterator, honouring demand.
///
/// Accepts SYNC fusion: a fused consumer pulls straight from the iterator.
/// The stream completes as soon as the iterator is known to be exhausted,
/// even without outstanding demand.
#[derive(Clone)]
pub struct FromIter<I> {
  iter: I,
}

pub type Just<T> = FromIter<std::option::IntoIter<T>>;

pub type Empty<T> = FromIter<std::option::IntoIter<T>>;

pub type Range = FromIter<std::ops::Range<i32>>;

pub fn from_iter<I>(iter: I) -> FromIter<I::IntoIter>
where
  I: IntoIterator,
  I::IntoIter: Send + 'static,
{
  FromIter { iter: iter.into_iter() }
}

pub fn just<T: Send + 'static>(value: T) -> Just<T> { from_iter(Some(value)) }

pub fn empty<T: Send + 'static>() -> Empty<T> { from_iter(None) }

/// `count` consecutive integers starting at `start`. The end saturates at
/// `i32::MAX`.
pub fn range(start: i32, count: u32) -> Range {
  let end = start.saturating_add(i32::try_from(count).unwrap_or(i32::MAX));
  from_iter(start..end)
}

impl<I> Flowable for FromIter<I>
where
  I: Iterator + Send + 'static,
  I::Item: Send + 'static,
{
  type Item = I::Item;

  fn subscribe_actual<S: Subscriber<I::Item>>(self, mut subscriber: S) {
    let mut iter = self.iter.peekable();
    if iter.peek().is_none() {
      subscriber.on_subscribe(Upstream::empty());
      subscriber.on_complete();
      return;
    }
    let subscription = Arc::new(IterSubscription {
      iter: Mutex::new(Some(iter)),
      requested: AtomicU64::new(0),
      wip: WorkInProgress::default(),
      downstream: DownstreamCell::default(),
      fused: AtomicBool::new(false),
    });
    subscriber.on_subscribe(Upstream::Fuseable(subscription.clone()));
    if subscription.fused.load(Ordering::Acquire) {
      return;
    }
    if subscription.downstream.attach(subscriber) {
      subscription.drain();
    }
  }
}

struct IterSubscription<I: Iterator, S> {
  iter: Mutex<Option<Peekable<I>>>,
  requested: AtomicU64,
  wip: WorkInProgress,
  downstream: DownstreamCell<S>,
  fused: AtomicBool,
}

impl<I, S> IterSubscription<I, S>
where
  I: Iterator + Send + 'static,
  I::Item: Send + 'static,
  S: Subscriber<I::Item>,
{
  fn next_value(&self) -> Option<I::Item> { self.iter.lock().as_mut().and_then(Iterator::next) }

  fn exhausted(&self) -> bool { self.iter.lock().as_mut().map_or(true, |it| it.peek().is_none()) }

  fn drain(&self) {
    self.wip.drain(|| {
      let mut slot = self.downstream.lock();
      if slot.is_none() {
        return ControlFlow::Continue(());
      }
      let mut emitted = 0;
      loop {
        if self.downstream.is_cancelled() {
          slot.take();
          self.iter.lock().take();
          return ControlFlow::Break(());
        }
        if self.exhausted() {
          self.iter.lock().take();
          if let Some(downstream) = slot.take() {
            downstream.on_complete();
          }
          return ControlFlow::Break(());
        }
        let requested = self.requested.load(Ordering::Acquire);
        if emitted == requested {
          break;
        }
        let Some(value) = self.next_value() else { continue };
        if let Some(downstream) = slot.as_mut() {
          downstream.on_next(value);
        }
        emitted += 1;
        if requested != u64::MAX && emitted == requested {
          produced(&self.requested, emitted);
          emitted = 0;
        }
      }
      if emitted > 0 {
        produced(&self.requested, emitted);
      }
      ControlFlow::Continue(())
    });
  }
}

impl<I, S> Subscription for IterSubscription<I, S>
where
  I: Iterator + Send + 'static,
  I::Item: Send + 'static,
  S: Subscriber<I::Item>,
{
  fn request(&self, n: u64) {
    if self.fused.load(Ordering::Acquire) || !validate_request(n) {
      return;
    }
    add_demand(&self.requested, n);
    self.drain();
  }

  fn cancel(&self) {
    if self.downstream.cancel() && self.wip.enter() {
      self.downstream.take();
      self.iter.lock().take();
    }
  }
}

impl<I, S> FusedQueue<I::Item> for IterSubscription<I, S>
where
  I: Iterator + Send + 'static,
  I::Item: Send + 'static,
  S: Subscriber<I::Item>,
{
  fn poll(&self) -> Result<Option<I::Item>, Error> { Ok(self.next_value()) }

  fn is_empty(&self) -> bool { self.exhausted() }

  fn clear(&self) { self.iter.lock().take(); }

  fn size(&self) -> usize { self.iter.lock().as_ref().map_or(0, |it| it.size_hint().0) }
}

impl<I, S> QueueSubscription<I::Item> for IterSubscription<I, S>
where
  I: Iterator + Send + 'static,
  I::Item: Send + 'static,
  S: Subscriber<I::Item>,
{
  fn request_fusion(&self, mode: FusionMode) -> FusionMode {
    if mode.is_sync() {
      self.fused.store(true, Ordering::Release);
      FusionMode::SYNC
    } else {
      FusionMode::NONE
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::{prelude::*, testing::capture_undeliverable};

  #[test]
  fn honours_demand() {
    let ts = flowable::from_iter(vec!["a", "b", "c"]).test_with(1);
    ts.assert_values(&["a"]).assert_not_complete();
    ts.request(1);
    ts.assert_values(&["a", "b"]);
    ts.request(1);
    ts.assert_result(&["a", "b", "c"]);
  }

  #[test]
  fn completes_once_exhausted_without_extra_demand() {
    flowable::range(1, 3).test_with(3).assert_result(&[1, 2, 3]);
    flowable::empty::<i32>().test_with(0).assert_result(&[]);
  }

  #[test]
  fn reentrant_request_does_not_recurse() {
    let mut ts = TestSubscriber::with_request(0);
    struct OneByOne(TestSubscriber<i32>, Option<Upstream<i32>>);
    impl Subscriber<i32> for OneByOne {
      fn on_subscribe(&mut self, upstream: Upstream<i32>) {
        upstream.request(1);
        self.1 = Some(upstream);
      }
      fn on_next(&mut self, value: i32) {
        self.0.on_next(value);
        if let Some(up) = &self.1 {
          up.request(1);
        }
      }
      fn on_error(self, err: Error) { self.0.on_error(err) }
      fn on_complete(self) { self.0.on_complete() }
    }
    ts.on_subscribe(Upstream::empty());
    flowable::range(0, 10_000).subscribe_with(OneByOne(ts.clone(), None));
    ts.assert_value_count(10_000).assert_complete();
  }

  #[test]
  fn cancel_mid_stream_stops_emission() {
    let ts = flowable::range(1, 100).test_with(2);
    ts.cancel();
    ts.request(5);
    ts.assert_values(&[1, 2]).assert_not_terminated();
  }

  #[test]
  fn zero_request_is_a_protocol_violation() {
    let (ts, routed) = capture_undeliverable(|| {
      let ts = flowable::range(1, 2).test_with(0);
      ts.request(0);
      ts
    });
    ts.assert_values(&[]);
    assert_eq!(routed, vec![Error::Protocol(ProtocolViolation::NonPositiveRequest)]);
  }
}
