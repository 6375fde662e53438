//! A [`Flowable`] as a `futures::Stream`.
//!
//! ```rust
//! use futures::{executor::block_on, StreamExt};
//! use rxflow::prelude::*;
//!
//! let values: Vec<_> = block_on(flowable::range(1, 3).into_stream().collect());
//! assert_eq!(values, vec![Ok(1), Ok(2), Ok(3)]);
//! ```

use std::{
  collections::VecDeque,
  pin::Pin,
  sync::Arc,
  task::{Context, Poll},
};

use futures::{stream::FusedStream, task::AtomicWaker, Stream};
use parking_lot::Mutex;

use crate::{
  config,
  error::Error,
  flowable::Flowable,
  subscriber::Subscriber,
  subscription::{SubscriptionSlot, Upstream, UNBOUNDED},
};

struct StreamState<T> {
  queue: VecDeque<T>,
  terminal: Option<Result<(), Error>>,
}

struct Shared<T> {
  state: Mutex<StreamState<T>>,
  waker: AtomicWaker,
  upstream: SubscriptionSlot,
}

/// Yields `Ok` for every value and `Err` once for an error, then ends.
/// Dropping the stream cancels the subscription.
pub struct FlowableStream<T> {
  shared: Arc<Shared<T>>,
  limit: usize,
  consumed: usize,
  finished: bool,
}

impl<T: Send + 'static> FlowableStream<T> {
  /// Subscribes right away and prefetches `prefetch` values.
  pub fn new<F: Flowable<Item = T>>(source: F, prefetch: usize) -> Self {
    let shared = Arc::new(Shared {
      state: Mutex::new(StreamState { queue: VecDeque::new(), terminal: None }),
      waker: AtomicWaker::new(),
      upstream: SubscriptionSlot::default(),
    });
    let initial = if prefetch == usize::MAX { UNBOUNDED } else { prefetch as u64 };
    source.subscribe_actual(StreamSubscriber { shared: shared.clone(), initial });
    let limit = config::replenish_limit(prefetch);
    FlowableStream { shared, limit, consumed: 0, finished: false }
  }

  fn poll_item(&mut self) -> Option<Option<Result<T, Error>>> {
    let mut state = self.shared.state.lock();
    if let Some(value) = state.queue.pop_front() {
      drop(state);
      self.consumed += 1;
      if self.consumed == self.limit {
        self.consumed = 0;
        self.shared.upstream.request(self.limit as u64);
      }
      return Some(Some(Ok(value)));
    }
    let terminal = state.terminal.take()?;
    self.finished = true;
    Some(terminal.err().map(Err))
  }
}

impl<T: Send + 'static> Stream for FlowableStream<T> {
  type Item = Result<T, Error>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    if this.finished {
      return Poll::Ready(None);
    }
    if let Some(item) = this.poll_item() {
      return Poll::Ready(item);
    }
    this.shared.waker.register(cx.waker());
    // A signal may have landed between the check and the registration.
    match this.poll_item() {
      Some(item) => Poll::Ready(item),
      None => Poll::Pending,
    }
  }
}

impl<T: Send + 'static> FusedStream for FlowableStream<T> {
  fn is_terminated(&self) -> bool { self.finished }
}

impl<T> Drop for FlowableStream<T> {
  fn drop(&mut self) {
    if !self.finished {
      self.shared.upstream.cancel();
    }
  }
}

struct StreamSubscriber<T> {
  shared: Arc<Shared<T>>,
  initial: u64,
}

impl<T> StreamSubscriber<T> {
  fn signal(&self, f: impl FnOnce(&mut StreamState<T>)) {
    f(&mut self.shared.state.lock());
    self.shared.waker.wake();
  }
}

impl<T: Send + 'static> Subscriber<T> for StreamSubscriber<T> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    if self.shared.upstream.set_once(upstream.into_shared()) {
      self.shared.upstream.request(self.initial);
    }
  }

  fn on_next(&mut self, value: T) { self.signal(|s| s.queue.push_back(value)) }

  fn on_error(self, err: Error) {
    self.shared.upstream.release();
    self.signal(|s| s.terminal = Some(Err(err)))
  }

  fn on_complete(self) {
    self.shared.upstream.release();
    self.signal(|s| s.terminal = Some(Ok(())))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  };

  use futures::StreamExt;

  use crate::prelude::*;

  #[tokio::test]
  async fn yields_values_then_ends() {
    let values: Vec<_> = flowable::range(1, 300).into_stream().collect().await;
    assert_eq!(values.len(), 300);
    assert_eq!(values[299], Ok(300));
  }

  #[tokio::test]
  async fn error_is_yielded_once() {
    let mut stream =
      flowable::just(1).concat_with(flowable::error(Error::msg("x"))).into_stream();
    assert_eq!(stream.next().await, Some(Ok(1)));
    assert_eq!(stream.next().await, Some(Err(Error::msg("x"))));
    assert_eq!(stream.next().await, None);
  }

  #[cfg(feature = "futures-scheduler")]
  #[tokio::test]
  async fn values_from_another_thread_wake_the_task() {
    let scheduler = ThreadPoolScheduler::new().unwrap();
    let stream = flowable::timer(Duration::from_millis(10), scheduler).into_stream();
    let values: Vec<_> = stream.collect().await;
    assert_eq!(values, vec![Ok(0)]);
  }

  #[test]
  fn dropping_the_stream_cancels() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let c = cancelled.clone();
    let stream = flowable::never::<i32>()
      .do_on_cancel(move || c.store(true, Ordering::SeqCst))
      .into_stream();
    drop(stream);
    assert!(cancelled.load(Ordering::SeqCst));
  }
}
