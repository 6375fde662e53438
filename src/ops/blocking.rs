//! Bridges that consume a [`Flowable`] on the calling thread.
//!
//! Values are prefetched into a bounded queue and replenished once three
//! quarters were consumed, so a blocking consumer applies backpressure like
//! any other subscriber. Callbacks always run on the thread that blocks.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use parking_lot::{Condvar, Mutex};

use crate::{
  config,
  error::Error,
  flowable::Flowable,
  subscriber::Subscriber,
  subscription::{DynamicSet, SubscriptionSlot, Upstream, UNBOUNDED},
};

// ==================== Interrupt ====================

type Wake = Arc<dyn Fn() + Send + Sync>;

/// Wakes blocked consumers early. A consumer that observes the interrupt
/// cancels its upstream and fails with [`Error::Interrupted`].
///
/// Cloning shares the flag; an interrupt stays raised.
#[derive(Clone, Default)]
pub struct Interrupt(Arc<InterruptState>);

#[derive(Default)]
struct InterruptState {
  interrupted: AtomicBool,
  waiters: Mutex<DynamicSet<Wake>>,
}

impl Interrupt {
  pub fn new() -> Self { Self::default() }

  pub fn interrupt(&self) {
    if self.0.interrupted.swap(true, Ordering::AcqRel) {
      return;
    }
    let waiters = self.0.waiters.lock().snapshot();
    for wake in waiters {
      wake();
    }
  }

  pub fn is_interrupted(&self) -> bool { self.0.interrupted.load(Ordering::Acquire) }

  pub(crate) fn register(&self, wake: Wake) -> usize { self.0.waiters.lock().add(wake) }

  pub(crate) fn unregister(&self, key: usize) { self.0.waiters.lock().remove(key); }
}

// ==================== Queue ====================

struct Channel<T> {
  state: Mutex<ChannelState<T>>,
  ready: Condvar,
}

struct ChannelState<T> {
  queue: VecDeque<T>,
  terminal: Option<Result<(), Error>>,
}

impl<T> Channel<T> {
  fn signal(&self, f: impl FnOnce(&mut ChannelState<T>)) {
    f(&mut self.state.lock());
    self.ready.notify_all();
  }
}

/// Consumer side of a prefetching subscription.
pub(crate) struct BlockingQueue<T> {
  channel: Arc<Channel<T>>,
  upstream: Arc<SubscriptionSlot>,
  limit: usize,
  consumed: usize,
  finished: bool,
}

impl<T: Send + 'static> BlockingQueue<T> {
  pub fn new<F: Flowable<Item = T>>(source: F, prefetch: usize) -> Self {
    let channel = Arc::new(Channel {
      state: Mutex::new(ChannelState { queue: VecDeque::new(), terminal: None }),
      ready: Condvar::new(),
    });
    let upstream = Arc::new(SubscriptionSlot::default());
    let initial = if prefetch == usize::MAX { UNBOUNDED } else { prefetch as u64 };
    source.subscribe_actual(ChannelSubscriber {
      channel: channel.clone(),
      upstream: upstream.clone(),
      initial,
    });
    BlockingQueue {
      channel,
      upstream,
      limit: config::replenish_limit(prefetch),
      consumed: 0,
      finished: false,
    }
  }

  fn waker(&self) -> Wake {
    let channel = self.channel.clone();
    Arc::new(move || channel.signal(|_| {}))
  }

  /// Blocks for the next signal. `None` after completion and after an
  /// error has been handed out.
  pub fn next(&mut self, interrupt: Option<&Interrupt>) -> Option<Result<T, Error>> {
    if self.finished {
      return None;
    }
    let mut state = self.channel.state.lock();
    let value = loop {
      if interrupt.is_some_and(Interrupt::is_interrupted) {
        drop(state);
        self.finished = true;
        self.upstream.cancel();
        tracing::debug!("blocking consumer interrupted");
        return Some(Err(Error::Interrupted));
      }
      if let Some(value) = state.queue.pop_front() {
        break value;
      }
      if let Some(terminal) = state.terminal.take() {
        self.finished = true;
        return terminal.err().map(Err);
      }
      self.channel.ready.wait(&mut state);
    };
    drop(state);
    self.consumed += 1;
    if self.consumed == self.limit {
      self.consumed = 0;
      self.upstream.request(self.limit as u64);
    }
    Some(Ok(value))
  }
}

impl<T> Drop for BlockingQueue<T> {
  fn drop(&mut self) {
    if !self.finished {
      self.upstream.cancel();
    }
  }
}

struct ChannelSubscriber<T> {
  channel: Arc<Channel<T>>,
  upstream: Arc<SubscriptionSlot>,
  initial: u64,
}

impl<T: Send + 'static> Subscriber<T> for ChannelSubscriber<T> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    if self.upstream.set_once(upstream.into_shared()) {
      self.upstream.request(self.initial);
    }
  }

  fn on_next(&mut self, value: T) { self.channel.signal(|s| s.queue.push_back(value)) }

  fn on_error(self, err: Error) {
    self.upstream.release();
    self.channel.signal(|s| s.terminal = Some(Err(err)))
  }

  fn on_complete(self) {
    self.upstream.release();
    self.channel.signal(|s| s.terminal = Some(Ok(())))
  }
}

// ==================== Entry points ====================

/// Runs the callbacks on the current thread until `source` terminates or
/// `interrupt` is raised.
pub(crate) fn subscribe<F, N, E, C>(
  source: F, interrupt: &Interrupt, mut on_next: N, on_error: E, on_complete: C,
) where
  F: Flowable,
  N: FnMut(F::Item),
  E: FnOnce(Error),
  C: FnOnce(),
{
  let mut queue = BlockingQueue::new(source, config::buffer_size());
  let key = interrupt.register(queue.waker());
  loop {
    match queue.next(Some(interrupt)) {
      Some(Ok(value)) => on_next(value),
      Some(Err(err)) => {
        interrupt.unregister(key);
        on_error(err);
        return;
      }
      None => {
        interrupt.unregister(key);
        on_complete();
        return;
      }
    }
  }
}

/// Iterator over a [`Flowable`], returned by
/// [`blocking_iter`](Flowable::blocking_iter). An error is yielded once and
/// ends the iteration; dropping the iterator cancels the stream.
pub struct BlockingIter<T> {
  queue: BlockingQueue<T>,
}

impl<T: Send + 'static> BlockingIter<T> {
  pub fn new<F: Flowable<Item = T>>(source: F, prefetch: usize) -> Self {
    BlockingIter { queue: BlockingQueue::new(source, prefetch) }
  }
}

impl<T: Send + 'static> Iterator for BlockingIter<T> {
  type Item = Result<T, Error>;

  fn next(&mut self) -> Option<Self::Item> { self.queue.next(None) }
}
