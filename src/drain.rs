//! The drain loop shared by every operator that can be signalled from more
//! than one thread.
//!
//! A caller that moves the work-in-progress counter from 0 to 1 becomes the
//! only thread allowed to touch the downstream. It keeps looping while other
//! threads keep bumping the counter, so no signal is lost and none is
//! delivered concurrently. Threads that find the counter above zero only
//! leave their work in shared state and return.

use std::{
  collections::VecDeque,
  ops::ControlFlow,
  sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::{error::Error, hooks, notification::Notification, subscriber::Subscriber};

#[derive(Default)]
pub(crate) struct WorkInProgress(AtomicUsize);

impl WorkInProgress {
  /// True when the caller became the drainer.
  pub fn enter(&self) -> bool { self.0.fetch_add(1, Ordering::AcqRel) == 0 }

  /// Acknowledges `missed` rounds of work; returns what arrived meanwhile.
  /// Zero means the drainer role was released.
  pub fn leave(&self, missed: usize) -> usize { self.0.fetch_sub(missed, Ordering::AcqRel) - missed }

  pub fn is_active(&self) -> bool { self.0.load(Ordering::Acquire) != 0 }

  /// Runs `round` until no more work arrives. `Break` ends the loop while
  /// keeping the counter raised, which parks the drainer role forever; used
  /// once the downstream has terminated or cancelled.
  pub fn drain(&self, mut round: impl FnMut() -> ControlFlow<()>) {
    if !self.enter() {
      return;
    }
    self.run(&mut round);
  }

  /// The loop part of [`drain`](Self::drain), for callers that entered
  /// already (for example to hop onto a worker first).
  pub fn run(&self, round: &mut impl FnMut() -> ControlFlow<()>) {
    let mut missed = 1;
    loop {
      if round().is_break() {
        return;
      }
      missed = self.leave(missed);
      if missed == 0 {
        return;
      }
    }
  }
}

/// Downstream holder of a producer that hands out its subscription before
/// the consumer is stored.
///
/// The consumer is attached only after its `on_subscribe` returned. Cancel
/// never blocks: it flips the flag and drops the consumer only if nobody is
/// delivering to it; a deliverer re-checks [`is_cancelled`](Self::is_cancelled)
/// after every call and drops it itself.
pub(crate) struct DownstreamCell<S> {
  slot: Mutex<Option<S>>,
  cancelled: AtomicBool,
}

impl<S> Default for DownstreamCell<S> {
  fn default() -> Self { DownstreamCell { slot: Mutex::new(None), cancelled: AtomicBool::new(false) } }
}

impl<S> DownstreamCell<S> {
  /// Stores the consumer; returns `false` (and drops it) if cancelled.
  pub fn attach(&self, downstream: S) -> bool {
    *self.slot.lock() = Some(downstream);
    if self.is_cancelled() {
      self.slot.lock().take();
      return false;
    }
    true
  }

  /// Returns `true` for the call that performed the cancellation.
  pub fn cancel(&self) -> bool {
    let first = !self.cancelled.swap(true, Ordering::SeqCst);
    if first {
      self.release_if_idle();
    }
    first
  }

  pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::SeqCst) }

  pub fn lock(&self) -> parking_lot::MutexGuard<'_, Option<S>> { self.slot.lock() }

  pub fn take(&self) -> Option<S> { self.slot.lock().take() }

  pub fn release_if_idle(&self) {
    let released = self.slot.try_lock().and_then(|mut slot| slot.take());
    drop(released);
  }
}

/// Serializes signals that several threads may produce for one downstream
/// (a timer thread and the upstream thread, for example).
///
/// The downstream slot starts empty so the consumer can receive
/// `on_subscribe` before it is stored; signals that arrive earlier wait in
/// the queue until [`attach`](Self::attach).
pub(crate) struct Serializer<T, S> {
  wip: WorkInProgress,
  queue: Mutex<VecDeque<Notification<T>>>,
  downstream: Mutex<Option<S>>,
  done: AtomicBool,
  cancelled: AtomicBool,
}

impl<T, S> Default for Serializer<T, S> {
  fn default() -> Self {
    Serializer {
      wip: WorkInProgress::default(),
      queue: Mutex::new(VecDeque::new()),
      downstream: Mutex::new(None),
      done: AtomicBool::new(false),
      cancelled: AtomicBool::new(false),
    }
  }
}

impl<T: Send + 'static, S: Subscriber<T>> Serializer<T, S> {
  pub fn attach(&self, downstream: S) {
    *self.downstream.lock() = Some(downstream);
    self.drain();
  }

  pub fn next(&self, value: T) {
    if self.done.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire) {
      return;
    }
    self.queue.lock().push_back(Notification::Next(value));
    self.drain();
  }

  /// Delivers `err` unless a terminal signal was already accepted, in which
  /// case it goes to the error hook. Returns whether it was accepted.
  pub fn error(&self, err: Error) -> bool {
    if self.done.swap(true, Ordering::AcqRel) || self.cancelled.load(Ordering::Acquire) {
      hooks::on_undeliverable(err);
      return false;
    }
    self.queue.lock().push_back(Notification::Error(err));
    self.drain();
    true
  }

  pub fn complete(&self) {
    if self.done.swap(true, Ordering::AcqRel) {
      return;
    }
    self.queue.lock().push_back(Notification::Complete);
    self.drain();
  }

  pub fn is_done(&self) -> bool { self.done.load(Ordering::Acquire) }

  pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }

  /// Stops delivery and drops the downstream as soon as no one is
  /// delivering to it.
  pub fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    self.drain();
  }

  fn drain(&self) {
    self.wip.drain(|| {
      let mut guard = self.downstream.lock();
      loop {
        if self.cancelled.load(Ordering::Acquire) {
          guard.take();
          self.queue.lock().clear();
          return ControlFlow::Break(());
        }
        let Some(downstream) = guard.as_mut() else { return ControlFlow::Continue(()) };
        let next = self.queue.lock().pop_front();
        match next {
          None => return ControlFlow::Continue(()),
          Some(Notification::Next(v)) => downstream.on_next(v),
          Some(Notification::Error(e)) => {
            if let Some(downstream) = guard.take() {
              downstream.on_error(e);
            }
            return ControlFlow::Break(());
          }
          Some(Notification::Complete) => {
            if let Some(downstream) = guard.take() {
              downstream.on_complete();
            }
            return ControlFlow::Break(());
          }
        }
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{subscription::Upstream, testing::TestSubscriber};
  use std::{sync::Arc, thread};

  #[test]
  fn leave_reports_missed_work() {
    let wip = WorkInProgress::default();
    assert!(wip.enter());
    assert!(!wip.enter());
    assert!(!wip.enter());
    assert_eq!(wip.leave(1), 2);
    assert_eq!(wip.leave(2), 0);
    assert!(!wip.is_active());
  }

  #[test]
  fn serializer_holds_signals_until_attached() {
    let serializer = Serializer::default();
    serializer.next(1);
    serializer.next(2);
    serializer.complete();
    serializer.next(3);

    let mut ts = TestSubscriber::new();
    ts.on_subscribe(Upstream::<i32>::empty());
    serializer.attach(ts.clone());
    ts.assert_result(&[1, 2]);
  }

  #[test]
  fn concurrent_producers_are_serialized() {
    let serializer = Arc::new(Serializer::default());
    let mut ts = TestSubscriber::new();
    ts.on_subscribe(Upstream::<usize>::empty());
    serializer.attach(ts.clone());

    let handles: Vec<_> = (0..4)
      .map(|t| {
        let serializer = serializer.clone();
        thread::spawn(move || {
          for i in 0..250 {
            serializer.next(t * 1000 + i);
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    serializer.complete();
    ts.assert_value_count(1000).assert_complete();
  }

  #[test]
  fn second_terminal_goes_to_the_hook() {
    let (_, routed) = crate::testing::capture_undeliverable(|| {
      let serializer = Serializer::default();
      let mut ts = TestSubscriber::<i32>::new();
      ts.on_subscribe(Upstream::empty());
      serializer.attach(ts.clone());
      serializer.complete();
      assert!(!serializer.error(Error::msg("late")));
      ts.assert_result(&[]);
    });
    assert_eq!(routed, vec![Error::msg("late")]);
  }
}
