use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};

use crate::{
  drain::DownstreamCell,
  error::Error,
  flowable::Flowable,
  hooks,
  subscriber::Subscriber,
  subscription::{DeferredSubscription, Subscription, Upstream},
};

const NO_WINNER: usize = usize::MAX;

/// Subscribes every source and mirrors the first one that signals anything;
/// the others are cancelled.
pub struct Amb<P> {
  sources: Vec<P>,
}

impl<P> Amb<P> {
  pub fn new(sources: Vec<P>) -> Self { Amb { sources } }
}

impl<P: Flowable> Flowable for Amb<P> {
  type Item = P::Item;

  fn subscribe_actual<O: Subscriber<P::Item>>(self, mut downstream: O) {
    if self.sources.is_empty() {
      downstream.on_subscribe(Upstream::empty());
      downstream.on_complete();
      return;
    }
    let state = Arc::new(AmbState {
      downstream: DownstreamCell::default(),
      winner: AtomicUsize::new(NO_WINNER),
      subscriptions: self.sources.iter().map(|_| DeferredSubscription::default()).collect(),
    });
    downstream.on_subscribe(Upstream::Plain(state.clone()));
    if !state.downstream.attach(downstream) {
      return;
    }
    for (index, source) in self.sources.into_iter().enumerate() {
      if state.winner.load(Ordering::Acquire) != NO_WINNER || state.downstream.is_cancelled() {
        break;
      }
      source.subscribe_actual(AmbSubscriber { state: state.clone(), index, won: false });
    }
  }
}

struct AmbState<O> {
  downstream: DownstreamCell<O>,
  winner: AtomicUsize,
  subscriptions: Vec<DeferredSubscription>,
}

impl<O> AmbState<O> {
  /// True when `index` is, or just became, the winner.
  fn try_win(&self, index: usize) -> bool {
    match self.winner.compare_exchange(NO_WINNER, index, Ordering::AcqRel, Ordering::Acquire) {
      Ok(_) => {
        for (i, subscription) in self.subscriptions.iter().enumerate() {
          if i != index {
            subscription.cancel();
          }
        }
        true
      }
      Err(current) => current == index,
    }
  }
}

impl<O: Send + 'static> Subscription for AmbState<O> {
  fn request(&self, n: u64) {
    match self.winner.load(Ordering::Acquire) {
      NO_WINNER => self.subscriptions.iter().for_each(|s| s.request(n)),
      winner => self.subscriptions[winner].request(n),
    }
  }

  fn cancel(&self) {
    if self.downstream.cancel() {
      self.subscriptions.iter().for_each(Subscription::cancel);
    }
  }
}

struct AmbSubscriber<O> {
  state: Arc<AmbState<O>>,
  index: usize,
  won: bool,
}

impl<O> AmbSubscriber<O> {
  fn claim(&mut self) -> bool {
    if !self.won {
      self.won = self.state.try_win(self.index);
    }
    self.won
  }
}

impl<T: Send + 'static, O: Subscriber<T>> Subscriber<T> for AmbSubscriber<O> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    self.state.subscriptions[self.index].set(upstream.into_shared());
  }

  fn on_next(&mut self, value: T) {
    if !self.claim() {
      self.state.subscriptions[self.index].cancel();
      return;
    }
    let mut slot = self.state.downstream.lock();
    if let Some(downstream) = slot.as_mut() {
      downstream.on_next(value);
    }
    if self.state.downstream.is_cancelled() {
      slot.take();
    }
  }

  fn on_error(mut self, err: Error) {
    if !self.claim() {
      hooks::on_undeliverable(err);
      return;
    }
    self.state.subscriptions[self.index].release();
    if let Some(downstream) = self.state.downstream.take() {
      downstream.on_error(err);
    }
  }

  fn on_complete(mut self) {
    if !self.claim() {
      return;
    }
    self.state.subscriptions[self.index].release();
    if let Some(downstream) = self.state.downstream.take() {
      downstream.on_complete();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      atomic::{AtomicBool, Ordering},
      Arc, Barrier,
    },
    thread,
  };

  use parking_lot::Mutex;

  use crate::{prelude::*, testing::capture_undeliverable};

  #[test]
  fn first_to_signal_wins_and_losers_are_cancelled() {
    let scheduler = TestScheduler::new();
    let slow = flowable::timer(Duration::from_millis(20), scheduler.clone()).map(|_| 1);
    let fast = flowable::timer(Duration::from_millis(10), scheduler.clone()).map(|_| 2);
    let ts = flowable::amb([slow.boxed(), fast.boxed()]).test();
    ts.assert_empty();
    scheduler.advance_time_by(Duration::from_millis(10));
    ts.assert_result(&[2]);
    assert_eq!(scheduler.pending(), 0);
  }

  #[test]
  fn synchronous_winner_stops_subscribing_the_rest() {
    let subscribed = Arc::new(AtomicBool::new(false));
    let flag = subscribed.clone();
    let late = flowable::defer(move || {
      flag.store(true, Ordering::SeqCst);
      flowable::just(9)
    });
    flowable::amb([flowable::range(1, 2).boxed(), late.boxed()]).test().assert_result(&[1, 2]);
    assert!(!subscribed.load(Ordering::SeqCst));
  }

  #[test]
  fn an_error_can_win() {
    flowable::amb([flowable::error::<i32>(Error::msg("x")).boxed(), flowable::never().boxed()])
      .test()
      .assert_failure(&Error::msg("x"), &[]);
  }

  /// Keeps signalling regardless of cancellation.
  struct Stubborn(Arc<Mutex<Option<BoxSubscriber<i32>>>>);

  impl Flowable for Stubborn {
    type Item = i32;

    fn subscribe_actual<S: Subscriber<i32>>(self, mut subscriber: S) {
      subscriber.on_subscribe(Upstream::empty());
      *self.0.lock() = Some(Box::new(subscriber));
    }
  }

  #[test]
  fn loser_errors_go_to_the_hook() {
    let loser = Arc::new(Mutex::new(None));
    let (ts, routed) = capture_undeliverable(|| {
      let ts = flowable::amb([Stubborn(loser.clone()).boxed(), flowable::just(7).boxed()]).test();
      if let Some(subscriber) = loser.lock().take() {
        subscriber.on_error(Error::msg("late"));
      }
      ts
    });
    ts.assert_result(&[7]);
    assert_eq!(routed, vec![Error::msg("late")]);
  }

  #[test]
  fn empty_sources_complete() {
    flowable::amb(Vec::<BoxFlowable<i32>>::new()).test().assert_result(&[]);
  }

  #[test]
  fn simultaneous_emitters_produce_one_winner() {
    for _ in 0..50 {
      let slots: Vec<Arc<Mutex<Option<Emitter<i32>>>>> =
        (0..2).map(|_| Arc::new(Mutex::new(None))).collect();
      let sources: Vec<_> = slots
        .iter()
        .map(|slot| {
          let s = slot.clone();
          flowable::create(move |e| *s.lock() = Some(e), BackpressureStrategy::Buffer).boxed()
        })
        .collect();
      let ts = flowable::amb(sources).test();

      let barrier = Arc::new(Barrier::new(2));
      let handles: Vec<_> = slots
        .iter()
        .enumerate()
        .map(|(i, slot)| {
          let mut emitter = slot.lock().take().unwrap();
          let barrier = barrier.clone();
          thread::spawn(move || {
            barrier.wait();
            emitter.next(i as i32);
            emitter.complete();
          })
        })
        .collect();
      for h in handles {
        h.join().unwrap();
      }
      ts.assert_value_count(1).assert_complete();
      assert_eq!(ts.completions(), 1);
    }
  }
}
