//! End-to-end behavior of operator chains over `Flowable`.

use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};

use parking_lot::Mutex;
use rxflow::{prelude::*, testing::capture_undeliverable};

type Slot = Arc<Mutex<Option<Emitter<i32>>>>;

fn manual() -> (Slot, impl Flowable<Item = i32>) {
  let slot: Slot = Arc::new(Mutex::new(None));
  let s = slot.clone();
  (slot, flowable::create(move |e| *s.lock() = Some(e), BackpressureStrategy::Buffer))
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Clone + Send + Sync + 'static) {
  let count = Arc::new(AtomicUsize::new(0));
  let c = count.clone();
  (count, move || {
    c.fetch_add(1, Ordering::SeqCst);
  })
}

// ==================== Fusion ====================

#[rxflow_macro::test]
fn fused_and_hidden_chains_agree() {
  let fused = TestSubscriber::with_fusion(FusionMode::ANY);
  flowable::range(1, 20)
    .map(|v| v * 3)
    .filter(|v| v % 2 == 0)
    .map(|v| v + 1)
    .subscribe_with(fused.clone());

  let plain = flowable::range(1, 20)
    .hide()
    .map(|v| v * 3)
    .filter(|v| v % 2 == 0)
    .map(|v| v + 1)
    .test();

  fused.assert_fusion_mode(FusionMode::SYNC).assert_complete();
  plain.assert_result(&fused.values());
}

#[rxflow_macro::test]
fn fused_failure_matches_hidden_failure() {
  let chain = |source: BoxFlowable<i32>| {
    source.try_map(|v| if v == 3 { Err(Error::msg("three")) } else { Ok(v) }).test()
  };
  chain(flowable::range(1, 5).boxed()).assert_failure(&Error::msg("three"), &[1, 2]);
  chain(flowable::range(1, 5).hide().boxed()).assert_failure(&Error::msg("three"), &[1, 2]);
}

// ==================== Cancellation ====================

#[rxflow_macro::test]
fn disposing_twice_cancels_once() {
  let (cancels, on_cancel) = counter();
  let handle = flowable::never::<i32>().do_on_cancel(on_cancel).subscribe(|_| {});
  assert!(!handle.is_disposed());
  handle.dispose();
  handle.dispose();
  assert!(handle.is_disposed());
  assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[rxflow_macro::test]
fn composite_disposes_every_subscription() {
  let (cancels, on_cancel) = counter();
  let composite = CompositeDisposable::default();
  for _ in 0..3 {
    composite.add(flowable::never::<i32>().do_on_cancel(on_cancel.clone()).subscribe(|_| {}));
  }
  composite.dispose();
  composite.dispose();
  assert_eq!(cancels.load(Ordering::SeqCst), 3);
}

#[rxflow_macro::test]
fn completed_chain_drops_its_references() {
  let token = Arc::new(());
  let t = token.clone();
  let done = Arc::new(AtomicBool::new(false));
  let d = done.clone();
  let _handle = flowable::range(1, 10)
    .map(move |v| {
      let _keep = &t;
      v
    })
    .filter(|v| v % 2 == 0)
    .flat_map(flowable::just)
    .subscribe_all(|_| {}, |_| {}, move || d.store(true, Ordering::SeqCst));
  assert!(done.load(Ordering::SeqCst));
  assert_eq!(Arc::strong_count(&token), 1);
}

// ==================== Coordinators ====================

#[rxflow_macro::test]
fn merge_error_cancels_the_other_sources() {
  let (cancels, on_cancel) = counter();
  let ts = flowable::merge(vec![
    flowable::never::<i32>().do_on_cancel(on_cancel).boxed(),
    flowable::error(Error::msg("boom")).boxed(),
  ])
  .test();
  ts.assert_failure(&Error::msg("boom"), &[]);
  assert_eq!(ts.errors().len(), 1);
  assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[rxflow_macro::test]
fn merge_delay_error_drains_before_failing() {
  let ts = flowable::merge_delay_error(vec![
    flowable::error::<i32>(Error::msg("late")).boxed(),
    flowable::range(1, 3).boxed(),
  ])
  .test();
  ts.assert_failure(&Error::msg("late"), &[1, 2, 3]);
}

#[rxflow_macro::test]
fn concat_and_concat_eager_keep_source_order() {
  let scheduler = TestScheduler::new();
  let sources = || {
    vec![
      flowable::timer(Duration::from_millis(30), scheduler.clone()).map(|_| 1).boxed(),
      flowable::timer(Duration::from_millis(10), scheduler.clone()).map(|_| 2).boxed(),
    ]
  };
  let concat = flowable::concat(sources()).test();
  let eager = flowable::concat_eager(sources()).test();
  scheduler.advance_time_by(Duration::from_millis(30));
  eager.assert_result(&[1, 2]);
  concat.assert_values(&[1]).assert_not_complete();
  scheduler.advance_time_by(Duration::from_millis(10));
  concat.assert_result(&[1, 2]);
}

#[rxflow_macro::test]
fn amb_follows_the_first_source_to_signal() {
  let scheduler = TestScheduler::new();
  let (cancels, on_cancel) = counter();
  let ts = flowable::amb(vec![
    flowable::timer(Duration::from_millis(20), scheduler.clone())
      .map(|_| "slow")
      .do_on_cancel(on_cancel)
      .boxed(),
    flowable::timer(Duration::from_millis(5), scheduler.clone()).map(|_| "fast").boxed(),
  ])
  .test();
  scheduler.advance_time_by(Duration::from_millis(50));
  ts.assert_result(&["fast"]);
  assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[rxflow_macro::test]
fn switch_map_drops_the_stale_inner() {
  let scheduler = TestScheduler::new();
  let (source, flow) = manual();
  let s = scheduler.clone();
  let ts = flow
    .switch_map(move |v| flowable::timer(Duration::from_millis(10), s.clone()).map(move |_| v))
    .test();
  let mut emitter = source.lock().take().unwrap();
  emitter.next(1);
  scheduler.advance_time_by(Duration::from_millis(5));
  emitter.next(2);
  emitter.complete();
  scheduler.advance_time_by(Duration::from_millis(20));
  ts.assert_result(&[2]);
}

// ==================== Time ====================

#[rxflow_macro::test]
fn throttle_last_emits_the_latest_per_period() {
  let scheduler = TestScheduler::new();
  let (source, flow) = manual();
  let ts = flow.throttle_last(Duration::from_millis(500), scheduler.clone()).test();
  let mut emitter = source.lock().take().unwrap();
  emitter.next(1);
  emitter.next(2);
  scheduler.advance_time_to(Duration::from_millis(501));
  ts.assert_values(&[2]).assert_not_terminated();
}

#[rxflow_macro::test]
fn throttle_last_failing_drop_callback_ends_the_stream() {
  let scheduler = TestScheduler::new();
  let (cancels, on_cancel) = counter();
  let (source, flow) = manual();
  let ts = flow
    .do_on_cancel(on_cancel)
    .throttle_last(Duration::from_millis(500), scheduler.clone())
    .on_dropped(|v| Err(Error::msg(format!("dropped {v}"))))
    .test();
  let mut emitter = source.lock().take().unwrap();
  emitter.next(1);
  emitter.next(2);
  ts.assert_failure(&Error::msg("dropped 1"), &[]);
  emitter.next(3);
  scheduler.advance_time_by(Duration::from_secs(1));
  ts.assert_failure(&Error::msg("dropped 1"), &[]);
  assert_eq!(cancels.load(Ordering::SeqCst), 1);
  assert!(emitter.is_cancelled());
}

#[rxflow_macro::test]
fn debounce_waits_for_silence() {
  let scheduler = TestScheduler::new();
  let dropped = Arc::new(Mutex::new(Vec::new()));
  let d = dropped.clone();
  let (source, flow) = manual();
  let ts = flow
    .debounce(Duration::from_millis(100), scheduler.clone())
    .on_dropped(move |v| {
      d.lock().push(v);
      Ok(())
    })
    .test();
  let mut emitter = source.lock().take().unwrap();
  emitter.next(1);
  scheduler.advance_time_by(Duration::from_millis(50));
  emitter.next(2);
  scheduler.advance_time_by(Duration::from_millis(100));
  emitter.next(3);
  emitter.complete();
  ts.assert_result(&[2, 3]);
  assert_eq!(*dropped.lock(), vec![1]);
}

#[rxflow_macro::test]
fn timeout_switches_to_the_fallback() {
  let scheduler = TestScheduler::new();
  let (cancels, on_cancel) = counter();
  let ts = flowable::never::<i32>()
    .do_on_cancel(on_cancel)
    .timeout_fallback(Duration::from_millis(10), scheduler.clone(), flowable::range(7, 2))
    .test();
  scheduler.advance_time_by(Duration::from_millis(10));
  ts.assert_result(&[7, 8]);
  assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[rxflow_macro::test]
fn delay_subscription_waits_for_the_other() {
  let scheduler = TestScheduler::new();
  let (subscribed, on_request) = counter();
  let ts = flowable::range(1, 2)
    .do_on_request(move |_| on_request())
    .delay_subscription(flowable::timer(Duration::from_millis(5), scheduler.clone()))
    .test();
  ts.assert_empty();
  assert_eq!(subscribed.load(Ordering::SeqCst), 0);
  scheduler.advance_time_by(Duration::from_millis(5));
  ts.assert_result(&[1, 2]);
}

// ==================== Aggregation and notifications ====================

#[rxflow_macro::test]
fn collect_starts_fresh_on_every_subscription() {
  let collect = flowable::range(1, 3).collect(Vec::new, Vec::push);
  collect.clone().test().assert_value(vec![1, 2, 3]);
  collect.test().assert_value(vec![1, 2, 3]);
}

#[rxflow_macro::test]
fn materialize_round_trips() {
  flowable::range(1, 3).materialize().dematerialize(|n| n).test().assert_result(&[1, 2, 3]);
  flowable::empty::<i32>().materialize().dematerialize(|n| n).test().assert_result(&[]);
  flowable::just(1)
    .concat_with(flowable::error(Error::msg("x")))
    .materialize()
    .test()
    .assert_result(&[Notification::Next(1), Notification::Error(Error::msg("x"))]);
  flowable::just(1)
    .concat_with(flowable::error(Error::msg("x")))
    .materialize()
    .dematerialize(|n| n)
    .test()
    .assert_failure(&Error::msg("x"), &[1]);
}

// ==================== Error routing ====================

#[rxflow_macro::test]
fn second_error_reaches_the_hook_once() {
  let (ts, routed) = capture_undeliverable(|| {
    let (source, flow) = manual();
    let ts = flow.map(|v| v + 1).test();
    let mut emitter = source.lock().take().unwrap();
    emitter.error(Error::msg("first"));
    emitter.error(Error::msg("second"));
    ts
  });
  ts.assert_failure(&Error::msg("first"), &[]);
  assert_eq!(routed, vec![Error::msg("second")]);
}

#[rxflow_macro::test]
fn error_after_cancel_is_undeliverable() {
  let ((), routed) = capture_undeliverable(|| {
    let (source, flow) = manual();
    let ts = flow.filter(|v| *v > 0).test();
    ts.cancel();
    let mut emitter = source.lock().take().unwrap();
    emitter.error(Error::msg("late"));
    ts.assert_not_terminated();
  });
  assert_eq!(routed, vec![Error::msg("late")]);
}

// ==================== Bridges ====================

#[rxflow_macro::test]
fn blocking_bridges_return_plain_results() {
  assert_eq!(flowable::range(1, 4).blocking_first(), Ok(Some(1)));
  assert_eq!(flowable::range(1, 4).blocking_last(), Ok(Some(4)));
  assert_eq!(flowable::empty::<i32>().blocking_last(), Ok(None));
  let values: Vec<_> = flowable::range(1, 3).blocking_iter().collect();
  assert_eq!(values, vec![Ok(1), Ok(2), Ok(3)]);
}

#[rxflow_macro::test]
async fn stream_bridge_applies_backpressure() {
  use futures::StreamExt;

  let requested = Arc::new(AtomicUsize::new(0));
  let r = requested.clone();
  let mut stream = flowable::range(1, 1000)
    .do_on_request(move |n| {
      r.fetch_add(n as usize, Ordering::SeqCst);
    })
    .into_stream();
  assert_eq!(stream.next().await, Some(Ok(1)));
  assert!(requested.load(Ordering::SeqCst) < 1000);
  let rest: Vec<_> = stream.collect().await;
  assert_eq!(rest.len(), 999);
}

#[cfg(feature = "futures-scheduler")]
#[rxflow_macro::test]
fn observe_on_delivers_everything_across_threads() {
  let scheduler = ThreadPoolScheduler::new().unwrap();
  let ts = flowable::range(1, 500).observe_on(scheduler).test();
  ts.await_done(Duration::from_secs(5));
  assert_eq!(ts.value_count(), 500);
  ts.assert_complete();
}
