//! Test doubles that record signals and assert on them.
//!
//! [`TestSubscriber`] and [`TestObserver`] are cheap handles over shared
//! state: clone one, subscribe with the clone and keep asserting on the
//! original. Assertions panic with the recorded state in the message.

use std::{
  fmt::Debug,
  sync::Arc,
  thread::ThreadId,
  time::{Duration, Instant},
};

use parking_lot::{const_mutex, Condvar, Mutex, MutexGuard};

use crate::{
  disposable::{BoxDisposable, Disposable},
  error::Error,
  hooks,
  maybe::MaybeObserver,
  subscriber::Subscriber,
  subscription::{FusionMode, Subscription, Upstream, UNBOUNDED},
};

// ==================== TestSubscriber ====================

/// Records every signal of a [`Flowable`](crate::flowable::Flowable).
pub struct TestSubscriber<T> {
  shared: Arc<TsShared<T>>,
}

struct TsShared<T> {
  state: Mutex<TsState<T>>,
  terminated: Condvar,
  initial_request: u64,
  fusion: FusionMode,
}

struct TsState<T> {
  values: Vec<T>,
  errors: Vec<Error>,
  completions: usize,
  upstream: Option<Upstream<T>>,
  established: FusionMode,
  cancelled: bool,
}

impl<T> Clone for TestSubscriber<T> {
  fn clone(&self) -> Self { TestSubscriber { shared: self.shared.clone() } }
}

impl<T: Send + 'static> Default for TestSubscriber<T> {
  fn default() -> Self { Self::new() }
}

impl<T: Send + 'static> TestSubscriber<T> {
  /// Requests everything on subscription.
  pub fn new() -> Self { Self::build(UNBOUNDED, FusionMode::NONE) }

  /// Requests `n` on subscription; `0` waits for explicit [`request`](Self::request) calls.
  pub fn with_request(n: u64) -> Self { Self::build(n, FusionMode::NONE) }

  /// Proposes `mode` to a fuseable upstream and polls it if accepted.
  pub fn with_fusion(mode: FusionMode) -> Self { Self::build(UNBOUNDED, mode) }

  fn build(initial_request: u64, fusion: FusionMode) -> Self {
    TestSubscriber {
      shared: Arc::new(TsShared {
        state: Mutex::new(TsState {
          values: Vec::new(),
          errors: Vec::new(),
          completions: 0,
          upstream: None,
          established: FusionMode::NONE,
          cancelled: false,
        }),
        terminated: Condvar::new(),
        initial_request,
        fusion,
      }),
    }
  }

  fn upstream(&self) -> Option<Upstream<T>> { self.shared.state.lock().upstream.clone() }

  pub fn request(&self, n: u64) {
    if let Some(upstream) = self.upstream() {
      upstream.request(n);
    }
  }

  pub fn cancel(&self) {
    let upstream = {
      let mut state = self.shared.state.lock();
      state.cancelled = true;
      state.upstream.clone()
    };
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }

  pub fn is_cancelled(&self) -> bool { self.shared.state.lock().cancelled }

  pub fn is_subscribed(&self) -> bool { self.shared.state.lock().upstream.is_some() }

  pub fn is_terminated(&self) -> bool {
    let state = self.shared.state.lock();
    state.completions + state.errors.len() > 0
  }

  pub fn errors(&self) -> Vec<Error> { self.shared.state.lock().errors.clone() }

  pub fn completions(&self) -> usize { self.shared.state.lock().completions }

  pub fn value_count(&self) -> usize { self.shared.state.lock().values.len() }

  /// Blocks until a terminal signal arrived.
  ///
  /// # Panics
  /// When nothing terminal arrives within `timeout`.
  #[track_caller]
  pub fn await_done(&self, timeout: Duration) -> &Self {
    let deadline = Instant::now() + timeout;
    let mut state = self.shared.state.lock();
    while state.completions + state.errors.len() == 0 {
      if self.shared.terminated.wait_until(&mut state, deadline).timed_out() {
        panic!("no terminal signal within {timeout:?}");
      }
    }
    self
  }

  /// Blocks until at least `count` values arrived or `timeout` passed.
  pub fn await_count(&self, count: usize, timeout: Duration) -> &Self {
    let deadline = Instant::now() + timeout;
    while self.value_count() < count && !self.is_terminated() && Instant::now() < deadline {
      std::thread::sleep(Duration::from_millis(1));
    }
    self
  }

  #[track_caller]
  pub fn assert_subscribed(&self) -> &Self {
    assert!(self.is_subscribed(), "on_subscribe was not called");
    self
  }

  #[track_caller]
  pub fn assert_value_count(&self, count: usize) -> &Self {
    let actual = self.value_count();
    assert_eq!(actual, count, "value count differs");
    self
  }

  #[track_caller]
  pub fn assert_no_errors(&self) -> &Self {
    let errors = self.errors();
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    self
  }

  #[track_caller]
  pub fn assert_complete(&self) -> &Self {
    let state = self.shared.state.lock();
    assert_eq!(state.completions, 1, "expected one completion, errors: {:?}", state.errors);
    self
  }

  #[track_caller]
  pub fn assert_not_complete(&self) -> &Self {
    assert_eq!(self.completions(), 0, "unexpected completion");
    self
  }

  #[track_caller]
  pub fn assert_not_terminated(&self) -> &Self {
    let state = self.shared.state.lock();
    assert!(
      state.completions == 0 && state.errors.is_empty(),
      "unexpected terminal signal: {} completions, errors {:?}",
      state.completions,
      state.errors
    );
    self
  }

  #[track_caller]
  pub fn assert_error(&self, expected: &Error) -> &Self {
    let state = self.shared.state.lock();
    assert_eq!(state.errors.as_slice(), std::slice::from_ref(expected), "error differs");
    assert_eq!(state.completions, 0, "completed as well as errored");
    self
  }

  /// Asserts a single error matching `predicate`.
  #[track_caller]
  pub fn assert_error_matches(&self, predicate: impl FnOnce(&Error) -> bool) -> &Self {
    let state = self.shared.state.lock();
    assert_eq!(state.errors.len(), 1, "expected exactly one error, got {:?}", state.errors);
    assert!(predicate(&state.errors[0]), "unexpected error {:?}", state.errors[0]);
    self
  }

  #[track_caller]
  pub fn assert_fusion_mode(&self, mode: FusionMode) -> &Self {
    let established = self.shared.state.lock().established;
    assert_eq!(established, mode, "fusion mode differs");
    self
  }
}

impl<T: Clone + Send + 'static> TestSubscriber<T> {
  pub fn values(&self) -> Vec<T> { self.shared.state.lock().values.clone() }
}

impl<T: Clone + PartialEq + Debug + Send + 'static> TestSubscriber<T> {
  #[track_caller]
  pub fn assert_values(&self, expected: &[T]) -> &Self {
    let values = self.values();
    assert_eq!(values.as_slice(), expected, "values differ");
    self
  }

  /// Nothing received yet: no values and no terminal signal.
  #[track_caller]
  pub fn assert_empty(&self) -> &Self {
    self.assert_subscribed().assert_values(&[]).assert_not_terminated()
  }

  /// Exactly `expected`, then completion.
  #[track_caller]
  pub fn assert_result(&self, expected: &[T]) -> &Self {
    self.assert_values(expected).assert_no_errors().assert_complete()
  }

  /// Exactly `expected`, then `err`.
  #[track_caller]
  pub fn assert_failure(&self, err: &Error, expected: &[T]) -> &Self {
    self.assert_values(expected).assert_error(err)
  }
}

impl<T: Send + 'static> TsShared<T> {
  fn record_error(&self, err: Error) {
    self.state.lock().errors.push(err);
    self.terminated.notify_all();
  }

  fn record_complete(&self) {
    self.state.lock().completions += 1;
    self.terminated.notify_all();
  }

  /// Polls the fused upstream until it runs dry. Returns `true` when the
  /// stream ended (SYNC exhaustion or a poll error).
  fn poll_fused(&self, queue: &Upstream<T>, sync: bool) -> bool {
    let Some(queue) = queue.queue() else { return false };
    loop {
      if self.state.lock().cancelled {
        queue.clear();
        return true;
      }
      match queue.poll() {
        Ok(Some(v)) => self.state.lock().values.push(v),
        Ok(None) => {
          if sync {
            self.record_complete();
          }
          return sync;
        }
        Err(err) => {
          queue.cancel();
          self.record_error(err);
          return true;
        }
      }
    }
  }
}

impl<T: Send + 'static> Subscriber<T> for TestSubscriber<T> {
  fn on_subscribe(&mut self, upstream: Upstream<T>) {
    let cancelled = {
      let mut state = self.shared.state.lock();
      if state.upstream.is_some() {
        drop(state);
        upstream.cancel();
        self.shared.record_error(crate::error::ProtocolViolation::SubscriptionAlreadySet.into());
        return;
      }
      state.upstream = Some(upstream.clone());
      state.cancelled
    };
    if cancelled {
      upstream.cancel();
      return;
    }
    if !self.shared.fusion.is_none() {
      let mode = upstream.request_fusion(self.shared.fusion);
      self.shared.state.lock().established = mode;
      if mode.is_sync() {
        self.shared.poll_fused(&upstream, true);
        return;
      }
    }
    if self.shared.initial_request > 0 {
      upstream.request(self.shared.initial_request);
    }
  }

  fn on_next(&mut self, value: T) { self.shared.state.lock().values.push(value); }

  fn on_error(self, err: Error) { self.shared.record_error(err); }

  fn on_complete(self) {
    let fused = {
      let state = self.shared.state.lock();
      state.established.is_async().then(|| state.upstream.clone()).flatten()
    };
    if let Some(upstream) = fused {
      self.shared.poll_fused(&upstream, false);
    }
    self.shared.record_complete();
  }

  fn on_available(&mut self) {
    let upstream = self.upstream();
    if let Some(upstream) = upstream {
      self.shared.poll_fused(&upstream, false);
    }
  }
}

// ==================== TestObserver ====================

/// Records the outcome of a [`Maybe`](crate::maybe::Maybe).
pub struct TestObserver<T> {
  shared: Arc<ToShared<T>>,
}

struct ToShared<T> {
  state: Mutex<ToState<T>>,
  terminated: Condvar,
}

struct ToState<T> {
  disposable: Option<BoxDisposable>,
  values: Vec<T>,
  errors: Vec<Error>,
  completions: usize,
  disposed: bool,
}

impl<T> Clone for TestObserver<T> {
  fn clone(&self) -> Self { TestObserver { shared: self.shared.clone() } }
}

impl<T: Send + 'static> Default for TestObserver<T> {
  fn default() -> Self { Self::new() }
}

impl<T: Send + 'static> TestObserver<T> {
  pub fn new() -> Self {
    TestObserver {
      shared: Arc::new(ToShared {
        state: Mutex::new(ToState {
          disposable: None,
          values: Vec::new(),
          errors: Vec::new(),
          completions: 0,
          disposed: false,
        }),
        terminated: Condvar::new(),
      }),
    }
  }

  pub fn dispose(&self) {
    let disposable = {
      let mut state = self.shared.state.lock();
      state.disposed = true;
      state.disposable.clone()
    };
    if let Some(d) = disposable {
      d.dispose();
    }
  }

  pub fn is_disposed(&self) -> bool { self.shared.state.lock().disposed }

  pub fn is_terminated(&self) -> bool {
    let state = self.shared.state.lock();
    state.values.len() + state.errors.len() + state.completions > 0
  }

  pub fn errors(&self) -> Vec<Error> { self.shared.state.lock().errors.clone() }

  #[track_caller]
  pub fn await_done(&self, timeout: Duration) -> &Self {
    let deadline = Instant::now() + timeout;
    let mut state = self.shared.state.lock();
    while state.values.len() + state.errors.len() + state.completions == 0 {
      if self.shared.terminated.wait_until(&mut state, deadline).timed_out() {
        panic!("no terminal signal within {timeout:?}");
      }
    }
    self
  }

  #[track_caller]
  pub fn assert_subscribed(&self) -> &Self {
    assert!(self.shared.state.lock().disposable.is_some(), "on_subscribe was not called");
    self
  }

  /// Completed without a value.
  #[track_caller]
  pub fn assert_complete(&self) -> &Self {
    let state = self.shared.state.lock();
    assert_eq!(state.completions, 1, "expected empty completion, errors: {:?}", state.errors);
    assert!(state.values.is_empty(), "completed after a value");
    self
  }

  #[track_caller]
  pub fn assert_error(&self, expected: &Error) -> &Self {
    let state = self.shared.state.lock();
    assert_eq!(state.errors.as_slice(), std::slice::from_ref(expected), "error differs");
    assert!(state.values.is_empty() && state.completions == 0, "more than one outcome");
    self
  }

  #[track_caller]
  pub fn assert_error_matches(&self, predicate: impl FnOnce(&Error) -> bool) -> &Self {
    let state = self.shared.state.lock();
    assert_eq!(state.errors.len(), 1, "expected exactly one error, got {:?}", state.errors);
    assert!(predicate(&state.errors[0]), "unexpected error {:?}", state.errors[0]);
    self
  }

  #[track_caller]
  pub fn assert_not_terminated(&self) -> &Self {
    assert!(!self.is_terminated(), "unexpected outcome");
    self
  }
}

impl<T: Clone + PartialEq + Debug + Send + 'static> TestObserver<T> {
  pub fn value(&self) -> Option<T> { self.shared.state.lock().values.first().cloned() }

  /// Succeeded with exactly `expected`.
  #[track_caller]
  pub fn assert_value(&self, expected: T) -> &Self {
    let state = self.shared.state.lock();
    assert_eq!(state.values, vec![expected], "success value differs");
    assert!(state.errors.is_empty() && state.completions == 0, "more than one outcome");
    self
  }

  /// Subscribed and nothing happened yet.
  #[track_caller]
  pub fn assert_empty(&self) -> &Self { self.assert_subscribed().assert_not_terminated() }
}

impl<T: Send + 'static> MaybeObserver<T> for TestObserver<T> {
  fn on_subscribe(&mut self, disposable: BoxDisposable) {
    let dispose_now = {
      let mut state = self.shared.state.lock();
      state.disposable = Some(disposable.clone());
      state.disposed
    };
    if dispose_now {
      disposable.dispose();
    }
  }

  fn on_success(self, value: T) {
    self.shared.state.lock().values.push(value);
    self.shared.terminated.notify_all();
  }

  fn on_complete(self) {
    self.shared.state.lock().completions += 1;
    self.shared.terminated.notify_all();
  }

  fn on_error(self, err: Error) {
    self.shared.state.lock().errors.push(err);
    self.shared.terminated.notify_all();
  }
}

// ==================== Error hook capture ====================

static HOOK_LOCK: Mutex<()> = const_mutex(());

/// Serializes tests that install a process-wide error handler.
pub fn hook_lock() -> MutexGuard<'static, ()> { HOOK_LOCK.lock() }

/// Runs `f` with an error handler installed and returns the undeliverable
/// errors routed from the calling thread meanwhile.
///
/// Errors routed from other threads are logged as usual, so parallel tests
/// do not leak into each other's captures.
pub fn capture_undeliverable<R>(f: impl FnOnce() -> R) -> (R, Vec<Error>) {
  let _serial = hook_lock();
  let captured = Arc::new(Mutex::new(Vec::new()));
  let sink = captured.clone();
  let owner: ThreadId = std::thread::current().id();
  let handler = hooks::install_error_handler(move |err| {
    if std::thread::current().id() == owner {
      sink.lock().push(err);
    } else {
      tracing::error!(error = %err, "undeliverable error");
    }
  });
  let result = f();
  drop(handler);
  let errors = std::mem::take(&mut *captured.lock());
  (result, errors)
}
