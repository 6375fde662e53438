//! # rxflow: backpressured reactive streams
//!
//! Push-based sequences of 0..N values ([`Flowable`]) and 0..1 values
//! ([`Maybe`]) with consumer-driven demand, composable operators,
//! deterministic cancellation and operator fusion.
//!
//! ## Quick Start
//!
//! ```rust
//! use rxflow::prelude::*;
//!
//! let ts = flowable::range(1, 10)
//!   .filter(|v| v % 2 == 0)
//!   .map(|v| v * 10)
//!   .test();
//! ts.assert_result(&[20, 40, 60, 80, 100]);
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Flowable`] | 0..N values with backpressure |
//! | [`Maybe`] | 0..1 value |
//! | [`Subscriber`] | Consumes `on_subscribe`, `on_next`, `on_error`, `on_complete` |
//! | [`Subscription`] | Demand (`request`) and cancellation, held by a consumer |
//! | [`Scheduler`] | Deferred and periodic execution for time-based operators |
//!
//! Errors that can no longer reach a consumer are routed to [`hooks`].
//!
//! ## Feature Flags
//!
//! - **`futures-scheduler`** (default): [`ThreadPoolScheduler`](scheduler::ThreadPoolScheduler)
//!   backed by the `futures` thread pool
//!
//! [`Flowable`]: flowable::Flowable
//! [`Maybe`]: maybe::Maybe
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription
//! [`Scheduler`]: scheduler::Scheduler

pub mod config;
pub mod disposable;
mod drain;
pub mod error;
pub mod flowable;
pub mod function;
pub mod hooks;
pub mod maybe;
pub mod notification;
pub mod ops;
pub mod prelude;
pub mod queue;
pub mod scheduler;
pub mod subscriber;
pub mod subscription;
pub mod testing;

pub use error::{CompositeError, Error, ProtocolViolation};
pub use notification::Notification;
