//! Operator implementations.
//!
//! Each module holds one operator family: the operator struct returned by
//! the [`Flowable`](crate::flowable::Flowable) method, its subscriber and,
//! where needed, the shared state coordinating several signal sources.

pub mod amb;
pub mod backpressure;
mod aggregate;
pub mod blocking;
pub mod collect;
pub mod concat_map;
pub mod concat_map_eager;
pub mod concat_map_maybe;
pub mod contains;
pub mod debounce;
pub mod delay;
pub mod filter;
pub mod first;
pub mod flat_map;
pub mod hide;
mod inner;
pub mod into_stream;
pub mod last;
pub mod lifecycle;
pub mod map;
pub mod materialize;
pub mod observe_on;
pub mod on_error;
pub(crate) mod post_complete;
pub mod reduce;
pub mod scan;
pub mod subscribe_on;
pub mod switch_map;
pub mod take;
pub mod throttle_last;
pub mod timeout;
