//! Wrappers that give infallible and fallible user callbacks one shape.
//!
//! Operators such as `map` and `try_map` share a single implementation that
//! calls an [`RxFn`]; an `Err` from it is handled as a callback failure
//! (cancel upstream, then error downstream).

use crate::error::Error;

/// A callback whose result may be an error.
pub trait RxFn<Args>: Send + Sync + 'static {
  type Output;

  fn call(&self, args: Args) -> Result<Self::Output, Error>;
}

/// A predicate over borrowed values.
pub trait RxPredicate<T>: Send + Sync + 'static {
  fn test(&self, value: &T) -> Result<bool, Error>;
}

/// Wraps a callback that cannot fail.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Infallible<F>(pub(crate) F);

/// Wraps a callback returning `Result<_, Error>`.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Fallible<F>(pub(crate) F);

impl<T, U, F> RxFn<T> for Infallible<F>
where
  F: Fn(T) -> U + Send + Sync + 'static,
{
  type Output = U;

  #[inline(always)]
  fn call(&self, args: T) -> Result<U, Error> { Ok((self.0)(args)) }
}

impl<T, U, F> RxFn<T> for Fallible<F>
where
  F: Fn(T) -> Result<U, Error> + Send + Sync + 'static,
{
  type Output = U;

  #[inline(always)]
  fn call(&self, args: T) -> Result<U, Error> { (self.0)(args) }
}

impl<T, F> RxPredicate<T> for Infallible<F>
where
  F: Fn(&T) -> bool + Send + Sync + 'static,
{
  #[inline(always)]
  fn test(&self, value: &T) -> Result<bool, Error> { Ok((self.0)(value)) }
}

impl<T, F> RxPredicate<T> for Fallible<F>
where
  F: Fn(&T) -> Result<bool, Error> + Send + Sync + 'static,
{
  #[inline(always)]
  fn test(&self, value: &T) -> Result<bool, Error> { (self.0)(value) }
}

/// Callback for values a rate-limiting operator discards.
pub type OnDropped<T> = std::sync::Arc<dyn Fn(T) -> Result<(), Error> + Send + Sync>;
