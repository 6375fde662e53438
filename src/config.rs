//! Process-wide defaults.
//!
//! The default prefetch used by `flat_map`, `concat_map`, `observe_on` and
//! the blocking bridges is 128. It can be changed once per process with the
//! `RXFLOW_BUFFER_SIZE` environment variable, read on first use.

use once_cell::sync::Lazy;

pub const DEFAULT_BUFFER_SIZE: usize = 128;

const MIN_BUFFER_SIZE: usize = 16;

static BUFFER_SIZE: Lazy<usize> = Lazy::new(|| {
  parse_buffer_size(std::env::var("RXFLOW_BUFFER_SIZE").ok().as_deref())
});

/// Default number of values an operator prefetches from its upstream.
pub fn buffer_size() -> usize { *BUFFER_SIZE }

fn parse_buffer_size(raw: Option<&str>) -> usize {
  match raw.map(str::trim).map(str::parse::<usize>) {
    None => DEFAULT_BUFFER_SIZE,
    Some(Ok(size)) => size.max(MIN_BUFFER_SIZE),
    Some(Err(err)) => {
      tracing::warn!(%err, "ignoring invalid RXFLOW_BUFFER_SIZE");
      DEFAULT_BUFFER_SIZE
    }
  }
}

/// Replenish threshold for a prefetch window: request more once three
/// quarters were consumed.
pub(crate) fn replenish_limit(prefetch: usize) -> usize {
  if prefetch == usize::MAX {
    usize::MAX
  } else {
    (prefetch - (prefetch >> 2)).max(1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_overrides() {
    assert_eq!(parse_buffer_size(None), DEFAULT_BUFFER_SIZE);
    assert_eq!(parse_buffer_size(Some(" 256 ")), 256);
    assert_eq!(parse_buffer_size(Some("1")), MIN_BUFFER_SIZE);
    assert_eq!(parse_buffer_size(Some("lots")), DEFAULT_BUFFER_SIZE);
  }

  #[test]
  fn replenish_at_three_quarters() {
    assert_eq!(replenish_limit(128), 96);
    assert_eq!(replenish_limit(1), 1);
    assert_eq!(replenish_limit(usize::MAX), usize::MAX);
  }
}
