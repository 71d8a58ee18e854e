//! Process-wide defaults.
use once_cell::sync::Lazy;

/// Segment capacity of operator-internal queues unless overridden.
pub const DEFAULT_BUFFER_SIZE: usize = 128;

/// Smallest accepted segment capacity.
pub const MIN_BUFFER_SIZE: usize = 16;

/// Environment variable read once to override [`DEFAULT_BUFFER_SIZE`].
pub const BUFFER_SIZE_ENV: &str = "RXCORE_BUFFER_SIZE";

static BUFFER_SIZE: Lazy<usize> =
  Lazy::new(|| parse_buffer_size(std::env::var(BUFFER_SIZE_ENV).ok().as_deref()));

/// Default segment capacity for queues created by operators.
#[inline]
pub fn buffer_size() -> usize { *BUFFER_SIZE }

fn parse_buffer_size(raw: Option<&str>) -> usize {
  let Some(raw) = raw else { return DEFAULT_BUFFER_SIZE };
  match raw.trim().parse::<usize>() {
    Ok(size) => size.max(MIN_BUFFER_SIZE),
    Err(err) => {
      tracing::warn!(
        target: "rxcore::config",
        value = raw,
        %err,
        "ignoring invalid {BUFFER_SIZE_ENV}"
      );
      DEFAULT_BUFFER_SIZE
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[rxcore_macro::test]
  fn parses_override() {
    assert_eq!(parse_buffer_size(None), DEFAULT_BUFFER_SIZE);
    assert_eq!(parse_buffer_size(Some("512")), 512);
    assert_eq!(parse_buffer_size(Some(" 4 ")), MIN_BUFFER_SIZE);
    assert_eq!(parse_buffer_size(Some("lots")), DEFAULT_BUFFER_SIZE);
  }

  #[rxcore_macro::test]
  fn default_is_at_least_min() { assert!(buffer_size() >= MIN_BUFFER_SIZE); }
}
