//! Error values that flow through `error` signals.
//!
//! Operators are generic over their error type; [`RxError`] is the stock
//! choice and the one that knows how to aggregate itself through
//! [`ErrorComposite`].
use std::{error::Error as StdError, sync::Arc};

use crate::util::short_type_name;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RxError {
  #[error("{0}")]
  Message(String),

  /// Error raised by user code, shared so it can be broadcast.
  #[error("user error: {0}")]
  User(#[source] Arc<dyn StdError + Send + Sync>),

  #[error(transparent)]
  Composite(#[from] CompositeError),

  #[error("protocol violation: {0}")]
  ProtocolViolation(&'static str),
}

impl RxError {
  pub fn msg(message: impl Into<String>) -> Self { Self::Message(message.into()) }

  pub fn user(error: impl StdError + Send + Sync + 'static) -> Self { Self::User(Arc::new(error)) }

  pub fn is_composite(&self) -> bool { matches!(self, Self::Composite(_)) }

  /// The errors this one stands for: the members of a composite, or itself.
  pub fn flatten(self) -> Vec<RxError> {
    match self {
      Self::Composite(c) => c.errors,
      other => vec![other],
    }
  }
}

impl From<String> for RxError {
  fn from(message: String) -> Self { Self::Message(message) }
}

impl From<&str> for RxError {
  fn from(message: &str) -> Self { Self::Message(message.to_owned()) }
}

/// Several errors collected while sources were allowed to finish.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} errors occurred", .errors.len())]
pub struct CompositeError {
  errors: Vec<RxError>,
}

impl CompositeError {
  /// Builds a composite, inlining the members of nested composites.
  pub fn new(errors: impl IntoIterator<Item = RxError>) -> Self {
    Self { errors: errors.into_iter().flat_map(RxError::flatten).collect() }
  }

  pub fn errors(&self) -> &[RxError] { &self.errors }

  pub fn into_errors(self) -> Vec<RxError> { self.errors }

  pub fn len(&self) -> usize { self.errors.len() }

  pub fn is_empty(&self) -> bool { self.errors.is_empty() }
}

/// Error types that can fold several errors into one.
///
/// Only the delay-errors policy and resource cleanup need it, so it is not
/// required of error types in general.
pub trait ErrorComposite: Sized {
  /// `errors` is never empty; a single error is returned unchanged.
  fn compose(errors: Vec<Self>) -> Self;
}

impl ErrorComposite for RxError {
  fn compose(mut errors: Vec<Self>) -> Self {
    if errors.len() == 1 {
      errors.swap_remove(0)
    } else {
      RxError::Composite(CompositeError::new(errors))
    }
  }
}

impl ErrorComposite for String {
  fn compose(errors: Vec<Self>) -> Self { errors.join("; ") }
}

impl ErrorComposite for () {
  fn compose(_: Vec<Self>) -> Self {}
}

/// Sink for errors that arrive after their consumer already terminated.
pub(crate) fn undeliverable<E>(error: E) {
  tracing::warn!(
    target: "rxcore::undeliverable",
    error_type = short_type_name::<E>(),
    "error arrived after termination and was dropped"
  );
  drop(error);
}

/// Absorbs a broken signal contract: logged, never thrown.
pub(crate) fn protocol_violation(what: &'static str) {
  tracing::warn!(target: "rxcore::protocol", error = %RxError::ProtocolViolation(what));
}

#[cfg(test)]
mod tests {
  use super::*;

  #[rxcore_macro::test]
  fn compose_single_is_identity() {
    let e = RxError::compose(vec![RxError::msg("boom")]);
    assert!(!e.is_composite());
    assert_eq!(e.to_string(), "boom");
  }

  #[rxcore_macro::test]
  fn compose_flattens_nested() {
    let inner = RxError::compose(vec!["a".into(), "b".into()]);
    let outer = RxError::compose(vec![inner, "c".into()]);
    assert!(outer.is_composite());
    match outer {
      RxError::Composite(c) => {
        let msgs: Vec<_> = c.errors().iter().map(ToString::to_string).collect();
        assert_eq!(msgs, vec!["a", "b", "c"]);
        assert_eq!(c.to_string(), "3 errors occurred");
      }
      other => panic!("expected composite, got {other:?}"),
    }
  }

  #[rxcore_macro::test]
  fn user_error_keeps_source() {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let e = RxError::user(io);
    assert!(e.source().is_some());
    assert_eq!(e.to_string(), "user error: disk");
  }

  #[rxcore_macro::test]
  fn protocol_violation_display() {
    let e = RxError::ProtocolViolation("on_subscribe twice");
    assert_eq!(e.to_string(), "protocol violation: on_subscribe twice");
  }

  #[rxcore_macro::test]
  fn string_compose() {
    assert_eq!(String::compose(vec!["x".into(), "y".into()]), "x; y");
  }
}
