//! Queue fusion: letting a consumer pull straight out of its upstream instead
//! of being pushed `next` calls through an intermediate buffer.
//!
//! A consumer finds the capability in [`Upstream`](crate::observer::Upstream)
//! at subscribe time, asks for the modes it can drive with
//! [`FusedQueue::request_fusion`] and either gets one of them back or
//! [`FusionMode::NONE`], in which case nothing changes.
//!
//! - `SYNC`: every item is already available. The consumer polls until
//!   `Ok(None)`, which means completion, and the upstream never calls `next`.
//! - `ASYNC`: items arrive over time. The upstream calls
//!   [`Observer::next_available`](crate::observer::Observer::next_available)
//!   instead of `next` and still delivers `error`/`complete`; `Ok(None)` only
//!   means "nothing right now".
//! - `BOUNDARY`: set by a consumer that must run its poll on another thread.
//!   Stages whose per-item work has to stay on the producing thread refuse to
//!   fuse when they see it.
use std::{fmt, ops::BitOr};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FusionMode(u8);

impl FusionMode {
  pub const NONE: FusionMode = FusionMode(0);
  pub const SYNC: FusionMode = FusionMode(1);
  pub const ASYNC: FusionMode = FusionMode(2);
  pub const ANY: FusionMode = FusionMode(Self::SYNC.0 | Self::ASYNC.0);
  pub const BOUNDARY: FusionMode = FusionMode(4);

  #[inline]
  pub const fn contains(self, other: FusionMode) -> bool { self.0 & other.0 == other.0 }

  #[inline]
  pub const fn is_none(self) -> bool { self.0 & Self::ANY.0 == 0 }

  #[inline]
  pub const fn without(self, other: FusionMode) -> FusionMode { FusionMode(self.0 & !other.0) }

  /// The mode a stage supporting `supported` grants for `requested`. `SYNC`
  /// is preferred over `ASYNC`.
  pub const fn grant(requested: FusionMode, supported: FusionMode) -> FusionMode {
    if requested.contains(Self::SYNC) && supported.contains(Self::SYNC) {
      Self::SYNC
    } else if requested.contains(Self::ASYNC) && supported.contains(Self::ASYNC) {
      Self::ASYNC
    } else {
      Self::NONE
    }
  }
}

impl BitOr for FusionMode {
  type Output = FusionMode;

  #[inline]
  fn bitor(self, rhs: FusionMode) -> FusionMode { FusionMode(self.0 | rhs.0) }
}

impl fmt::Debug for FusionMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_none() && !self.contains(Self::BOUNDARY) {
      return f.write_str("NONE");
    }
    let names = [(Self::SYNC, "SYNC"), (Self::ASYNC, "ASYNC"), (Self::BOUNDARY, "BOUNDARY")];
    let mut first = true;
    for (mode, name) in names {
      if self.contains(mode) {
        if !first {
          f.write_str(" | ")?;
        }
        f.write_str(name)?;
        first = false;
      }
    }
    Ok(())
  }
}

/// The pull side a fusable stage hands to its consumer.
///
/// Only valid after `request_fusion` granted a mode; the consumer is the
/// single thread polling it.
pub trait FusedQueue<Item, Err>: Send {
  fn request_fusion(&mut self, mode: FusionMode) -> FusionMode;

  /// Next item. In `SYNC` mode `Ok(None)` is completion, in `ASYNC` mode it
  /// means currently empty. An `Err` terminates the sequence.
  fn try_poll(&mut self) -> Result<Option<Item>, Err>;

  /// May need to look ahead, hence `&mut`.
  fn is_empty(&mut self) -> bool;

  fn clear(&mut self);
}

pub type BoxedFusedQueue<Item, Err> = Box<dyn FusedQueue<Item, Err>>;

impl<Item, Err, Q: FusedQueue<Item, Err> + ?Sized> FusedQueue<Item, Err> for Box<Q> {
  #[inline]
  fn request_fusion(&mut self, mode: FusionMode) -> FusionMode { (**self).request_fusion(mode) }

  #[inline]
  fn try_poll(&mut self) -> Result<Option<Item>, Err> { (**self).try_poll() }

  #[inline]
  fn is_empty(&mut self) -> bool { (**self).is_empty() }

  #[inline]
  fn clear(&mut self) { (**self).clear() }
}
