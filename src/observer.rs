//! The consumer side of a sequence.
//!
//! A subscription delivers, in order: exactly one `on_subscribe`, any number
//! of `next`, and at most one of `error`/`complete`. At most one thread is
//! inside an observer's methods at any instant; operators with several
//! producing threads serialize them before they reach their observer.
use std::{fmt, sync::Arc};

use crate::{
  disposable::Disposable,
  fusion::{BoxedFusedQueue, FusedQueue},
};

// ============================================================================
// Observer Trait
// ============================================================================

pub trait Observer<Item, Err>: Send {
  /// First signal of every subscription: the handle to cancel the upstream
  /// and, if the upstream can be fused, its pull side.
  fn on_subscribe(&mut self, upstream: Upstream<Item, Err>);

  fn next(&mut self, value: Item);

  fn error(&mut self, err: Err);

  fn complete(&mut self);

  /// Wake-up from an `ASYNC`-fused upstream: at least one item can be polled
  /// from the queue received in `on_subscribe`.
  fn next_available(&mut self) {}
}

impl<Item, Err, O> Observer<Item, Err> for Box<O>
where
  O: Observer<Item, Err> + ?Sized,
{
  #[inline]
  fn on_subscribe(&mut self, upstream: Upstream<Item, Err>) { (**self).on_subscribe(upstream) }

  #[inline]
  fn next(&mut self, value: Item) { (**self).next(value) }

  #[inline]
  fn error(&mut self, err: Err) { (**self).error(err) }

  #[inline]
  fn complete(&mut self) { (**self).complete() }

  #[inline]
  fn next_available(&mut self) { (**self).next_available() }
}

pub type BoxedObserver<Item, Err> = Box<dyn Observer<Item, Err>>;

// ============================================================================
// Upstream
// ============================================================================

/// What an observer receives in `on_subscribe`.
///
/// The fusion capability is present only if the upstream stage can be pulled
/// from; it is taken at most once. Dropping it without requesting a mode
/// leaves the upstream in its normal push mode.
pub struct Upstream<Item, Err> {
  disposable: Arc<dyn Disposable>,
  fusion: Option<BoxedFusedQueue<Item, Err>>,
}

impl<Item, Err> Upstream<Item, Err> {
  pub fn new(disposable: Arc<dyn Disposable>) -> Self { Self { disposable, fusion: None } }

  pub fn with_fusion(
    disposable: Arc<dyn Disposable>, queue: impl FusedQueue<Item, Err> + 'static,
  ) -> Self {
    Self { disposable, fusion: Some(Box::new(queue)) }
  }

  pub fn from_parts(
    disposable: Arc<dyn Disposable>, fusion: Option<BoxedFusedQueue<Item, Err>>,
  ) -> Self {
    Self { disposable, fusion }
  }

  #[inline]
  pub fn disposable(&self) -> &Arc<dyn Disposable> { &self.disposable }

  #[inline]
  pub fn is_fusable(&self) -> bool { self.fusion.is_some() }

  pub fn take_fusion(&mut self) -> Option<BoxedFusedQueue<Item, Err>> { self.fusion.take() }

  pub fn into_parts(self) -> (Arc<dyn Disposable>, Option<BoxedFusedQueue<Item, Err>>) {
    (self.disposable, self.fusion)
  }

  #[inline]
  pub fn dispose(&self) { self.disposable.dispose() }

  #[inline]
  pub fn is_disposed(&self) -> bool { self.disposable.is_disposed() }
}

impl<Item, Err> fmt::Debug for Upstream<Item, Err> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Upstream")
      .field("disposed", &self.is_disposed())
      .field("fusable", &self.is_fusable())
      .finish()
  }
}
