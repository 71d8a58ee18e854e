use std::sync::Arc;

use crate::{
  fusion::{BoxedFusedQueue, FusedQueue, FusionMode},
  observable::Observable,
  observer::{Observer, Upstream},
};

/// Emit only those items from an Observable that pass a predicate test
/// # Example
///
/// ```
/// use rxcore::prelude::*;
///
/// range::<RxError>(0, 10)
///   .filter(|v| *v % 2 == 0)
///   .test()
///   .assert_values(&[0, 2, 4, 6, 8])
///   .assert_complete();
/// ```
pub struct FilterOp<S, F> {
  source: S,
  filter: F,
}

impl<S, F> FilterOp<S, F> {
  #[inline]
  pub(crate) fn new(source: S, filter: F) -> Self { Self { source, filter } }
}

impl<S, F> Observable for FilterOp<S, F>
where
  S: Observable,
  F: Fn(&S::Item) -> bool + Send + Sync + 'static,
{
  type Item = S::Item;
  type Err = S::Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<S::Item, S::Err> + 'static,
  {
    self.source.actual_subscribe(FilterObserver { observer, filter: Arc::new(self.filter) })
  }

  fn into_scalar(self) -> Result<Option<S::Item>, Self> {
    let FilterOp { source, filter } = self;
    match source.into_scalar() {
      Ok(value) => Ok(value.filter(|v| filter(v))),
      Err(source) => Err(FilterOp { source, filter }),
    }
  }
}

struct FilterObserver<O, F> {
  observer: O,
  filter: Arc<F>,
}

impl<Item, Err, O, F> Observer<Item, Err> for FilterObserver<O, F>
where
  O: Observer<Item, Err>,
  F: Fn(&Item) -> bool + Send + Sync + 'static,
  Item: 'static,
  Err: 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<Item, Err>) {
    let (disposable, fusion) = upstream.into_parts();
    let fusion = fusion.map(|queue| {
      Box::new(FilterQueue { queue, filter: self.filter.clone() }) as BoxedFusedQueue<Item, Err>
    });
    self.observer.on_subscribe(Upstream::from_parts(disposable, fusion))
  }

  fn next(&mut self, value: Item) {
    if (self.filter)(&value) {
      self.observer.next(value)
    }
  }

  #[inline]
  fn error(&mut self, err: Err) { self.observer.error(err) }

  #[inline]
  fn complete(&mut self) { self.observer.complete() }

  #[inline]
  fn next_available(&mut self) { self.observer.next_available() }
}

struct FilterQueue<Item, Err, F> {
  queue: BoxedFusedQueue<Item, Err>,
  filter: Arc<F>,
}

impl<Item, Err, F> FusedQueue<Item, Err> for FilterQueue<Item, Err, F>
where
  F: Fn(&Item) -> bool + Send + Sync,
{
  fn request_fusion(&mut self, mode: FusionMode) -> FusionMode {
    if mode.contains(FusionMode::BOUNDARY) {
      return FusionMode::NONE;
    }
    self.queue.request_fusion(mode)
  }

  fn try_poll(&mut self) -> Result<Option<Item>, Err> {
    while let Some(v) = self.queue.try_poll()? {
      if (self.filter)(&v) {
        return Ok(Some(v));
      }
    }
    Ok(None)
  }

  /// Only tells whether the upstream is empty; rejected items still count.
  #[inline]
  fn is_empty(&mut self) -> bool { self.queue.is_empty() }

  #[inline]
  fn clear(&mut self) { self.queue.clear() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    error::RxError,
    observable::{of, range, ObservableExt},
  };

  #[rxcore_macro::test]
  fn keeps_accepted_items() {
    range::<RxError>(0, 6).filter(|v| v % 3 == 0).test().assert_values(&[0, 3]).assert_complete();
  }

  #[rxcore_macro::test]
  fn scalar_filtered_out_becomes_empty() {
    assert!(matches!(of::<i32, RxError>(1).filter(|v| *v > 1).into_scalar(), Ok(None)));
    assert!(matches!(of::<i32, RxError>(2).filter(|v| *v > 1).into_scalar(), Ok(Some(2))));
  }

  #[rxcore_macro::test]
  fn fused_poll_skips_rejected() {
    range::<RxError>(0, 10)
      .filter(|v| v % 2 == 1)
      .map(|v| v * 10)
      .test_fused(FusionMode::SYNC)
      .assert_fusion_mode(FusionMode::SYNC)
      .assert_values(&[10, 30, 50, 70, 90])
      .assert_complete();
  }
}
