use std::sync::Arc;

use crate::{
  fusion::{BoxedFusedQueue, FusedQueue, FusionMode},
  observable::Observable,
  observer::{Observer, Upstream},
};

pub struct MapOp<S, F> {
  source: S,
  func: F,
}

impl<S, F> MapOp<S, F> {
  #[inline]
  pub(crate) fn new(source: S, func: F) -> Self { Self { source, func } }
}

impl<S, F, B> Observable for MapOp<S, F>
where
  S: Observable,
  F: Fn(S::Item) -> B + Send + Sync + 'static,
  B: Send + 'static,
{
  type Item = B;
  type Err = S::Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<B, S::Err> + 'static,
  {
    self.source.actual_subscribe(MapObserver { observer, func: Arc::new(self.func) })
  }

  fn into_scalar(self) -> Result<Option<B>, Self> {
    let MapOp { source, func } = self;
    match source.into_scalar() {
      Ok(value) => Ok(value.map(func)),
      Err(source) => Err(MapOp { source, func }),
    }
  }
}

struct MapObserver<O, F> {
  observer: O,
  func: Arc<F>,
}

impl<Item, B, Err, O, F> Observer<Item, Err> for MapObserver<O, F>
where
  O: Observer<B, Err>,
  F: Fn(Item) -> B + Send + Sync + 'static,
  Item: 'static,
  Err: 'static,
  B: 'static,
{
  fn on_subscribe(&mut self, upstream: Upstream<Item, Err>) {
    let (disposable, fusion) = upstream.into_parts();
    let fusion = fusion.map(|queue| {
      Box::new(MapQueue { queue, func: self.func.clone() }) as BoxedFusedQueue<B, Err>
    });
    self.observer.on_subscribe(Upstream::from_parts(disposable, fusion))
  }

  #[inline]
  fn next(&mut self, value: Item) { self.observer.next((self.func)(value)) }

  #[inline]
  fn error(&mut self, err: Err) { self.observer.error(err) }

  #[inline]
  fn complete(&mut self) { self.observer.complete() }

  #[inline]
  fn next_available(&mut self) { self.observer.next_available() }
}

/// The upstream queue seen through the mapping function.
struct MapQueue<Item, Err, F> {
  queue: BoxedFusedQueue<Item, Err>,
  func: Arc<F>,
}

impl<Item, B, Err, F> FusedQueue<B, Err> for MapQueue<Item, Err, F>
where
  F: Fn(Item) -> B + Send + Sync,
{
  fn request_fusion(&mut self, mode: FusionMode) -> FusionMode {
    // The function would run on the consumer's thread.
    if mode.contains(FusionMode::BOUNDARY) {
      return FusionMode::NONE;
    }
    self.queue.request_fusion(mode)
  }

  #[inline]
  fn try_poll(&mut self) -> Result<Option<B>, Err> { Ok(self.queue.try_poll()?.map(|v| (self.func)(v))) }

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
    observable::{from_iter, of, range, ObservableExt},
    subject::Subject,
  };

  #[rxcore_macro::test]
  fn maps_every_item() {
    range::<RxError>(1, 3).map(|v| v * 10).test().assert_values(&[10, 20, 30]).assert_complete();
  }

  #[rxcore_macro::test]
  fn scalar_is_mapped_without_subscribing() {
    let mapped = of::<_, RxError>(2).map(|v| v + 1);
    assert!(matches!(mapped.into_scalar(), Ok(Some(3))));
  }

  #[rxcore_macro::test]
  fn fused_and_unfused_see_the_same_items() {
    let plain = range::<RxError>(0, 1000).map(|v| v * 2).test();
    let fused = range::<RxError>(0, 1000).map(|v| v * 2).test_fused(FusionMode::ANY);
    fused.assert_fusion_mode(FusionMode::SYNC).assert_complete();
    assert_eq!(plain.values(), fused.values());
  }

  #[rxcore_macro::test]
  fn boundary_request_is_refused() {
    from_iter::<_, RxError>(vec![1, 2])
      .map(|v| v + 1)
      .test_fused(FusionMode::ANY | FusionMode::BOUNDARY)
      .assert_fusion_mode(FusionMode::NONE)
      .assert_values(&[2, 3])
      .assert_complete();
  }

  #[rxcore_macro::test]
  fn forwards_error() {
    let subject = Subject::<i32, RxError>::new();
    let test = subject.clone().map(|v| v * 2).test();
    subject.next(1);
    subject.error(RxError::msg("bad"));
    test.assert_values(&[2]).assert_error(|e| e.to_string() == "bad");
  }
}
