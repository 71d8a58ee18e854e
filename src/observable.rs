//! The producer side: [`Observable`], the [`ObservableExt`] combinators and
//! the stock sources.
use crate::{
  fusion::FusionMode,
  observer::{BoxedObserver, Observer},
  ops::{
    filter::FilterOp,
    flat_map::{FlatMapOp, IdentityInner, MapInner, TryMapInner},
    map::MapOp,
    observe_on::ObserveOnOp,
    take_until::TakeUntilOp,
  },
  scheduler::Scheduler,
  subscriber::{LambdaObserver, Subscription},
  testing::TestObserver,
};

mod create;
mod from_iter;
mod of;
mod using;

pub use create::{create, Create, Emitter};
pub use from_iter::{from_iter, range, FromIter};
pub use of::{empty, never, of, throw, Empty, Never, Of, Throw};
pub use using::{using, Using};

// ============================================================================
// Observable Trait
// ============================================================================

/// A sequence that starts producing when subscribed.
pub trait Observable: Sized + 'static {
  type Item: Send + 'static;
  type Err: Send + 'static;

  /// Connects `observer`. The first signal it receives is `on_subscribe`.
  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<Self::Item, Self::Err> + 'static;

  /// Collapses a source known to produce at most one value without
  /// subscribing to it: `Ok(Some(v))` for exactly `v`, `Ok(None)` for an
  /// empty source, `Err(self)` for anything else.
  fn into_scalar(self) -> Result<Option<Self::Item>, Self> { Err(self) }
}

// ============================================================================
// Boxed Observable
// ============================================================================

trait DynObservable<Item, Err>: Send {
  fn box_subscribe(self: Box<Self>, observer: BoxedObserver<Item, Err>);

  fn box_into_scalar(self: Box<Self>) -> Result<Option<Item>, Box<dyn DynObservable<Item, Err>>>;
}

impl<S: Observable + Send> DynObservable<S::Item, S::Err> for S {
  fn box_subscribe(self: Box<Self>, observer: BoxedObserver<S::Item, S::Err>) {
    (*self).actual_subscribe(observer)
  }

  fn box_into_scalar(
    self: Box<Self>,
  ) -> Result<Option<S::Item>, Box<dyn DynObservable<S::Item, S::Err>>> {
    (*self).into_scalar().map_err(|s| Box::new(s) as Box<dyn DynObservable<_, _>>)
  }
}

/// A type-erased observable, for mixing different source types in one
/// collection.
pub struct BoxedObservable<Item, Err>(Box<dyn DynObservable<Item, Err>>);

impl<Item, Err> Observable for BoxedObservable<Item, Err>
where
  Item: Send + 'static,
  Err: Send + 'static,
{
  type Item = Item;
  type Err = Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<Item, Err> + 'static,
  {
    self.0.box_subscribe(Box::new(observer))
  }

  fn into_scalar(self) -> Result<Option<Item>, Self> { self.0.box_into_scalar().map_err(Self) }
}

// ============================================================================
// ObservableExt
// ============================================================================

pub trait ObservableExt: Observable {
  /// Applies `f` to every item.
  fn map<B, F>(self, f: F) -> MapOp<Self, F>
  where
    F: Fn(Self::Item) -> B + Send + Sync + 'static,
    B: Send + 'static,
  {
    MapOp::new(self, f)
  }

  /// Keeps the items `f` accepts.
  fn filter<F>(self, f: F) -> FilterOp<Self, F>
  where
    F: Fn(&Self::Item) -> bool + Send + Sync + 'static,
  {
    FilterOp::new(self, f)
  }

  /// Maps every item to an inner source and merges their items.
  ///
  /// All inners run at once unless
  /// [`max_concurrency`](FlatMapOp::max_concurrency) says otherwise; the
  /// first error ends everything unless
  /// [`delay_errors`](FlatMapOp::delay_errors) is set.
  fn flat_map<S, F>(self, f: F) -> FlatMapOp<Self, MapInner<F>>
  where
    F: FnMut(Self::Item) -> S + Send + 'static,
    S: Observable<Err = Self::Err>,
  {
    FlatMapOp::new(self, MapInner(f))
  }

  /// `flat_map` with a mapper that can fail; a failure disposes the source
  /// and is treated like a source error.
  fn try_flat_map<S, F>(self, f: F) -> FlatMapOp<Self, TryMapInner<F>>
  where
    F: FnMut(Self::Item) -> Result<S, Self::Err> + Send + 'static,
    S: Observable<Err = Self::Err>,
  {
    FlatMapOp::new(self, TryMapInner(f))
  }

  /// `flat_map` running one inner at a time, in source order.
  fn concat_map<S, F>(self, f: F) -> FlatMapOp<Self, MapInner<F>>
  where
    F: FnMut(Self::Item) -> S + Send + 'static,
    S: Observable<Err = Self::Err>,
  {
    self.flat_map(f).max_concurrency(1)
  }

  /// Merges the sources this observable emits.
  fn merge_all(self) -> FlatMapOp<Self, IdentityInner>
  where
    Self::Item: Observable<Err = Self::Err>,
  {
    FlatMapOp::new(self, IdentityInner)
  }

  /// Delivers every signal from `scheduler`.
  fn observe_on<Sch: Scheduler>(self, scheduler: Sch) -> ObserveOnOp<Self, Sch> {
    ObserveOnOp::new(self, scheduler)
  }

  /// Mirrors the source until `notifier` emits, then completes.
  fn take_until<N>(self, notifier: N) -> TakeUntilOp<Self, N>
  where
    N: Observable<Err = Self::Err>,
  {
    TakeUntilOp::new(self, notifier)
  }

  fn box_it(self) -> BoxedObservable<Self::Item, Self::Err>
  where
    Self: Send,
  {
    BoxedObservable(Box::new(self))
  }

  /// Subscribes with an item callback; errors are logged as undeliverable.
  fn subscribe<N>(self, next: N) -> Subscription
  where
    N: FnMut(Self::Item) + Send + 'static,
  {
    let observer = LambdaObserver::new(next, crate::error::undeliverable::<Self::Err>, || {});
    let subscription = observer.subscription();
    self.actual_subscribe(observer);
    subscription
  }

  fn subscribe_all<N, E, C>(self, next: N, error: E, complete: C) -> Subscription
  where
    N: FnMut(Self::Item) + Send + 'static,
    E: FnMut(Self::Err) + Send + 'static,
    C: FnMut() + Send + 'static,
  {
    let observer = LambdaObserver::new(next, error, complete);
    let subscription = observer.subscription();
    self.actual_subscribe(observer);
    subscription
  }

  /// Subscribes a recording [`TestObserver`].
  fn test(self) -> TestObserver<Self::Item, Self::Err> { self.test_fused(FusionMode::NONE) }

  /// Subscribes a recording [`TestObserver`] that asks its upstream for
  /// `mode` fusion.
  fn test_fused(self, mode: FusionMode) -> TestObserver<Self::Item, Self::Err> {
    let test = TestObserver::new();
    self.actual_subscribe(test.observer(mode));
    test
  }
}

impl<T: Observable> ObservableExt for T {}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::RxError;

  #[rxcore_macro::test]
  fn boxed_keeps_scalar_capability() {
    let boxed = of::<_, RxError>(3).box_it();
    assert!(matches!(boxed.into_scalar(), Ok(Some(3))));

    let boxed = from_iter::<_, RxError>(vec![1, 2]).box_it();
    let boxed = boxed.into_scalar().err().unwrap();
    boxed.test().assert_values(&[1, 2]).assert_complete();
  }

  #[rxcore_macro::test]
  fn mixed_sources_in_one_vec() {
    let sources: Vec<BoxedObservable<i32, RxError>> =
      vec![of(1).box_it(), range(2, 2).map(|v| v as i32).box_it(), empty().box_it()];
    crate::ops::flat_map::merge(sources).test().assert_values(&[1, 2, 3]).assert_complete();
  }
}
