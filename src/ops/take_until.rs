use std::{marker::PhantomData, sync::Arc};

use crate::{
  disposable::{Disposable, DisposableSlot},
  half_serializer::HalfSerializer,
  observable::Observable,
  observer::{Observer, Upstream},
};

/// Emits the values emitted by the source until `notifier` emits a value,
/// then completes.
///
/// A notifier error is forwarded. A notifier that completes without emitting
/// is ignored and the source keeps going.
pub struct TakeUntilOp<S, N> {
  source: S,
  notifier: N,
}

impl<S, N> TakeUntilOp<S, N> {
  #[inline]
  pub(crate) fn new(source: S, notifier: N) -> Self { Self { source, notifier } }
}

impl<S, N> Observable for TakeUntilOp<S, N>
where
  S: Observable,
  N: Observable<Err = S::Err>,
{
  type Item = S::Item;
  type Err = S::Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<S::Item, S::Err> + 'static,
  {
    let state = Arc::new(TakeUntilState {
      serializer: HalfSerializer::new(observer),
      main: DisposableSlot::new(),
      other: DisposableSlot::new(),
    });
    let upstream = Upstream::new(state.clone());
    state.serializer.emit::<S::Item>(|o| o.on_subscribe(upstream));

    self.notifier.actual_subscribe(NotifierObserver { state: state.clone(), _p: PhantomData });
    if state.main.is_disposed() {
      return;
    }
    self.source.actual_subscribe(MainObserver { state });
  }
}

struct TakeUntilState<O, Err> {
  serializer: HalfSerializer<O, Err>,
  main: DisposableSlot,
  other: DisposableSlot,
}

impl<O: Send, Err: Send> Disposable for TakeUntilState<O, Err> {
  fn dispose(&self) {
    self.main.dispose();
    self.other.dispose();
  }

  #[inline]
  fn is_disposed(&self) -> bool { self.main.is_disposed() }
}

struct MainObserver<O, Err> {
  state: Arc<TakeUntilState<O, Err>>,
}

impl<Item, Err, O> Observer<Item, Err> for MainObserver<O, Err>
where
  O: Observer<Item, Err>,
  Err: Send,
{
  fn on_subscribe(&mut self, upstream: Upstream<Item, Err>) {
    self.state.main.set_once(Box::new(upstream.disposable().clone()));
  }

  #[inline]
  fn next(&mut self, value: Item) { self.state.serializer.next(value); }

  fn error(&mut self, err: Err) {
    self.state.other.dispose();
    self.state.main.weak_dispose();
    self.state.serializer.error::<Item>(err);
  }

  fn complete(&mut self) {
    self.state.other.dispose();
    self.state.main.weak_dispose();
    self.state.serializer.complete::<Item>();
  }
}

struct NotifierObserver<O, Item, Err> {
  state: Arc<TakeUntilState<O, Err>>,
  _p: PhantomData<fn() -> Item>,
}

impl<NItem, Item, Err, O> Observer<NItem, Err> for NotifierObserver<O, Item, Err>
where
  O: Observer<Item, Err>,
  Err: Send,
{
  fn on_subscribe(&mut self, upstream: Upstream<NItem, Err>) {
    self.state.other.set_once(Box::new(upstream.disposable().clone()));
  }

  fn next(&mut self, _: NItem) {
    tracing::trace!(target: "rxcore::take_until", "notifier fired");
    self.state.dispose();
    self.state.serializer.complete::<Item>();
  }

  fn error(&mut self, err: Err) {
    self.state.main.dispose();
    self.state.other.weak_dispose();
    self.state.serializer.error::<Item>(err);
  }

  fn complete(&mut self) { self.state.other.weak_dispose(); }
}
