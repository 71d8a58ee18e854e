use std::{marker::PhantomData, sync::Arc};

use crate::{
  disposable::{BooleanDisposable, Disposable},
  observable::Observable,
  observer::{Observer, Upstream},
};

/// Emits `value` and completes. Scalar.
pub fn of<Item, Err>(value: Item) -> Of<Item, Err> { Of { value, _p: PhantomData } }

/// Completes immediately. Scalar.
pub fn empty<Item, Err>() -> Empty<Item, Err> { Empty(PhantomData) }

/// Fails immediately with `err`.
pub fn throw<Item, Err>(err: Err) -> Throw<Item, Err> { Throw { err, _p: PhantomData } }

/// Never signals anything after `on_subscribe`.
pub fn never<Item, Err>() -> Never<Item, Err> { Never(PhantomData) }

pub struct Of<Item, Err> {
  value: Item,
  _p: PhantomData<fn() -> Err>,
}

pub struct Empty<Item, Err>(PhantomData<fn() -> (Item, Err)>);

pub struct Throw<Item, Err> {
  err: Err,
  _p: PhantomData<fn() -> Item>,
}

pub struct Never<Item, Err>(PhantomData<fn() -> (Item, Err)>);

impl<Item, Err> Observable for Of<Item, Err>
where
  Item: Send + 'static,
  Err: Send + 'static,
{
  type Item = Item;
  type Err = Err;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: Observer<Item, Err> + 'static,
  {
    let disposed = Arc::new(BooleanDisposable::new());
    observer.on_subscribe(Upstream::new(disposed.clone()));
    if !disposed.is_disposed() {
      observer.next(self.value);
      if !disposed.is_disposed() {
        observer.complete();
      }
    }
  }

  fn into_scalar(self) -> Result<Option<Item>, Self> { Ok(Some(self.value)) }
}

impl<Item, Err> Observable for Empty<Item, Err>
where
  Item: Send + 'static,
  Err: Send + 'static,
{
  type Item = Item;
  type Err = Err;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: Observer<Item, Err> + 'static,
  {
    let disposed = Arc::new(BooleanDisposable::new());
    observer.on_subscribe(Upstream::new(disposed.clone()));
    if !disposed.is_disposed() {
      observer.complete();
    }
  }

  fn into_scalar(self) -> Result<Option<Item>, Self> { Ok(None) }
}

impl<Item, Err> Observable for Throw<Item, Err>
where
  Item: Send + 'static,
  Err: Send + 'static,
{
  type Item = Item;
  type Err = Err;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: Observer<Item, Err> + 'static,
  {
    let disposed = Arc::new(BooleanDisposable::new());
    observer.on_subscribe(Upstream::new(disposed.clone()));
    if !disposed.is_disposed() {
      observer.error(self.err);
    }
  }
}

impl<Item, Err> Observable for Never<Item, Err>
where
  Item: Send + 'static,
  Err: Send + 'static,
{
  type Item = Item;
  type Err = Err;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: Observer<Item, Err> + 'static,
  {
    observer.on_subscribe(Upstream::new(Arc::new(BooleanDisposable::new())));
  }
}
