//! The drain loop: many producers, one active consumer, no lock held while
//! emitting.
//!
//! Every producer registers its work with [`Drain::enter`] after depositing
//! it (in a queue, a flag, ...). The producer that moves the work counter
//! off zero receives a [`DrainTicket`] and runs the body; everyone else
//! returns at once and the ticket holder is guaranteed to run the body again
//! after their deposit. The state `T` is only reachable from inside the body,
//! so the single drainer can use it without synchronization.
use std::{
  cell::UnsafeCell,
  fmt,
  sync::atomic::{AtomicUsize, Ordering},
};

pub struct Drain<T> {
  wip: AtomicUsize,
  state: UnsafeCell<T>,
}

// SAFETY: `state` is only accessed by the ticket holder, and there is at most
// one at any time.
unsafe impl<T: Send> Send for Drain<T> {}
unsafe impl<T: Send> Sync for Drain<T> {}

/// Proof that the holder is the one thread allowed to run a drain body.
///
/// A ticket can be moved to another thread (for example into a scheduled
/// task) and must eventually be passed to [`Drain::run`].
#[must_use = "a ticket that is never run leaves the drain stuck"]
pub struct DrainTicket {
  owner: usize,
  missed: usize,
}

impl<T> Drain<T> {
  pub fn new(state: T) -> Self { Self { wip: AtomicUsize::new(0), state: UnsafeCell::new(state) } }

  /// Registers one unit of work; returns a ticket if the caller has to drain.
  #[inline]
  pub fn enter(&self) -> Option<DrainTicket> {
    if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
      Some(self.ticket(1))
    } else {
      None
    }
  }

  /// Becomes the drainer only if nobody is, without registering work
  /// otherwise.
  #[inline]
  pub fn try_acquire(&self) -> Option<DrainTicket> {
    self.wip.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire).ok().map(|_| self.ticket(1))
  }

  /// Runs `body` until no work registered while it was running is left.
  pub fn run(&self, ticket: DrainTicket, mut body: impl FnMut(&mut T)) {
    self.check(&ticket);
    let mut missed = ticket.missed;
    loop {
      // SAFETY: the ticket makes us the only drainer.
      body(unsafe { &mut *self.state.get() });
      missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
      if missed == 0 {
        break;
      }
    }
  }

  /// `enter` followed by `run`.
  #[inline]
  pub fn drain(&self, body: impl FnMut(&mut T)) {
    if let Some(ticket) = self.enter() {
      self.run(ticket, body);
    }
  }

  /// Runs `f` once if the drain is idle.
  ///
  /// Returns `None` when another thread is draining. Otherwise returns the
  /// result of `f` and, if work was registered meanwhile, the ticket that now
  /// has to be run.
  pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<(R, Option<DrainTicket>)> {
    let ticket = self.try_acquire()?;
    // SAFETY: the ticket makes us the only drainer.
    let r = f(unsafe { &mut *self.state.get() });
    Some((r, self.release(ticket)))
  }

  /// Fast path for a producer that holds a single value: if the drain is
  /// idle, `emit` runs directly on the state and no queue is touched. If work
  /// arrived while emitting, `body` drains it before returning.
  ///
  /// When another thread is draining, the value is handed back; the caller
  /// queues it and calls [`drain`](Self::drain).
  pub fn try_emit<V>(
    &self, value: V, emit: impl FnOnce(&mut T, V), body: impl FnMut(&mut T),
  ) -> Result<(), V> {
    let Some(ticket) = self.try_acquire() else { return Err(value) };
    // SAFETY: the ticket makes us the only drainer.
    emit(unsafe { &mut *self.state.get() }, value);
    if let Some(rest) = self.release(ticket) {
      self.run(rest, body);
    }
    Ok(())
  }

  pub fn is_idle(&self) -> bool { self.wip.load(Ordering::Acquire) == 0 }

  pub fn get_mut(&mut self) -> &mut T { self.state.get_mut() }

  pub fn into_inner(self) -> T { self.state.into_inner() }

  fn release(&self, ticket: DrainTicket) -> Option<DrainTicket> {
    self.check(&ticket);
    let left = self.wip.fetch_sub(ticket.missed, Ordering::AcqRel) - ticket.missed;
    (left != 0).then(|| self.ticket(left))
  }

  #[inline]
  fn ticket(&self, missed: usize) -> DrainTicket { DrainTicket { owner: self.id(), missed } }

  #[inline]
  fn id(&self) -> usize { self as *const Self as *const () as usize }

  #[inline]
  fn check(&self, ticket: &DrainTicket) {
    assert_eq!(ticket.owner, self.id(), "drain ticket presented to a different drain");
  }
}

impl<T> fmt::Debug for Drain<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Drain").field("wip", &self.wip.load(Ordering::Relaxed)).finish()
  }
}

impl fmt::Debug for DrainTicket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DrainTicket").field("missed", &self.missed).finish()
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{atomic::AtomicBool, Arc},
    thread,
  };

  use super::*;
  use crate::queue::{MpscQueue, MpscReceiver};

  struct Sink {
    rx: MpscReceiver<(usize, usize)>,
    last: Vec<Option<usize>>,
    received: usize,
    inside: Arc<AtomicBool>,
  }

  impl Sink {
    fn pump(&mut self) {
      assert!(!self.inside.swap(true, Ordering::SeqCst), "two drainers at once");
      while let Some((p, i)) = self.rx.poll() {
        assert!(self.last[p].map_or(true, |l| l < i));
        self.last[p] = Some(i);
        self.received += 1;
      }
      self.inside.store(false, Ordering::SeqCst);
    }
  }

  #[rxcore_macro::test]
  fn concurrent_producers_single_drainer() {
    const PRODUCERS: usize = 8;
    const PER: usize = 1000;
    let (tx, rx) = MpscQueue::new();
    let inside = Arc::new(AtomicBool::new(false));
    let drain = Arc::new(Drain::new(Sink {
      rx,
      last: vec![None; PRODUCERS],
      received: 0,
      inside: inside.clone(),
    }));

    let handles: Vec<_> = (0..PRODUCERS)
      .map(|p| {
        let (tx, drain) = (tx.clone(), drain.clone());
        thread::spawn(move || {
          for i in 0..PER {
            tx.push((p, i));
            drain.drain(Sink::pump);
          }
        })
      })
      .collect();
    handles.into_iter().for_each(|h| h.join().unwrap());

    assert!(drain.is_idle());
    let sink = Arc::try_unwrap(drain).ok().unwrap().into_inner();
    assert_eq!(sink.received, PRODUCERS * PER);
  }

  #[rxcore_macro::test]
  fn reentrant_drain_is_trampolined() {
    let drain = Arc::new(Drain::new(Vec::new()));
    let inner = drain.clone();
    let mut depth = 0;
    drain.drain(|log: &mut Vec<usize>| {
      depth += 1;
      log.push(depth);
      if depth < 3 {
        // Registers work instead of recursing.
        inner.drain(|_| unreachable!());
      }
    });
    drop(inner);
    assert_eq!(Arc::try_unwrap(drain).ok().unwrap().into_inner(), vec![1, 2, 3]);
  }

  #[rxcore_macro::test]
  fn try_emit_hands_value_back_when_busy() {
    let drain = Drain::new(0);
    let ticket = drain.enter().unwrap();
    assert_eq!(drain.try_emit(5, |s, v| *s += v, |_| {}), Err(5));
    drain.run(ticket, |s| *s += 1);
    assert!(drain.try_emit(5, |s, v| *s += v, |_| {}).is_ok());
    assert_eq!(drain.into_inner(), 6);
  }

  #[rxcore_macro::test]
  fn try_with_returns_pending_ticket() {
    let drain = Drain::new(0);
    let (r, rest) = drain.try_with(|s| {
      *s += 1;
      assert!(drain.enter().is_none());
      *s
    })
    .unwrap();
    assert_eq!(r, 1);
    drain.run(rest.unwrap(), |s| *s += 10);
    assert!(drain.is_idle());
    assert!(drain.try_with(|_| ()).is_some());
  }

  #[rxcore_macro::test]
  fn ticket_moves_across_threads() {
    let drain = Arc::new(Drain::new(0usize));
    let ticket = drain.enter().unwrap();
    let remote = drain.clone();
    thread::spawn(move || remote.run(ticket, |s| *s += 1)).join().unwrap();
    assert!(drain.is_idle());
  }

  #[rxcore_macro::test]
  #[should_panic(expected = "different drain")]
  fn foreign_ticket_panics() {
    let a = Drain::new(());
    let b = Drain::new(());
    let ticket = a.enter().unwrap();
    b.run(ticket, |_| {});
  }
}
