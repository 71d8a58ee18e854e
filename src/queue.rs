//! Lock-free queues used between signal producers and drain loops.
//!
//! - [`SpscQueue`]: unbounded, linked fixed-size segments, one producer and
//!   one consumer, no per-item allocation.
//! - [`MpscQueue`]: unbounded, one node per item, any number of producers.
//! - [`Handoff`]: a one-value ownership transfer cell.
mod handoff;
mod mpsc;
mod spsc;

pub use handoff::Handoff;
pub use mpsc::{MpscQueue, MpscReceiver, MpscSender};
pub use spsc::{Consumer, Producer, SpscQueue};
