//! Lock-free unbounded MPMC FIFO queue built from linked concurrent rings.
//!
//! Producers and consumers claim logical positions with a fetch-and-add
//! ticket on a ring's `tail`/`head` counter and settle each position with a
//! single 128-bit compare-and-swap on the cell's `(value, index)` pair. A
//! ring that fills (or that pathological contention makes unusable) is
//! *closed* and a fresh ring is linked behind it, so the queue grows
//! without ever blocking an operation. Any number of threads may enqueue
//! and dequeue concurrently; operations linearize.
//!
//! # Example
//!
//! ```
//! use lcrq_rs::{Config, Queue};
//!
//! let queue = Queue::new(Config::new(8, false));
//! queue.enqueue(7).unwrap();
//! queue.enqueue(11).unwrap();
//!
//! // Handles are cheap clones of the same queue.
//! let other = queue.clone();
//! assert_eq!(other.dequeue(), Some(7));
//! assert_eq!(queue.dequeue(), Some(11));
//! assert_eq!(queue.dequeue(), None);
//! ```
//!
//! # Values
//!
//! The queue carries bare `u64` values (or anything you can pack into one,
//! e.g. a pointer). The all-ones value is reserved as the internal empty
//! sentinel and rejected by [`Queue::enqueue`].
//!
//! # Platform notes
//!
//! The cell protocol requires a double-width (128-bit) compare-and-swap
//! (`cmpxchg16b` on x86_64, `casp`/LL-SC on aarch64), provided through
//! `portable_atomic`. Targets without one fall back to portable-atomic's
//! lock-based emulation, which keeps the queue correct but forfeits
//! lock-freedom.

mod cell;
mod config;
mod invariants;
mod queue;
mod ring;
mod stats;

#[cfg(feature = "hazard")]
pub mod hazard;

pub use config::{Config, COMPACT_CONFIG};
pub use queue::{EnqueueError, Queue, RESERVED_VALUE};
pub use stats::StatsSnapshot;
