//! A family of concurrent multi-producer / multi-consumer FIFO queues of
//! 64-bit data, built around one shared single-tail append protocol and two
//! interchangeable dequeue engines.
//!
//! [`LlRcuQueue`] walks a shared linked list under a grace-period-managed
//! head gate: lock-free, not wait-free, any number of consumers may claim
//! from the same live prefix concurrently. [`DetachQueue`] instead detaches
//! a whole prefix of the shared list into a private per-consumer list in
//! one pair of atomic exchanges, then pops from that list wait-free; it
//! gives up FIFO ordering across consumers in exchange for never retrying.
//!
//! Both engines share the same producer-side contract: `enqueue` always
//! succeeds barring allocator exhaustion, is never blocking, and never
//! reorders two enqueues made by the same producer thread. Neither engine
//! makes any ordering promise across *different* producers beyond "some
//! total order consistent with the order their tail exchanges landed in".
//!
//! ```
//! use scalable_queue::{DetachQueue, QueueConfig, LlRcuQueue};
//!
//! let q = DetachQueue::<u64>::init().unwrap();
//! q.enqueue(1).unwrap();
//! q.enqueue(2).unwrap();
//! assert_eq!(q.dequeue(), Some(1));
//! assert_eq!(q.dequeue(), Some(2));
//! assert_eq!(q.dequeue(), None);
//!
//! let rcu = LlRcuQueue::<u64>::with_config(QueueConfig::without_slab()).unwrap();
//! rcu.enqueue(7).unwrap();
//! assert_eq!(rcu.dequeue(), Some(7));
//! ```

mod atomics;
mod config;
mod detach;
mod error;
mod gate;
mod head_version;
mod list;
mod node;
mod queue;
mod rcu;
#[cfg(feature = "slab")]
mod slab;
mod tls;

pub use config::{QueueConfig, SlabConfig};
pub use error::QueueError;
pub use queue::{DetachQueue, LlRcuQueue, Payload};
