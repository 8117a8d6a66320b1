//! Worker runtime for discrete-event network simulations.
//!
//! A simulation advances in synchronous rounds. Within a round, every host can
//! process its pending events independently of all other hosts, so the
//! simulator runs hosts on a pool of worker threads in parallel. A typical
//! thread pool that creates one task per host is far too slow for this
//! workload, and most pools also can't control which task runs on which CPU
//! core, which matters on NUMA machines. The pool in this crate instead runs a
//! single task function on every worker thread simultaneously, and multiplexes
//! the worker threads over a fixed set of logical processors that can be
//! pinned to OS processors.
//!
//! The main pieces:
//!
//! - [`WorkerPool`](crate::core::worker_pool::WorkerPool) owns the worker
//!   threads and the logical processors, and dispatches one task per round to
//!   all workers.
//! - [`LogicalProcessors`](crate::core::logical_processor::LogicalProcessors)
//!   tracks which workers are ready to run on which processor, and lets an
//!   idle processor steal workers from a busy one.
//! - [`Worker`](crate::core::worker::Worker) is the thread-local context that
//!   event handlers use to read the clock, schedule tasks, send packets
//!   through the network, and count objects and syscalls.
//! - [`Manager`](crate::core::manager::Manager) owns the cross-worker
//!   collaborators (DNS, routing, per-host event queues) and installs the
//!   state that workers read.
//!
//! The pool uses a "scoped" design so that a task closure can borrow data from
//! the coordinator's stack without locking or `unsafe` in the calling code.
//! Unsafe code should stay isolated to the pool internals; everything layered
//! on top of the pool is written in safe code only.
//!
//! If the pool uses CPU pinning, a task can get the processor it's pinned to
//! using [`core_affinity`](crate::core::worker_pool::core_affinity).

// https://github.com/rust-lang/rfcs/blob/master/text/2585-unsafe-block-in-unsafe-fn.md
#![deny(unsafe_op_in_unsafe_fn)]

pub mod core;
pub mod host;
pub mod network;
pub mod utility;
