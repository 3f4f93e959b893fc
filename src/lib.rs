//! # radish
//!
//! Redis-coordinated job queue: work is ordered by a time-decayed priority
//! score, and jobs sharing an affinity key execute in strict FIFO order
//! even with many worker processes pulling from the same queues. All
//! cross-worker coordination happens through four atomic server-side
//! operations; there is no in-process shared mutable state used for
//! correctness.

pub mod backend;
pub mod config;
pub mod enqueue;
pub mod error;
pub mod handler;
pub mod keys;
pub mod memory;
pub mod model;
pub mod monitor;
pub mod redis;
pub mod telemetry;
pub mod worker;

pub use error::{Error, Result};
