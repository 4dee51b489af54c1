//! Redis Streams job queue.
//!
//! Jobs are flat string maps (`guid`, `preset`, `source`, `destination`)
//! appended to one stream per job name under a namespace. Workers read them
//! through a consumer group, acknowledge on completion and re-claim entries
//! left pending by workers that died.

pub mod error;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::{Delivery, JobQueue, QueueConfig};
