//! Background job execution for the pipeline stages.
//!
//! - `job`: job kinds and the dispatcher seam stages enqueue through
//! - `pool`: channel-backed queue and the bounded worker pool
//! - `recovery`: startup re-dispatch and the stuck-message sweep

pub mod job;
pub mod pool;
pub mod recovery;

pub use job::{Job, JobDispatcher, JobKind};
pub use pool::{JobQueue, PoolConfig, WorkerPool};
pub use recovery::{recover_pending, spawn_stuck_sweep, sweep_stuck};
