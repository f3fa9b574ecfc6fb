//! Device polling: registry, worker pool, fetcher and scheduler

pub mod fetcher;
pub mod registry;
pub mod scheduler;
pub mod worker_pool;

pub use fetcher::{parse_reading, DeviceFetcher, HttpFetcher};
pub use registry::{
    clamp_value, DeviceRegistry, DeviceSnapshot, ReadingOutcome, UpsertOutcome, VALUE_EPSILON,
};
pub use scheduler::{DeviceEvent, PollScheduler};
pub use worker_pool::{PoolStats, WorkerPool};
