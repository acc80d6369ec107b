//! Source classification, fetching and coalesced loading.

pub mod coordinator;
pub mod pool;
pub mod source;

pub use coordinator::{
    LoadCoordinator, LoadFailure, LoadHandle, LoadRequest, LoadResult, PendingLoad,
};
pub use pool::{system_worker_count, worker_count};
pub use source::{ByteFetcher, ContentKey, DefaultFetcher, MovieSource};
