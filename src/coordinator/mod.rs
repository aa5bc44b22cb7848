//! Request coordination.
//!
//! Every outbound call goes through [`RequestCoordinator::request`]: a live
//! cache entry answers immediately, an identical in-flight call is joined,
//! batchable calls are merged, and everything else becomes one scheduler task.

mod batch;
mod cache;
mod error;
mod executor;
mod key;
mod requests;
mod sweeper;

pub use batch::{BatchPolicy, DeclaredBatchPolicy};
pub use cache::{CacheEntry, ResponseCache};
pub use error::RequestError;
pub use executor::{TransportCall, TransportExecutor, TransportReply};
pub use key::{normalize, RequestKey};
pub use requests::{
    CoordinatorConfig, CoordinatorStats, RequestCoordinator, RequestCoordinatorBuilder,
    RequestOptions, TransportScheduler,
};
pub use sweeper::spawn_cache_sweeper;
