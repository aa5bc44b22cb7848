//! Telemetry: structured logging, span helpers and metric emission.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    record_batch_dispatch, record_cache_lookup, record_dedup_join, record_mutation,
    record_offline_queue_len, record_prefetch, record_queue_depth, record_queue_rejection,
    record_task_failure, record_task_retry, record_task_success, record_task_timeout,
    record_worker_recycled,
};
pub use spans::{MutationSpan, RequestSpan, SpanExt};
