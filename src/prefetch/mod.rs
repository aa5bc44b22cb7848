//! Predictive prefetching.
//!
//! Access events feed a bounded history and three incrementally updated
//! pattern models (sequence, time of day, co-occurrence) plus a directory
//! index. Predictions drawn from them are fetched at low priority through the
//! request coordinator so the cache is warm before the user asks.

mod history;
mod models;
mod predictor;
mod prefetcher;

pub use history::{AccessContext, AccessEvent, AccessHistory};
pub use models::{Histogram, PatternModels};
pub use predictor::{predict, PredictParams, Prediction, PredictionReason, SignalThresholds};
pub use prefetcher::{
    PredictivePrefetcher, PredictivePrefetcherBuilder, PrefetchConfig, PrefetchStats,
    ResourceResolver,
};
