//! Spans for coordinator requests and optimistic mutations.
//!
//! Both kinds declare `outcome`, `error` and `elapsed_ms` empty at creation;
//! [`SpanExt::record_result`] fills them once the operation settles.

use std::fmt::Display;
use std::time::Instant;

use tracing::field::{display, Empty};
use tracing::{info_span, Span};

pub trait SpanExt {
    fn record_result<T, E: Display>(&self, result: &Result<T, E>, started: Instant);
}

impl SpanExt for Span {
    fn record_result<T, E: Display>(&self, result: &Result<T, E>, started: Instant) {
        self.record("elapsed_ms", started.elapsed().as_millis() as u64);
        match result {
            Ok(_) => {
                self.record("outcome", "ok");
            }
            Err(e) => {
                self.record("outcome", "error");
                self.record("error", display(e));
            }
        }
    }
}

/// One `RequestCoordinator::request` call, keyed by its request key.
pub struct RequestSpan;

impl RequestSpan {
    pub fn new(endpoint: &str, key: &str) -> Span {
        info_span!(
            "request",
            endpoint = %endpoint,
            key = %key,
            outcome = Empty,
            error = Empty,
            elapsed_ms = Empty,
        )
    }
}

/// One optimistic update, from local apply to commit, queue or rollback.
pub struct MutationSpan;

impl MutationSpan {
    pub fn new(id: &str, entity: &str) -> Span {
        info_span!(
            "mutation",
            mutation_id = %id,
            entity = %entity,
            outcome = Empty,
            error = Empty,
            elapsed_ms = Empty,
        )
    }
}
