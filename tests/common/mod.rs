//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use presage_core::transport::{Transport, TransportError};
use serde_json::{json, Value};

/// Transport that records every call and can fail chosen ids a set number
/// of times.
#[derive(Default)]
pub struct RecordingTransport {
    pub calls: Mutex<Vec<(String, Value)>>,
    pub batches: Mutex<Vec<usize>>,
    failures: Mutex<HashMap<String, u32>>,
    pub latency: Duration,
}

impl RecordingTransport {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency, ..Self::default() }
    }

    pub fn fail_next(&self, id: &str, times: u32) {
        self.failures.lock().insert(id.to_string(), times);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// `params["id"]` of every call to `endpoint`, in order.
    pub fn ids_for(&self, endpoint: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, p)| id_of(p))
            .collect()
    }

    fn should_fail(&self, id: &str) -> bool {
        let mut failures = self.failures.lock();
        match failures.get_mut(id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

pub fn id_of(params: &Value) -> String {
    match &params["id"] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn reply(endpoint: &str, params: &Value) -> Value {
    json!({ "endpoint": endpoint, "id": params["id"].clone() })
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn call(&self, endpoint: &str, params: &Value) -> Result<Value, TransportError> {
        self.calls.lock().push((endpoint.to_string(), params.clone()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.should_fail(&id_of(params)) {
            return Err(TransportError::Rejected {
                endpoint: endpoint.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(reply(endpoint, params))
    }

    async fn call_batch(&self, endpoint: &str, params: &[Value]) -> Result<Vec<Value>, TransportError> {
        self.batches.lock().push(params.len());
        {
            let mut calls = self.calls.lock();
            for p in params {
                calls.push((endpoint.to_string(), p.clone()));
            }
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(params.iter().map(|p| reply(endpoint, p)).collect())
    }
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
