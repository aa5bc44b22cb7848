// Copyright 2024-2026 Presage Contributors
// SPDX-License-Identifier: Apache-2.0

//! `simulate`: drive a core against an in-memory backend and print its
//! statistics.
//!
//! The run walks a repeating note navigation pattern so the prefetcher has
//! something to learn, edits notes optimistically, and drops connectivity for
//! part of the run so edits queue and replay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::CoreConfig;
use crate::coordinator::RequestOptions;
use crate::health::HealthReport;
use crate::mutation::{MutationRequest, ProceedOnConflict, RemoteEffect};
use crate::prefetch::AccessContext;
use crate::transport::{Transport, TransportError};
use crate::{Core, CoreStats};

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Passes over the navigation pattern.
    pub rounds: usize,
    /// Simulated server latency per call.
    pub latency: Duration,
    /// Every n-th edit is rejected by the server. 0 disables failures.
    pub fail_every: usize,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self { rounds: 20, latency: Duration::from_millis(2), fail_every: 0 }
    }
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub rounds: usize,
    pub reads: usize,
    pub edits: usize,
    pub rejected_edits: usize,
    pub stats: CoreStats,
    pub health: HealthReport,
}

/// A note server that lives in memory.
#[derive(Default)]
struct NoteServer {
    notes: Mutex<HashMap<String, Value>>,
    writes: Mutex<usize>,
    latency: Duration,
    fail_every: usize,
}

#[async_trait::async_trait]
impl Transport for NoteServer {
    async fn call(&self, endpoint: &str, params: &Value) -> Result<Value, TransportError> {
        tokio::time::sleep(self.latency).await;
        let id = params["id"].as_str().unwrap_or_default().to_string();
        match endpoint {
            "GET /notes" => Ok(self
                .notes
                .lock()
                .get(&id)
                .cloned()
                .unwrap_or_else(|| json!({ "id": id, "title": format!("Note {id}") }))),
            "PUT /notes" => {
                let write = {
                    let mut writes = self.writes.lock();
                    *writes += 1;
                    *writes
                };
                if self.fail_every > 0 && write % self.fail_every == 0 {
                    return Err(TransportError::Rejected {
                        endpoint: endpoint.to_string(),
                        message: "version conflict".to_string(),
                    });
                }
                self.notes.lock().insert(id, params.clone());
                Ok(json!({ "ok": true }))
            }
            other => Err(TransportError::Rejected {
                endpoint: other.to_string(),
                message: "unknown endpoint".to_string(),
            }),
        }
    }
}

fn resolve_note(resource_id: &str) -> Option<(String, Value)> {
    resource_id
        .strip_prefix("note:")
        .map(|id| ("GET /notes".to_string(), json!({ "id": id })))
}

/// Run the simulation and return its report.
pub async fn simulate(mut config: CoreConfig, options: SimulateOptions) -> SimulationReport {
    // Keep failing edits from stalling the run.
    config.mutation.retry_delay = config.mutation.retry_delay.min(Duration::from_millis(10));
    config.mutation.max_retries = config.mutation.max_retries.min(1);

    let server = Arc::new(NoteServer {
        latency: options.latency,
        fail_every: options.fail_every,
        ..NoteServer::default()
    });
    let core = Core::builder(server, Arc::new(ProceedOnConflict))
        .config(config)
        .resolver(Arc::new(resolve_note))
        .build();
    if let Err(e) = core.start().await {
        tracing::warn!(error = %e, "start reported an error");
    }

    let pattern = ["note:1", "note:2", "note:3", "note:1", "note:4"];
    let context = AccessContext::in_directory("inbox");
    let local: Arc<Mutex<HashMap<String, String>>> = Arc::default();
    let (mut reads, mut edits, mut rejected) = (0, 0, 0);

    for round in 0..options.rounds {
        // Offline for the middle third of the run.
        let offline = round >= options.rounds / 3 && round < 2 * options.rounds / 3;
        core.connectivity().set_online(!offline);

        for resource in pattern {
            core.prefetcher().on_access(resource, &context);
            if !offline {
                if let Some((endpoint, params)) = resolve_note(resource) {
                    reads += 1;
                    let _ = core
                        .coordinator()
                        .request(&endpoint, params, RequestOptions::default())
                        .await;
                }
            }
        }

        let id = pattern[round % pattern.len()].trim_start_matches("note:").to_string();
        let title = format!("edit {round}");
        let (apply_state, rollback_state, snapshot_state) = (local.clone(), local.clone(), local.clone());
        let (apply_id, rollback_id, snapshot_id) = (id.clone(), id.clone(), id.clone());
        let applied_title = title.clone();
        let request = MutationRequest::new(
            format!("note:{id}"),
            move || {
                apply_state.lock().insert(apply_id.clone(), applied_title.clone());
            },
            RemoteEffect::request("PUT /notes", json!({ "id": id, "title": title })),
        )
        .with_snapshot(move || json!(snapshot_state.lock().get(&snapshot_id).cloned()))
        .with_rollback(move |snapshot| {
            let mut state = rollback_state.lock();
            match snapshot.as_str() {
                Some(previous) => state.insert(rollback_id.clone(), previous.to_string()),
                None => state.remove(&rollback_id),
            };
        });
        edits += 1;
        if core.mutations().update(request).await.is_err() {
            rejected += 1;
        }
    }

    core.connectivity().set_online(true);
    // The watcher replays the queue; wait for it briefly.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while core.mutations().offline_queue_len() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let report = SimulationReport {
        rounds: options.rounds,
        reads,
        edits,
        rejected_edits: rejected,
        stats: core.stats(),
        health: core.health(),
    };
    core.shutdown(Duration::from_secs(5)).await;
    report
}

/// Parse `--rounds N`, `--latency-ms N`, `--fail-every N`.
pub fn parse_options(args: &[String]) -> Result<SimulateOptions, String> {
    let mut options = SimulateOptions::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value = |name: &str| -> Result<u64, String> {
            iter.next()
                .ok_or_else(|| format!("{name} needs a value"))?
                .parse()
                .map_err(|_| format!("{name} expects a number"))
        };
        match flag.as_str() {
            "--rounds" => options.rounds = value("--rounds")? as usize,
            "--latency-ms" => options.latency = Duration::from_millis(value("--latency-ms")?),
            "--fail-every" => options.fail_every = value("--fail-every")? as usize,
            other => return Err(format!("unknown option: {other}")),
        }
    }
    Ok(options)
}

pub async fn run_simulate(config: CoreConfig, args: &[String]) -> i32 {
    let options = match parse_options(args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            return 2;
        }
    };
    let report = simulate(config, options).await;
    match serde_json::to_string_pretty(&report) {
        Ok(text) => {
            println!("{text}");
            0
        }
        Err(e) => {
            eprintln!("failed to render report: {e}");
            1
        }
    }
}
