//! Candidate scoring.
//!
//! Four signals, each with its own confidence floor:
//!
//! | Signal | Confidence | Score |
//! |---|---|---|
//! | sequence | P(next = c \| current) | 2.0 x confidence |
//! | co-occurrence | share of co-accesses with c | 1.0 x confidence |
//! | time of day | share of this hour's accesses that were c | 0.5 x confidence |
//! | directory | 0.3 flat | 0.3 flat |
//!
//! Scores of signals agreeing on a candidate add up; the candidate's
//! confidence is the highest single-signal confidence. The `min_confidence`
//! floor applies to that confidence, never to the combined score.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::history::AccessContext;
use super::models::{Histogram, PatternModels};

const SEQUENCE_WEIGHT: f64 = 2.0;
const COOCCURRENCE_WEIGHT: f64 = 1.0;
const TEMPORAL_WEIGHT: f64 = 0.5;
const DIRECTORY_SCORE: f64 = 0.3;

/// The signal behind a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionReason {
    Sequence,
    CoOccurrence,
    TimeOfDay,
    Directory,
}

impl PredictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::CoOccurrence => "co_occurrence",
            Self::TimeOfDay => "time_of_day",
            Self::Directory => "directory",
        }
    }
}

impl fmt::Display for PredictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub resource_id: String,
    /// Highest single-signal confidence, in `0..=1`.
    pub confidence: f64,
    /// Signal contributing the largest share of `score`.
    pub reason: PredictionReason,
    /// Sum of weighted signal contributions.
    pub score: f64,
}

/// Per-signal confidence floors. A signal below its floor contributes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalThresholds {
    pub sequence: f64,
    pub cooccurrence: f64,
    pub temporal: f64,
    pub directory: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self { sequence: 0.1, cooccurrence: 0.1, temporal: 0.05, directory: 0.0 }
    }
}

/// Ranking parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictParams {
    pub min_confidence: f64,
    pub max_predictions: usize,
    pub thresholds: SignalThresholds,
}

struct Candidate {
    confidence: f64,
    score: f64,
    reason: PredictionReason,
    best_contribution: f64,
}

#[derive(Default)]
struct Ranker {
    candidates: HashMap<String, Candidate>,
}

impl Ranker {
    fn add(&mut self, id: &str, confidence: f64, score: f64, reason: PredictionReason) {
        match self.candidates.get_mut(id) {
            Some(c) => {
                c.score += score;
                c.confidence = c.confidence.max(confidence);
                if score > c.best_contribution {
                    c.best_contribution = score;
                    c.reason = reason;
                }
            }
            None => {
                self.candidates.insert(
                    id.to_string(),
                    Candidate { confidence, score, reason, best_contribution: score },
                );
            }
        }
    }

    /// Add every entry of `hist` except `exclude`, normalised over what remains.
    fn add_histogram(
        &mut self,
        hist: &Histogram,
        exclude: &str,
        floor: f64,
        weight: f64,
        reason: PredictionReason,
    ) {
        let total = hist.total().saturating_sub(hist.count(exclude));
        if total == 0 {
            return;
        }
        for (id, count) in hist.iter() {
            if id == exclude {
                continue;
            }
            let confidence = f64::from(count) / f64::from(total);
            if confidence >= floor {
                self.add(id, confidence, confidence * weight, reason);
            }
        }
    }

    fn finish(self, params: &PredictParams) -> Vec<Prediction> {
        let mut out: Vec<Prediction> = self
            .candidates
            .into_iter()
            .filter(|(_, c)| c.confidence >= params.min_confidence)
            .map(|(resource_id, c)| Prediction {
                resource_id,
                confidence: c.confidence,
                reason: c.reason,
                score: c.score,
            })
            .collect();
        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        out.truncate(params.max_predictions);
        out
    }
}

/// Rank what is likely to be accessed after `resource_id`.
///
/// Pure over the current model state. `hour` is the local hour used for the
/// time-of-day signal.
pub fn predict(
    models: &PatternModels,
    resource_id: &str,
    context: &AccessContext,
    hour: u8,
    params: &PredictParams,
) -> Vec<Prediction> {
    let th = &params.thresholds;
    let mut ranker = Ranker::default();

    if let Some(next) = models.successors(resource_id) {
        ranker.add_histogram(next, resource_id, th.sequence, SEQUENCE_WEIGHT, PredictionReason::Sequence);
    }
    if let Some(near) = models.co_occurring(resource_id) {
        ranker.add_histogram(
            near,
            resource_id,
            th.cooccurrence,
            COOCCURRENCE_WEIGHT,
            PredictionReason::CoOccurrence,
        );
    }
    if let Some(same_hour) = models.hour(hour) {
        ranker.add_histogram(same_hour, resource_id, th.temporal, TEMPORAL_WEIGHT, PredictionReason::TimeOfDay);
    }
    if DIRECTORY_SCORE >= th.directory {
        let members = context.directory.as_deref().and_then(|dir| models.directory(dir));
        for (id, _) in members.into_iter().flat_map(Histogram::iter) {
            if id != resource_id {
                ranker.add(id, DIRECTORY_SCORE, DIRECTORY_SCORE, PredictionReason::Directory);
            }
        }
    }

    ranker.finish(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefetch::history::AccessEvent;
    use chrono::Utc;

    fn events(ids: &[&str], hour: u8, dir: Option<&str>) -> Vec<AccessEvent> {
        ids.iter()
            .map(|id| AccessEvent {
                resource_id: id.to_string(),
                timestamp: Utc::now(),
                hour,
                day_of_week: 0,
                context_directory: dir.map(String::from),
            })
            .collect()
    }

    fn params(min_confidence: f64) -> PredictParams {
        PredictParams { min_confidence, max_predictions: 10, thresholds: SignalThresholds::default() }
    }

    #[test]
    fn frequent_successor_ranks_first() {
        let history = events(
            &["note:1", "note:2", "note:1", "note:2", "note:1", "note:2", "note:1", "note:3"],
            9,
            None,
        );
        let models = PatternModels::rebuild(5, &history);
        let ranked = predict(&models, "note:1", &AccessContext::default(), 9, &params(0.0));

        let pos = |id: &str| ranked.iter().position(|p| p.resource_id == id);
        assert_eq!(ranked[0].resource_id, "note:2");
        assert_eq!(ranked[0].reason, PredictionReason::Sequence);
        assert!(pos("note:2") < pos("note:3"));
        assert!(pos("note:3").is_some());
    }

    #[test]
    fn confidence_floor_is_respected() {
        let history = events(&["a", "b", "a", "c", "a", "d", "a", "e"], 9, None);
        let models = PatternModels::rebuild(5, &history);
        for floor in [0.0, 0.2, 0.3, 0.5, 0.9] {
            for p in predict(&models, "a", &AccessContext::default(), 9, &params(floor)) {
                assert!(p.confidence >= floor, "{} below floor {}", p.confidence, floor);
            }
        }
    }

    #[test]
    fn directory_signal_is_flat() {
        let history = events(&["x", "y"], 3, Some("projects"));
        let models = PatternModels::rebuild(5, &history);
        let ranked = predict(&models, "z", &AccessContext::in_directory("projects"), 20, &params(0.0));

        assert_eq!(ranked.len(), 2);
        for p in &ranked {
            assert_eq!(p.reason, PredictionReason::Directory);
            assert!((p.score - DIRECTORY_SCORE).abs() < f64::EPSILON);
            assert!((p.confidence - DIRECTORY_SCORE).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn agreeing_signals_sum_scores() {
        let history = events(&["a", "b"], 9, None);
        let models = PatternModels::rebuild(5, &history);
        let ranked = predict(&models, "a", &AccessContext::default(), 9, &params(0.0));

        // sequence 1.0 x 2 + co-occurrence 1.0 x 1 + time of day 1.0 x 0.5
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].score - 3.5).abs() < 1e-9);
        assert!((ranked[0].confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn truncates_to_max_predictions() {
        let history = events(&["a", "b", "a", "c", "a", "d"], 9, None);
        let models = PatternModels::rebuild(5, &history);
        let limited = PredictParams { max_predictions: 2, ..params(0.0) };
        assert_eq!(predict(&models, "a", &AccessContext::default(), 9, &limited).len(), 2);
    }
}
