use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::SnapshotConfig;
use crate::error::SnapshotError;
use crate::rating::RatingResult;
use crate::types::{OptionId, SnapshotId, SubmissionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPoint {
    QuoteIssued,
    PolicyBound,
    RenewalOffered,
}

/// One value produced by the upstream extraction pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
}

impl ExtractedField {
    pub fn new(value: impl Into<Value>, confidence: f64) -> Self {
        ExtractedField { value: Some(value.into()), confidence: Some(confidence), source: None }
    }

    /// Absent, null and whitespace-only strings all count as missing.
    pub fn is_blank(&self) -> bool {
        match &self.value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        }
    }
}

pub type ExtractedValues = BTreeMap<String, ExtractedField>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Critical,
    Important,
    Optional,
}

/// Versioned field importance table. Its keys are the fields a complete
/// submission is expected to carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportanceWeights {
    pub version: String,
    pub weights: BTreeMap<String, Importance>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapCounts {
    pub critical: usize,
    pub important: usize,
    pub optional: usize,
}

impl GapCounts {
    fn bump(&mut self, importance: Importance) {
        match importance {
            Importance::Critical => self.critical += 1,
            Importance::Important => self.important += 1,
            Importance::Optional => self.optional += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.important + self.optional
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapSummary {
    pub expected: usize,
    pub missing_fields: Vec<String>,
    pub low_confidence_fields: Vec<String>,
    pub missing: GapCounts,
    pub low_confidence: GapCounts,
}

impl GapSummary {
    pub fn compute(extracted: &ExtractedValues, weights: &ImportanceWeights, threshold: f64) -> Self {
        let mut summary = GapSummary {
            expected: weights.weights.len(),
            missing_fields: Vec::new(),
            low_confidence_fields: Vec::new(),
            missing: GapCounts::default(),
            low_confidence: GapCounts::default(),
        };
        for (field, &importance) in &weights.weights {
            match extracted.get(field) {
                Some(found) if !found.is_blank() => {
                    if found.confidence.is_some_and(|c| c < threshold) {
                        summary.low_confidence_fields.push(field.clone());
                        summary.low_confidence.bump(importance);
                    }
                }
                _ => {
                    summary.missing_fields.push(field.clone());
                    summary.missing.bump(importance);
                }
            }
        }
        summary
    }

    pub fn has_critical_gaps(&self) -> bool {
        self.missing.critical > 0 || self.low_confidence.critical > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSubject {
    pub submission_id: SubmissionId,
    pub option_id: Option<OptionId>,
}

/// Frozen record of what was known at a decision. Owns deep copies of every
/// input so later edits upstream never leak in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub id: SnapshotId,
    pub decision_point: DecisionPoint,
    pub subject: SnapshotSubject,
    pub rating_result: RatingResult,
    pub extracted_values: ExtractedValues,
    pub importance_version: String,
    pub gap_summary: GapSummary,
    pub captured_at: DateTime<Utc>,
}

/// Where captured snapshots are written.
pub trait SnapshotSink: Send + Sync {
    fn store(&self, snapshot: &DecisionSnapshot) -> Result<(), SnapshotError>;
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<Vec<DecisionSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<DecisionSnapshot> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn for_submission(&self, submission_id: SubmissionId) -> Vec<DecisionSnapshot> {
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots.iter().filter(|s| s.subject.submission_id == submission_id).cloned().collect()
    }
}

impl SnapshotSink for InMemorySnapshotStore {
    fn store(&self, snapshot: &DecisionSnapshot) -> Result<(), SnapshotError> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner).push(snapshot.clone());
        Ok(())
    }
}

/// A capture that failed on the workflow path. Recorded instead of raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureWarning {
    pub decision_point: DecisionPoint,
    pub subject: SnapshotSubject,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Captured(DecisionSnapshot),
    Failed(CaptureWarning),
}

impl CaptureOutcome {
    pub fn snapshot(&self) -> Option<&DecisionSnapshot> {
        match self {
            CaptureOutcome::Captured(snapshot) => Some(snapshot),
            CaptureOutcome::Failed(_) => None,
        }
    }
}

pub struct SnapshotCapturer {
    sink: Arc<dyn SnapshotSink>,
    low_confidence_threshold: f64,
    next_id: AtomicU64,
    warnings: Mutex<Vec<CaptureWarning>>,
}

impl SnapshotCapturer {
    pub fn new(config: &SnapshotConfig, sink: Arc<dyn SnapshotSink>) -> Self {
        SnapshotCapturer {
            sink,
            low_confidence_threshold: config.low_confidence_threshold,
            next_id: AtomicU64::new(1),
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Build and store a snapshot. Fails if the inputs cannot form a
    /// coherent record or the sink rejects it.
    pub fn capture(
        &self,
        point: DecisionPoint,
        subject: SnapshotSubject,
        rating: &RatingResult,
        extracted: &ExtractedValues,
        weights: &ImportanceWeights,
    ) -> Result<DecisionSnapshot, SnapshotError> {
        let failed = |reason: String| SnapshotError::SnapshotCaptureFailed { reason };
        if weights.version.trim().is_empty() {
            return Err(failed("importance weights carry no version".to_string()));
        }
        if let Some((field, _)) =
            extracted.iter().find(|(_, f)| f.confidence.is_some_and(|c| !(0.0..=1.0).contains(&c)))
        {
            return Err(failed(format!("confidence for {field:?} is outside [0, 1]")));
        }

        let snapshot = DecisionSnapshot {
            id: SnapshotId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            decision_point: point,
            subject,
            rating_result: rating.clone(),
            extracted_values: extracted.clone(),
            importance_version: weights.version.clone(),
            gap_summary: GapSummary::compute(extracted, weights, self.low_confidence_threshold),
            captured_at: Utc::now(),
        };
        self.sink.store(&snapshot)?;
        info!(
            snapshot = snapshot.id.0,
            point = ?point,
            submission = subject.submission_id.0,
            missing = snapshot.gap_summary.missing.total(),
            "captured decision snapshot"
        );
        Ok(snapshot)
    }

    /// Workflow form of `capture`. Never fails: an error is logged and kept
    /// as a warning so the triggering action can go ahead.
    pub fn record(
        &self,
        point: DecisionPoint,
        subject: SnapshotSubject,
        rating: &RatingResult,
        extracted: &ExtractedValues,
        weights: &ImportanceWeights,
    ) -> CaptureOutcome {
        match self.capture(point, subject, rating, extracted, weights) {
            Ok(snapshot) => CaptureOutcome::Captured(snapshot),
            Err(err) => {
                warn!(point = ?point, submission = subject.submission_id.0, error = %err, "decision snapshot not captured");
                let warning = CaptureWarning { decision_point: point, subject, reason: err.to_string(), at: Utc::now() };
                self.warnings.lock().unwrap_or_else(PoisonError::into_inner).push(warning.clone());
                CaptureOutcome::Failed(warning)
            }
        }
    }

    pub fn warnings(&self) -> Vec<CaptureWarning> {
        self.warnings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Hand the recorded warnings to the caller and clear the buffer.
    pub fn take_warnings(&self) -> Vec<CaptureWarning> {
        std::mem::take(&mut *self.warnings.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
