//! Job contracts shared by single and batch analysis
//!
//! One [`JobStatus`] shape serves both job kinds; the payload is the
//! [`JobResult`] enum, disambiguated by the job's [`JobKind`].

use averion_common::ModelType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Single image or multi-image batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Single,
    Batch,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Single => f.write_str("single"),
            JobKind::Batch => f.write_str("batch"),
        }
    }
}

/// Identifies one backend analysis job
///
/// Immutable once created; one handle drives exactly one polling session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobHandle {
    job_id: String,
    kind: JobKind,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
        }
    }

    pub fn single(job_id: impl Into<String>) -> Self {
        Self::new(job_id, JobKind::Single)
    }

    pub fn batch(job_id: impl Into<String>) -> Self {
        Self::new(job_id, JobKind::Batch)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.job_id)
    }
}

/// Backend job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// One status snapshot from the backend
///
/// `result` is present only when COMPLETED and `error_message` only when
/// FAILED; both are absent while the job is still running. The constructors
/// are the only way to build a status, so the combination cannot be violated.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    state: JobState,
    result: Option<JobResult>,
    error_message: Option<String>,
}

impl JobStatus {
    pub fn queued() -> Self {
        Self {
            state: JobState::Queued,
            result: None,
            error_message: None,
        }
    }

    pub fn processing() -> Self {
        Self {
            state: JobState::Processing,
            result: None,
            error_message: None,
        }
    }

    pub fn completed(result: JobResult) -> Self {
        Self {
            state: JobState::Completed,
            result: Some(result),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            result: None,
            error_message: Some(message.into()),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub(crate) fn into_parts(self) -> (JobState, Option<JobResult>, Option<String>) {
        (self.state, self.result, self.error_message)
    }
}

/// Terminal payload of a completed job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResult {
    Single(AnalysisResult),
    Batch(BatchResult),
}

impl JobResult {
    pub fn kind(&self) -> JobKind {
        match self {
            JobResult::Single(_) => JobKind::Single,
            JobResult::Batch(_) => JobKind::Batch,
        }
    }
}

/// Qualitative reading of a confidence percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Moderate,
    Low,
}

impl ConfidenceBand {
    /// ≥ 90 high, ≥ 70 moderate, otherwise low
    pub fn from_percent(confidence: f64) -> Self {
        if confidence >= 90.0 {
            ConfidenceBand::High
        } else if confidence >= 70.0 {
            ConfidenceBand::Moderate
        } else {
            ConfidenceBand::Low
        }
    }
}

/// Result of a single-image analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub prediction: String,
    /// Percentage in `[0, 100]`
    pub confidence: f64,
    pub model_type: ModelType,
    pub filename: String,
    pub credits_used: u64,
    pub recommendation: Option<String>,
}

impl AnalysisResult {
    pub fn confidence_band(&self) -> ConfidenceBand {
        ConfidenceBand::from_percent(self.confidence)
    }
}

/// Aggregate counts for a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_files: u32,
    pub successful_predictions: u32,
    pub failed_predictions: u32,
    pub average_confidence: f64,
    pub credits_consumed: u64,
    pub processing_time_seconds: f64,
}

/// Outcome for one file of a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileResult {
    /// Position of the file in the submitted batch
    pub file_index: usize,
    pub filename: String,
    pub success: bool,
    pub prediction: Option<String>,
    pub confidence: Option<f64>,
    pub recommendation: Option<String>,
    pub error_message: Option<String>,
}

/// Result of a batch analysis
///
/// `results` follows submission order; individual failures do not fail
/// the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub model_type: Option<ModelType>,
    pub summary: BatchSummary,
    pub results: Vec<FileResult>,
    pub credits_remaining: Option<u64>,
}

impl BatchResult {
    pub fn failed_files(&self) -> impl Iterator<Item = &FileResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Accepted upload, ready to be polled
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub handle: JobHandle,
    /// Balance reported by the backend at submit time (informational only)
    pub credits_remaining: Option<u64>,
    pub message: Option<String>,
}
