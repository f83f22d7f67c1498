//! Backend JSON shapes and their mapping onto the shared job contracts
//!
//! The backend has not been consistent about field names over time, so the
//! wire structs accept every variant seen in practice and normalize here.

use crate::error::{ApiError, ApiResult};
use crate::types::{
    AnalysisResult, BatchResult, BatchSummary, FileResult, JobResult, JobState, JobStatus,
};
use averion_common::{ModelType, UserProfile};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Keys under which a newly created prediction id has been returned
const PREDICTION_ID_KEYS: [&str; 7] = [
    "prediction_id",
    "id",
    "predictionId",
    "job_id",
    "jobId",
    "task_id",
    "taskId",
];

const BATCH_ID_KEYS: [&str; 3] = ["batch_id", "batchId", "id"];

/// Find the first usable job id in an upload response
pub(crate) fn extract_job_id(body: &Value, keys: &[&str]) -> ApiResult<String> {
    keys.iter()
        .filter_map(|key| body.get(*key))
        .find_map(|value| match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|id| !id.is_empty() && id != "undefined" && id != "null")
        .ok_or_else(|| ApiError::Parse("server response missing job id".to_string()))
}

pub(crate) fn extract_prediction_id(body: &Value) -> ApiResult<String> {
    extract_job_id(body, &PREDICTION_ID_KEYS)
}

pub(crate) fn extract_batch_id(body: &Value) -> ApiResult<String> {
    extract_job_id(body, &BATCH_ID_KEYS)
}

/// Credit balance echoed by an upload response
pub(crate) fn extract_credits_remaining(body: &Value) -> Option<u64> {
    ["credits_remaining", "remaining_credits"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_u64))
}

pub(crate) fn extract_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Map a backend status string onto [`JobState`]
///
/// `partial` is a completed batch with some per-file failures.
pub(crate) fn parse_state(raw: &str) -> Option<JobState> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "queued" | "pending" | "submitted" => Some(JobState::Queued),
        "processing" | "running" | "in_progress" | "started" => Some(JobState::Processing),
        "completed" | "complete" | "success" | "succeeded" | "done" | "partial" => {
            Some(JobState::Completed)
        }
        "failed" | "error" | "cancelled" => Some(JobState::Failed),
        _ => None,
    }
}

fn state_or_processing(raw: Option<&str>) -> JobState {
    match raw {
        Some(s) => parse_state(s).unwrap_or_else(|| {
            warn!(status = %s, "Unknown job status, treating as processing");
            JobState::Processing
        }),
        None => JobState::Processing,
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Login response (`user` or `user_info` depending on backend version)
#[derive(Debug, Deserialize)]
pub(crate) struct LoginWire {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub user_info: Option<UserProfile>,
}

impl LoginWire {
    pub fn into_parts(self) -> (String, Option<String>, Option<UserProfile>) {
        let user = self.user.or(self.user_info);
        (self.access_token, self.refresh_token, user)
    }
}

/// `GET /api/v1/predictions/{id}/result`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct PredictionStatusWire {
    status: Option<String>,
    model_type: Option<String>,
    model: Option<String>,
    result: Option<PredictionResultWire>,
    // Flat form: result fields at the top level
    prediction: Option<String>,
    diagnosis: Option<String>,
    confidence: Option<f64>,
    recommendation: Option<String>,
    credits_charged: Option<u64>,
    credits_used: Option<u64>,
    filename: Option<String>,
    error: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PredictionResultWire {
    status: Option<String>,
    prediction: Option<String>,
    diagnosis: Option<String>,
    confidence: Option<f64>,
    filename: Option<String>,
    recommendation: Option<String>,
    error: Option<String>,
    error_message: Option<String>,
}

impl PredictionStatusWire {
    pub fn into_status(self) -> ApiResult<JobStatus> {
        let raw_state = self
            .status
            .as_deref()
            .or_else(|| self.result.as_ref().and_then(|r| r.status.as_deref()));
        let state = state_or_processing(raw_state);

        match state {
            JobState::Queued => Ok(JobStatus::queued()),
            JobState::Processing => Ok(JobStatus::processing()),
            JobState::Failed => {
                let message = self
                    .error_message
                    .or(self.error)
                    .or_else(|| {
                        self.result
                            .as_ref()
                            .and_then(|r| r.error_message.clone().or_else(|| r.error.clone()))
                    })
                    .unwrap_or_else(|| "Analysis failed".to_string());
                Ok(JobStatus::failed(message))
            }
            JobState::Completed => {
                let model_type = self
                    .model_type
                    .or(self.model)
                    .and_then(|m| m.parse::<ModelType>().ok())
                    .unwrap_or(ModelType::Pneumonia);
                let result = self.result.unwrap_or_default();
                let prediction = result
                    .prediction
                    .or(result.diagnosis)
                    .or(self.prediction)
                    .or(self.diagnosis)
                    .ok_or_else(|| {
                        ApiError::Parse("completed prediction has no result".to_string())
                    })?;

                Ok(JobStatus::completed(JobResult::Single(AnalysisResult {
                    prediction,
                    confidence: clamp_confidence(
                        result.confidence.or(self.confidence).unwrap_or(0.0),
                    ),
                    model_type,
                    filename: result.filename.or(self.filename).unwrap_or_default(),
                    credits_used: self.credits_charged.or(self.credits_used).unwrap_or(0),
                    recommendation: result.recommendation.or(self.recommendation),
                })))
            }
        }
    }
}

/// Per-file entry in batch upload and batch status responses
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FileResultWire {
    filename: Option<String>,
    file_index: Option<usize>,
    success: Option<bool>,
    status: Option<String>,
    prediction: Option<String>,
    diagnosis: Option<String>,
    confidence: Option<f64>,
    recommendation: Option<String>,
    error: Option<String>,
    error_message: Option<String>,
}

impl FileResultWire {
    fn is_pending(&self) -> bool {
        matches!(
            self.status.as_deref().and_then(parse_state),
            Some(JobState::Queued | JobState::Processing)
        )
    }

    fn into_result(self, position: usize) -> FileResult {
        let prediction = self.prediction.or(self.diagnosis);
        let error_message = self.error_message.or(self.error);
        let success = self.success.unwrap_or_else(|| {
            prediction.is_some()
                && error_message.is_none()
                && !matches!(
                    self.status.as_deref().and_then(parse_state),
                    Some(JobState::Failed)
                )
        });

        FileResult {
            file_index: self.file_index.unwrap_or(position),
            filename: self.filename.unwrap_or_default(),
            success,
            prediction,
            confidence: self.confidence.map(clamp_confidence),
            recommendation: self.recommendation,
            error_message,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BatchSummaryWire {
    total_files: u32,
    successful_predictions: u32,
    failed_predictions: u32,
    average_confidence: f64,
    credits_consumed: u64,
    processing_time_seconds: f64,
}

impl From<BatchSummaryWire> for BatchSummary {
    fn from(w: BatchSummaryWire) -> Self {
        BatchSummary {
            total_files: w.total_files,
            successful_predictions: w.successful_predictions,
            failed_predictions: w.failed_predictions,
            average_confidence: clamp_confidence(w.average_confidence),
            credits_consumed: w.credits_consumed,
            processing_time_seconds: w.processing_time_seconds,
        }
    }
}

/// Per-file results carried by `POST /api/v1/predict/batch`, if any
pub(crate) fn extract_upload_results(body: &Value) -> Vec<FileResultWire> {
    body.get("results")
        .cloned()
        .and_then(|v| serde_json::from_value::<Vec<FileResultWire>>(v).ok())
        .unwrap_or_default()
}

/// `GET /api/v1/batch/{id}/status`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct BatchStatusWire {
    status: Option<String>,
    model_type: Option<String>,
    summary: Option<BatchSummaryWire>,
    results: Option<Vec<FileResultWire>>,
    credits_remaining: Option<u64>,
    error: Option<String>,
    error_message: Option<String>,
}

impl BatchStatusWire {
    /// Convert to a status, falling back to `cached` per-file results kept
    /// from the upload response when the status endpoint omits them
    pub fn into_status(self, batch_id: &str, cached: &[FileResultWire]) -> JobStatus {
        let items: Vec<FileResultWire> = match self.results {
            Some(results) if !results.is_empty() => results,
            _ => cached.to_vec(),
        };

        let any_pending = items.iter().any(FileResultWire::is_pending);
        let state = match self.status.as_deref().and_then(parse_state) {
            Some(JobState::Completed) if any_pending => JobState::Processing,
            Some(state) => state,
            None if any_pending => JobState::Processing,
            None if self.summary.is_some() || !items.is_empty() => JobState::Completed,
            None => state_or_processing(self.status.as_deref()),
        };

        match state {
            JobState::Queued => JobStatus::queued(),
            JobState::Processing => JobStatus::processing(),
            JobState::Failed => JobStatus::failed(
                self.error_message
                    .or(self.error)
                    .unwrap_or_else(|| "Batch processing failed".to_string()),
            ),
            JobState::Completed => {
                let mut results: Vec<FileResult> = items
                    .into_iter()
                    .enumerate()
                    .map(|(position, item)| item.into_result(position))
                    .collect();
                results.sort_by_key(|r| r.file_index);

                let summary = match self.summary {
                    Some(summary) => summary.into(),
                    None => summarize(&results),
                };

                JobStatus::completed(JobResult::Batch(BatchResult {
                    batch_id: batch_id.to_string(),
                    model_type: self.model_type.and_then(|m| m.parse().ok()),
                    summary,
                    results,
                    credits_remaining: self.credits_remaining,
                }))
            }
        }
    }
}

/// Summary derived from per-file results when the backend sends none
fn summarize(results: &[FileResult]) -> BatchSummary {
    let successes: Vec<f64> = results
        .iter()
        .filter(|r| r.success)
        .map(|r| r.confidence.unwrap_or(0.0))
        .collect();
    let average_confidence = if successes.is_empty() {
        0.0
    } else {
        successes.iter().sum::<f64>() / successes.len() as f64
    };

    BatchSummary {
        total_files: results.len() as u32,
        successful_predictions: successes.len() as u32,
        failed_predictions: (results.len() - successes.len()) as u32,
        average_confidence,
        credits_consumed: 0,
        processing_time_seconds: 0.0,
    }
}
