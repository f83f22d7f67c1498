//! averion-screening library interface
//!
//! Client-side workflow for the Averion Labs screening service:
//! - [`admission`]: batch file-count and credit admission control
//! - [`poller`]: async job-status polling with cancellation
//! - [`api`]: HTTP client for the backend
//! - [`upload`]: local image validation

pub mod admission;
pub mod api;
pub mod error;
pub mod poller;
pub mod types;
pub mod upload;

pub use crate::admission::{AddOutcome, AdmissionRejection, AffordabilityPolicy, BatchAdmission};
pub use crate::api::{ClientTimeouts, ScreeningClient};
pub use crate::error::{ApiError, ApiResult};
pub use crate::poller::{
    JobPoller, PollFailure, PollerConfig, PollerHandle, PollerPhase, PollerSnapshot, Remediation,
    StatusSource,
};
pub use crate::types::{
    AnalysisResult, BatchResult, BatchSummary, ConfidenceBand, FileResult, JobHandle, JobKind,
    JobResult, JobState, JobStatus, Submission,
};
pub use crate::upload::{ImageUpload, UploadRejection};
