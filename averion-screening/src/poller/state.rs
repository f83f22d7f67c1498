//! Job poller state machine
//!
//! ```text
//! Idle ──begin_submit──▶ Submitting ──bind──▶ Polling ──COMPLETED──▶ Succeeded
//!   │                        │                  │ ▲
//!   └────────bind────────────┼──────────────────┘ │ QUEUED / PROCESSING / transient error
//!                            │                  └─┘ (attempts + 1, until the ceiling)
//!                            └─submit error─▶ Failed ◀── FAILED / ceiling / 404 / auth
//! ```
//!
//! Pure and synchronous: the driver feeds it responses, it decides.
//! Responses arriving outside `Polling` are ignored, so a late answer can
//! never overwrite a terminal state.

use crate::error::{ApiError, ApiResult};
use crate::types::{JobHandle, JobResult, JobState, JobStatus};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Polling parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay between the end of one status request and the next
    pub interval: Duration,
    /// Non-terminal rounds tolerated before failing with a timeout
    pub max_attempts: u32,
    /// Treat a 404 from the status endpoint as terminal
    pub fail_fast_on_not_found: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 20,
            fail_fast_on_not_found: true,
        }
    }
}

impl From<&averion_common::config::PollingConfig> for PollerConfig {
    fn from(config: &averion_common::config::PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            max_attempts: config.max_attempts,
            fail_fast_on_not_found: config.fail_fast_on_not_found,
        }
    }
}

/// Poller lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerPhase {
    Idle,
    Submitting,
    Polling,
    Succeeded,
    Failed,
}

impl PollerPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollerPhase::Succeeded | PollerPhase::Failed)
    }
}

/// Suggested next step for the user after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    TryAgain,
    ContactSupport,
    SignIn,
}

/// Why a job ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollFailure {
    /// The upload/initiate call failed; nothing was polled
    Submit(ApiError),
    /// The backend reported the job as FAILED
    Server(String),
    /// Attempt ceiling reached without a terminal status
    Timeout { attempts: u32 },
    /// Status endpoint does not know the job (expired or never existed)
    NotFound,
    /// Status request failed in a way retrying cannot fix
    Rejected(ApiError),
}

impl PollFailure {
    pub fn remediation(&self) -> Remediation {
        match self {
            PollFailure::Submit(err) | PollFailure::Rejected(err) if err.is_auth_failure() => {
                Remediation::SignIn
            }
            PollFailure::Server(_) => Remediation::ContactSupport,
            _ => Remediation::TryAgain,
        }
    }

    pub fn message(&self) -> String {
        match self {
            PollFailure::Submit(err) => format!("Upload failed: {}", err),
            PollFailure::Server(msg) => format!("Analysis failed: {}", msg),
            PollFailure::Timeout { attempts } => format!(
                "Analysis timed out after {} status checks. Please try again.",
                attempts
            ),
            PollFailure::NotFound => "Job not found. It may have expired.".to_string(),
            PollFailure::Rejected(err) => format!("Status check refused: {}", err),
        }
    }
}

/// Everything a consumer renders: phase, result, failure, progress
#[derive(Debug, Clone, PartialEq)]
pub struct PollerSnapshot {
    pub phase: PollerPhase,
    pub handle: Option<JobHandle>,
    /// Non-terminal rounds so far (counts toward the ceiling)
    pub attempt_count: u32,
    /// Status responses consumed, terminal one included
    pub rounds: u32,
    pub max_attempts: u32,
    pub result: Option<JobResult>,
    pub failure: Option<PollFailure>,
}

impl PollerSnapshot {
    fn idle(max_attempts: u32) -> Self {
        Self {
            phase: PollerPhase::Idle,
            handle: None,
            attempt_count: 0,
            rounds: 0,
            max_attempts,
            result: None,
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// What the driver should do after a response was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Still polling; schedule the next round
    Continue,
    /// Reached a terminal phase; stop
    Finished,
    /// Response arrived outside `Polling` and was discarded
    Ignored,
}

/// The state machine proper
#[derive(Debug, Clone)]
pub struct PollerState {
    snapshot: PollerSnapshot,
    fail_fast_on_not_found: bool,
}

impl PollerState {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            snapshot: PollerSnapshot::idle(config.max_attempts),
            fail_fast_on_not_found: config.fail_fast_on_not_found,
        }
    }

    pub fn snapshot(&self) -> &PollerSnapshot {
        &self.snapshot
    }

    pub fn phase(&self) -> PollerPhase {
        self.snapshot.phase
    }

    /// Idle → Submitting
    pub fn begin_submit(&mut self) -> bool {
        if self.snapshot.phase != PollerPhase::Idle {
            return false;
        }
        self.snapshot.phase = PollerPhase::Submitting;
        true
    }

    /// Idle/Submitting → Polling for `handle`
    pub fn bind(&mut self, handle: JobHandle) -> bool {
        if !matches!(
            self.snapshot.phase,
            PollerPhase::Idle | PollerPhase::Submitting
        ) {
            return false;
        }
        info!(job = %handle, "Polling job status");
        self.snapshot.phase = PollerPhase::Polling;
        self.snapshot.handle = Some(handle);
        self.snapshot.attempt_count = 0;
        self.snapshot.rounds = 0;
        true
    }

    /// Submitting → Failed(Submit); submissions are never retried here
    pub fn submit_failed(&mut self, error: ApiError) -> bool {
        if self.snapshot.phase != PollerPhase::Submitting {
            return false;
        }
        warn!(error = %error, "Job submission failed");
        self.fail(PollFailure::Submit(error));
        true
    }

    /// Feed one status response
    pub fn apply(&mut self, response: ApiResult<JobStatus>) -> Transition {
        if self.snapshot.phase != PollerPhase::Polling {
            debug!(phase = ?self.snapshot.phase, "Discarding status response outside polling");
            return Transition::Ignored;
        }
        self.snapshot.rounds += 1;

        match response {
            Ok(status) => self.apply_status(status),
            Err(ApiError::NotFound(_)) if self.fail_fast_on_not_found => {
                warn!(job = ?self.snapshot.handle, "Status endpoint reports unknown job");
                self.fail(PollFailure::NotFound);
                Transition::Finished
            }
            Err(err) if err.is_transient() => {
                warn!(
                    error = %err,
                    attempt = self.snapshot.attempt_count + 1,
                    "Transient status poll failure, will retry"
                );
                self.count_attempt()
            }
            Err(err) => {
                warn!(error = %err, "Status poll refused, giving up");
                self.fail(PollFailure::Rejected(err));
                Transition::Finished
            }
        }
    }

    /// Overall polling deadline passed before a terminal status arrived
    pub fn expire(&mut self) -> Transition {
        if self.snapshot.phase != PollerPhase::Polling {
            return Transition::Ignored;
        }
        warn!(
            job = ?self.snapshot.handle,
            attempts = self.snapshot.attempt_count,
            "Polling deadline reached"
        );
        self.fail(PollFailure::Timeout {
            attempts: self.snapshot.attempt_count,
        });
        Transition::Finished
    }

    /// Return to Idle so a new handle can be bound
    pub fn reset(&mut self) {
        self.snapshot = PollerSnapshot::idle(self.snapshot.max_attempts);
    }

    fn apply_status(&mut self, status: JobStatus) -> Transition {
        let (state, result, error_message) = status.into_parts();
        match state {
            JobState::Queued | JobState::Processing => {
                debug!(
                    state = ?state,
                    attempt = self.snapshot.attempt_count + 1,
                    "Job not finished yet"
                );
                self.count_attempt()
            }
            JobState::Completed => {
                let expected = self.snapshot.handle.as_ref().map(JobHandle::kind);
                match result {
                    Some(result) if Some(result.kind()) == expected => {
                        info!(
                            job = ?self.snapshot.handle,
                            rounds = self.snapshot.rounds,
                            "Job completed"
                        );
                        self.snapshot.phase = PollerPhase::Succeeded;
                        self.snapshot.result = Some(result);
                        Transition::Finished
                    }
                    _ => {
                        self.fail(PollFailure::Server(
                            "completed job returned an unexpected result shape".to_string(),
                        ));
                        Transition::Finished
                    }
                }
            }
            JobState::Failed => {
                let message = error_message.unwrap_or_else(|| "Analysis failed".to_string());
                warn!(job = ?self.snapshot.handle, error = %message, "Job failed on server");
                self.fail(PollFailure::Server(message));
                Transition::Finished
            }
        }
    }

    fn count_attempt(&mut self) -> Transition {
        self.snapshot.attempt_count += 1;
        if self.snapshot.attempt_count >= self.snapshot.max_attempts {
            warn!(
                job = ?self.snapshot.handle,
                attempts = self.snapshot.attempt_count,
                "Polling attempt ceiling reached"
            );
            self.fail(PollFailure::Timeout {
                attempts: self.snapshot.attempt_count,
            });
            Transition::Finished
        } else {
            Transition::Continue
        }
    }

    fn fail(&mut self, failure: PollFailure) {
        self.snapshot.phase = PollerPhase::Failed;
        self.snapshot.failure = Some(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisResult, BatchResult, BatchSummary};
    use averion_common::ModelType;

    fn config(max_attempts: u32) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(10),
            max_attempts,
            fail_fast_on_not_found: true,
        }
    }

    fn completed_single(confidence: f64) -> JobStatus {
        JobStatus::completed(JobResult::Single(AnalysisResult {
            prediction: "PNEUMONIA".to_string(),
            confidence,
            model_type: ModelType::Pneumonia,
            filename: "xray.png".to_string(),
            credits_used: 1,
            recommendation: None,
        }))
    }

    fn polling(max_attempts: u32) -> PollerState {
        let mut state = PollerState::new(&config(max_attempts));
        assert!(state.bind(JobHandle::single("p-1")));
        state
    }

    #[test]
    fn test_submit_path() {
        let mut state = PollerState::new(&config(20));
        assert_eq!(state.phase(), PollerPhase::Idle);
        assert!(state.begin_submit());
        assert!(!state.begin_submit());
        assert_eq!(state.phase(), PollerPhase::Submitting);
        assert!(state.bind(JobHandle::single("p-1")));
        assert_eq!(state.phase(), PollerPhase::Polling);
    }

    #[test]
    fn test_submit_failure_is_terminal() {
        let mut state = PollerState::new(&config(20));
        state.begin_submit();
        assert!(state.submit_failed(ApiError::InsufficientCredits("none".into())));

        let snap = state.snapshot();
        assert_eq!(snap.phase, PollerPhase::Failed);
        assert!(matches!(snap.failure, Some(PollFailure::Submit(_))));
        assert!(!state.bind(JobHandle::single("late")));
    }

    #[test]
    fn test_processing_then_completed() {
        let mut state = polling(20);
        for _ in 0..3 {
            assert_eq!(state.apply(Ok(JobStatus::processing())), Transition::Continue);
        }
        assert_eq!(state.apply(Ok(completed_single(94.2))), Transition::Finished);

        let snap = state.snapshot();
        assert_eq!(snap.phase, PollerPhase::Succeeded);
        assert_eq!(snap.rounds, 4);
        assert_eq!(snap.attempt_count, 3);
        match &snap.result {
            Some(JobResult::Single(r)) => assert_eq!(r.confidence, 94.2),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_stray_responses_after_success_are_ignored() {
        let mut state = polling(20);
        state.apply(Ok(completed_single(80.0)));

        assert_eq!(state.apply(Ok(JobStatus::processing())), Transition::Ignored);
        assert_eq!(state.apply(Ok(JobStatus::failed("late"))), Transition::Ignored);
        assert_eq!(
            state.apply(Err(ApiError::Network("late".into()))),
            Transition::Ignored
        );
        assert_eq!(state.phase(), PollerPhase::Succeeded);
        assert_eq!(state.snapshot().rounds, 1);
        assert!(state.snapshot().failure.is_none());
    }

    #[test]
    fn test_server_failure() {
        let mut state = polling(20);
        state.apply(Ok(JobStatus::queued()));
        assert_eq!(
            state.apply(Ok(JobStatus::failed("model crashed"))),
            Transition::Finished
        );
        let failure = state.snapshot().failure.clone().unwrap();
        assert_eq!(failure, PollFailure::Server("model crashed".to_string()));
        assert_eq!(failure.remediation(), Remediation::ContactSupport);
    }

    #[test]
    fn test_timeout_after_ceiling() {
        let mut state = polling(20);
        for i in 1..20 {
            assert_eq!(
                state.apply(Ok(JobStatus::processing())),
                Transition::Continue,
                "round {}",
                i
            );
        }
        assert_eq!(state.apply(Ok(JobStatus::processing())), Transition::Finished);

        let snap = state.snapshot();
        assert_eq!(snap.phase, PollerPhase::Failed);
        assert_eq!(snap.failure, Some(PollFailure::Timeout { attempts: 20 }));
        assert_eq!(
            snap.failure.as_ref().map(PollFailure::remediation),
            Some(Remediation::TryAgain)
        );
    }

    #[test]
    fn test_deadline_expiry() {
        let mut state = polling(20);
        state.apply(Ok(JobStatus::processing()));
        state.apply(Ok(JobStatus::processing()));

        assert_eq!(state.expire(), Transition::Finished);
        assert_eq!(
            state.snapshot().failure,
            Some(PollFailure::Timeout { attempts: 2 })
        );

        // Terminal states are not overwritten by a late expiry
        let mut done = polling(20);
        done.apply(Ok(completed_single(90.0)));
        assert_eq!(done.expire(), Transition::Ignored);
        assert_eq!(done.phase(), PollerPhase::Succeeded);
    }

    #[test]
    fn test_transient_errors_count_toward_ceiling() {
        let mut state = polling(3);
        assert_eq!(
            state.apply(Err(ApiError::Network("reset".into()))),
            Transition::Continue
        );
        assert_eq!(
            state.apply(Err(ApiError::Server(502, "gateway".into()))),
            Transition::Continue
        );
        assert_eq!(state.phase(), PollerPhase::Polling);
        assert_eq!(
            state.apply(Err(ApiError::Timeout("30s".into()))),
            Transition::Finished
        );
        assert_eq!(
            state.snapshot().failure,
            Some(PollFailure::Timeout { attempts: 3 })
        );
    }

    #[test]
    fn test_transient_error_then_success() {
        let mut state = polling(20);
        state.apply(Err(ApiError::Network("blip".into())));
        assert_eq!(state.apply(Ok(completed_single(70.0))), Transition::Finished);
        assert_eq!(state.phase(), PollerPhase::Succeeded);
    }

    #[test]
    fn test_not_found_fails_fast() {
        let mut state = polling(20);
        assert_eq!(
            state.apply(Err(ApiError::NotFound("expired".into()))),
            Transition::Finished
        );
        assert_eq!(state.snapshot().failure, Some(PollFailure::NotFound));
    }

    #[test]
    fn test_not_found_retried_when_configured() {
        let mut state = PollerState::new(&PollerConfig {
            fail_fast_on_not_found: false,
            ..config(20)
        });
        state.bind(JobHandle::single("p-1"));
        assert_eq!(
            state.apply(Err(ApiError::NotFound("not yet".into()))),
            Transition::Continue
        );
    }

    #[test]
    fn test_auth_failure_stops_polling() {
        let mut state = polling(20);
        assert_eq!(
            state.apply(Err(ApiError::Unauthorized("expired".into()))),
            Transition::Finished
        );
        let failure = state.snapshot().failure.clone().unwrap();
        assert!(matches!(failure, PollFailure::Rejected(_)));
        assert_eq!(failure.remediation(), Remediation::SignIn);
    }

    #[test]
    fn test_result_kind_mismatch_fails() {
        let mut state = polling(20);
        let batch = JobStatus::completed(JobResult::Batch(BatchResult {
            batch_id: "b".to_string(),
            model_type: None,
            summary: BatchSummary::default(),
            results: Vec::new(),
            credits_remaining: None,
        }));
        state.apply(Ok(batch));
        assert!(matches!(
            state.snapshot().failure,
            Some(PollFailure::Server(_))
        ));
    }

    #[test]
    fn test_responses_before_binding_are_ignored() {
        let mut state = PollerState::new(&config(20));
        assert_eq!(state.apply(Ok(JobStatus::processing())), Transition::Ignored);
        assert_eq!(state.snapshot().rounds, 0);
    }

    #[test]
    fn test_reset_allows_new_job() {
        let mut state = polling(20);
        state.apply(Ok(JobStatus::failed("x")));
        assert!(!state.bind(JobHandle::single("p-2")));

        state.reset();
        assert_eq!(state.phase(), PollerPhase::Idle);
        assert!(state.bind(JobHandle::single("p-2")));
        assert_eq!(state.snapshot().attempt_count, 0);
        assert!(state.snapshot().failure.is_none());
    }

    #[test]
    fn test_failure_messages() {
        assert!(PollFailure::Timeout { attempts: 20 }
            .message()
            .contains("20 status checks"));
        assert!(PollFailure::NotFound.message().contains("expired"));
    }
}
