//! Async driver for the poller state machine
//!
//! Each polling session runs on its own tokio task. Status requests are
//! strictly sequential: the next one starts `interval` after the previous
//! one started, or as soon as it returns if it took longer. The session
//! ends as a timeout once `interval * max_attempts` has elapsed, however
//! slow the individual requests are.
//!
//! The task is owned by a [`PollerHandle`]. Cancelling or dropping the
//! handle stops the task at its next suspension point (in-flight request or
//! inter-poll sleep); no request is issued after that.

use super::state::{PollerConfig, PollerSnapshot, PollerState, Transition};
use crate::error::ApiResult;
use crate::types::{JobHandle, JobStatus};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Anything that can report the status of a job
///
/// Implementations must be side-effect free on the job: the same query may
/// be repeated any number of times.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, handle: &JobHandle) -> ApiResult<JobStatus>;
}

/// Starts polling sessions against one status source
#[derive(Clone)]
pub struct JobPoller {
    source: Arc<dyn StatusSource>,
    config: PollerConfig,
}

impl JobPoller {
    pub fn new(source: Arc<dyn StatusSource>, config: PollerConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll an already-submitted job
    pub fn watch(&self, handle: JobHandle) -> PollerHandle {
        let mut state = PollerState::new(&self.config);
        state.bind(handle);

        let (tx, rx) = watch::channel(state.snapshot().clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.source.clone(),
            self.config.interval,
            state,
            tx,
            cancel.clone(),
        ));

        PollerHandle {
            updates: rx,
            cancel,
            task,
        }
    }

    /// Run `submission`, then poll the job it returns
    ///
    /// A failed submission ends the session in `Failed` without retrying.
    pub fn submit_and_watch<F>(&self, submission: F) -> PollerHandle
    where
        F: Future<Output = ApiResult<JobHandle>> + Send + 'static,
    {
        let mut state = PollerState::new(&self.config);
        state.begin_submit();

        let (tx, rx) = watch::channel(state.snapshot().clone());
        let cancel = CancellationToken::new();
        let source = self.source.clone();
        let interval = self.config.interval;
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Poller cancelled during submission");
                    return;
                }
                outcome = submission => outcome,
            };

            match outcome {
                Ok(handle) => {
                    state.bind(handle);
                    tx.send_replace(state.snapshot().clone());
                    poll_loop(source, interval, state, tx, token).await;
                }
                Err(err) => {
                    state.submit_failed(err);
                    tx.send_replace(state.snapshot().clone());
                }
            }
        });

        PollerHandle {
            updates: rx,
            cancel,
            task,
        }
    }
}

async fn poll_loop(
    source: Arc<dyn StatusSource>,
    interval: Duration,
    mut state: PollerState,
    tx: watch::Sender<PollerSnapshot>,
    cancel: CancellationToken,
) {
    let Some(handle) = state.snapshot().handle.clone() else {
        return;
    };

    let started = Instant::now();
    let deadline = interval
        .checked_mul(state.snapshot().max_attempts)
        .and_then(|budget| started.checked_add(budget));

    loop {
        let round_start = Instant::now();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(job = %handle, "Poller cancelled with request in flight");
                return;
            }
            _ = sleep_until_deadline(deadline) => {
                state.expire();
                tx.send_replace(state.snapshot().clone());
                return;
            }
            response = source.fetch_status(&handle) => response,
        };

        let transition = state.apply(response);
        tx.send_replace(state.snapshot().clone());
        if transition != Transition::Continue {
            return;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(job = %handle, "Poller cancelled between rounds");
                return;
            }
            _ = sleep_until_deadline(deadline) => {
                state.expire();
                tx.send_replace(state.snapshot().clone());
                return;
            }
            _ = tokio::time::sleep_until(round_start + interval) => {}
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Owner of one polling session
///
/// Dropping the handle cancels the session.
pub struct PollerHandle {
    updates: watch::Receiver<PollerSnapshot>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Latest published state
    pub fn snapshot(&self) -> PollerSnapshot {
        self.updates.borrow().clone()
    }

    /// Independent receiver for rendering updates elsewhere
    pub fn subscribe(&self) -> watch::Receiver<PollerSnapshot> {
        self.updates.clone()
    }

    /// Wait for the next published state; `None` once the session has ended
    pub async fn next_update(&mut self) -> Option<PollerSnapshot> {
        self.updates.changed().await.ok()?;
        Some(self.updates.borrow_and_update().clone())
    }

    /// Wait until the session reaches a terminal phase
    ///
    /// If the session is cancelled first, returns the last (non-terminal)
    /// state it published.
    pub async fn wait_for_terminal(&mut self) -> PollerSnapshot {
        loop {
            {
                let snapshot = self.updates.borrow_and_update();
                if snapshot.is_terminal() {
                    return snapshot.clone();
                }
            }
            if self.updates.changed().await.is_err() {
                return self.updates.borrow().clone();
            }
        }
    }

    /// Stop polling; no further requests are issued
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the background task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
