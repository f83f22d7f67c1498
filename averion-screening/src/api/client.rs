//! HTTP client for the screening backend
//!
//! Every request carries the session's bearer token when one is present.
//! Any 401/403 clears the session before the error is returned, so callers
//! only need to route the user back to sign-in.

use super::wire::{
    extract_batch_id, extract_credits_remaining, extract_message, extract_prediction_id,
    extract_upload_results, BatchStatusWire, FileResultWire, LoginWire, PredictionStatusWire,
};
use crate::error::{ApiError, ApiResult};
use crate::poller::StatusSource;
use crate::types::{JobHandle, JobKind, JobStatus, Submission};
use crate::upload::ImageUpload;
use async_trait::async_trait;
use averion_common::config::HttpConfig;
use averion_common::{ModelType, SessionContext, UserProfile};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("averion-screening/", env!("CARGO_PKG_VERSION"));

/// Per-call-class request timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    pub request: Duration,
    pub single_upload: Duration,
    pub batch_upload: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl From<&HttpConfig> for ClientTimeouts {
    fn from(config: &HttpConfig) -> Self {
        Self {
            request: Duration::from_secs(config.request_timeout_secs),
            single_upload: Duration::from_secs(config.single_upload_timeout_secs),
            batch_upload: Duration::from_secs(config.upload_timeout_secs),
        }
    }
}

/// Screening backend client
pub struct ScreeningClient {
    http: reqwest::Client,
    base_url: String,
    session: SessionContext,
    timeouts: ClientTimeouts,
    /// Per-file results returned by batch uploads, keyed by batch id
    upload_results: Mutex<HashMap<String, Vec<FileResultWire>>>,
}

impl ScreeningClient {
    pub fn new(base_url: impl Into<String>, session: SessionContext) -> ApiResult<Self> {
        Self::with_timeouts(base_url, session, ClientTimeouts::default())
    }

    pub fn with_timeouts(
        base_url: impl Into<String>,
        session: SessionContext,
        timeouts: ClientTimeouts,
    ) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeouts.request)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            timeouts,
            upload_results: Mutex::new(HashMap::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Sign in and store the issued tokens in the session
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<UserProfile> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ApiError::InvalidInput(
                "username and password are required".to_string(),
            ));
        }

        let request = self
            .http
            .post(self.url("/auth/login"))
            .form(&[("username", username), ("password", password)]);
        let response = self.send(request).await?;
        let login: LoginWire = read_json(response).await?;

        let (access_token, refresh_token, user) = login.into_parts();
        self.session
            .establish(access_token, refresh_token, user.clone())
            .await;
        info!(username = %username, "Signed in");

        match user {
            Some(user) => Ok(user),
            None => self.current_user().await,
        }
    }

    /// Fetch the signed-in user's profile, including the current credit balance
    pub async fn current_user(&self) -> ApiResult<UserProfile> {
        let request = self.http.get(self.url("/auth/me"));
        let response = self.send(request).await?;
        let user: UserProfile = read_json(response).await?;

        debug!(username = %user.username, credits = user.credits, "Fetched current user");
        self.session.update_user(user.clone()).await;
        Ok(user)
    }

    /// Upload one image for analysis
    pub async fn submit_prediction(
        &self,
        upload: &ImageUpload,
        model_type: ModelType,
    ) -> ApiResult<Submission> {
        upload
            .validate(model_type)
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?;

        let form = Form::new()
            .part("file", file_part(upload)?)
            .text("model_type", model_type.as_str());

        info!(
            filename = %upload.filename(),
            size = upload.len(),
            model = %model_type,
            "Submitting image for analysis"
        );

        let request = self
            .http
            .post(self.url("/api/v1/predict"))
            .multipart(form)
            .timeout(self.timeouts.single_upload);
        let response = self.send(request).await?;
        let body: Value = read_json(response).await?;

        let prediction_id = extract_prediction_id(&body)?;
        info!(prediction_id = %prediction_id, "Prediction accepted");

        Ok(Submission {
            handle: JobHandle::single(prediction_id),
            credits_remaining: extract_credits_remaining(&body),
            message: extract_message(&body),
        })
    }

    /// Current status of a single-image prediction
    pub async fn prediction_status(&self, prediction_id: &str) -> ApiResult<JobStatus> {
        let prediction_id = validate_job_id(prediction_id)?;
        let request = self
            .http
            .get(self.url(&format!("/api/v1/predictions/{}/result", prediction_id)));
        let response = self.send(request).await?;
        let wire: PredictionStatusWire = read_json(response).await?;
        wire.into_status()
    }

    /// Upload several images as one batch
    pub async fn submit_batch(
        &self,
        uploads: &[ImageUpload],
        model_type: ModelType,
    ) -> ApiResult<Submission> {
        if uploads.is_empty() {
            return Err(ApiError::InvalidInput("no files selected".to_string()));
        }

        let mut form = Form::new();
        for upload in uploads {
            upload
                .validate(model_type)
                .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
            form = form.part("files", file_part(upload)?);
        }

        info!(files = uploads.len(), model = %model_type, "Submitting batch");

        let request = self
            .http
            .post(self.url("/api/v1/predict/batch"))
            .query(&[("model_type", model_type.as_str())])
            .multipart(form)
            .timeout(self.timeouts.batch_upload);
        let response = self.send(request).await?;
        let body: Value = read_json(response).await?;

        let batch_id = extract_batch_id(&body)?;
        let results = extract_upload_results(&body);
        if !results.is_empty() {
            debug!(batch_id = %batch_id, files = results.len(), "Keeping upload results");
            self.upload_results
                .lock()
                .await
                .insert(batch_id.clone(), results);
        }
        info!(batch_id = %batch_id, "Batch accepted");

        Ok(Submission {
            handle: JobHandle::batch(batch_id),
            credits_remaining: extract_credits_remaining(&body),
            message: extract_message(&body),
        })
    }

    /// Current status of a batch
    ///
    /// Per-file results kept from the upload response fill in for a status
    /// body that omits them.
    pub async fn batch_status(&self, batch_id: &str) -> ApiResult<JobStatus> {
        let batch_id = validate_job_id(batch_id)?;
        let request = self
            .http
            .get(self.url(&format!("/api/v1/batch/{}/status", batch_id)));
        let response = self.send(request).await?;
        let wire: BatchStatusWire = read_json(response).await?;

        let mut cache = self.upload_results.lock().await;
        let cached = cache.get(batch_id).map(Vec::as_slice).unwrap_or_default();
        let status = wire.into_status(batch_id, cached);
        if status.is_terminal() {
            cache.remove(batch_id);
        }
        Ok(status)
    }

    /// Drop per-file results kept for `batch_id`
    ///
    /// Call once polling has ended for any reason (timeout, cancellation,
    /// rejection); a batch that completes normally is dropped automatically.
    pub async fn forget_upload_results(&self, batch_id: &str) {
        if self.upload_results.lock().await.remove(batch_id.trim()).is_some() {
            debug!(batch_id = %batch_id, "Dropped kept upload results");
        }
    }

    /// Number of batches with kept upload results
    pub async fn kept_upload_results(&self) -> usize {
        self.upload_results.lock().await.len()
    }

    /// Download a finished batch as CSV
    pub async fn export_batch_csv(&self, batch_id: &str) -> ApiResult<Vec<u8>> {
        let batch_id = validate_job_id(batch_id)?;
        let request = self
            .http
            .get(self.url(&format!("/api/v1/batch/{}/export/csv", batch_id)));
        let response = self.send(request).await?;
        let bytes = response.bytes().await.map_err(ApiError::from_transport)?;

        debug!(batch_id = %batch_id, size = bytes.len(), "Exported batch CSV");
        Ok(bytes.to_vec())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach auth, send, and map non-success statuses
    async fn send(&self, request: reqwest::RequestBuilder) -> ApiResult<reqwest::Response> {
        let request = match self.session.bearer_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(ApiError::from_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = ApiError::from_status(status.as_u16(), &body);
        if err.is_auth_failure() {
            warn!(status = status.as_u16(), "Backend rejected credentials");
            self.session.clear().await;
        } else {
            debug!(status = status.as_u16(), error = %err, "Request failed");
        }
        Err(err)
    }
}

#[async_trait]
impl StatusSource for ScreeningClient {
    async fn fetch_status(&self, handle: &JobHandle) -> ApiResult<JobStatus> {
        match handle.kind() {
            JobKind::Single => self.prediction_status(handle.job_id()).await,
            JobKind::Batch => self.batch_status(handle.job_id()).await,
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::Parse(e.to_string()))
}

fn file_part(upload: &ImageUpload) -> ApiResult<Part> {
    Part::bytes(upload.bytes().to_vec())
        .file_name(upload.filename().to_string())
        .mime_str(upload.content_type())
        .map_err(|e| ApiError::InvalidInput(format!("{}: {}", upload.filename(), e)))
}

/// Reject ids that would produce a meaningless status URL
fn validate_job_id(id: &str) -> ApiResult<&str> {
    let id = id.trim();
    if id.is_empty() || id == "undefined" || id == "null" || id.contains('/') {
        return Err(ApiError::InvalidInput(format!("invalid job id '{}'", id)));
    }
    Ok(id)
}
