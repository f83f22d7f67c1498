//! In-process mock of the screening backend
//!
//! Serves the endpoints the client talks to on `127.0.0.1:0`. Status
//! endpoints replay queued responses and report `processing` once the queue
//! runs dry; every request's Authorization header is recorded.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const USERNAME: &str = "drsmith";
pub const PASSWORD: &str = "correct-horse";
pub const ACCESS_TOKEN: &str = "tok-123";

type Reply = (StatusCode, Value);

/// Upload request as received
#[derive(Debug, Clone, Default)]
pub struct RecordedUpload {
    pub query: HashMap<String, String>,
    pub body: String,
}

impl RecordedUpload {
    /// Number of multipart parts with the given field name
    pub fn part_count(&self, name: &str) -> usize {
        self.body.matches(&format!("name=\"{}\"", name)).count()
    }
}

pub struct MockBackend {
    pub user: Mutex<Reply>,
    pub predict_reply: Mutex<Reply>,
    pub batch_reply: Mutex<Reply>,
    pub prediction_statuses: Mutex<VecDeque<Reply>>,
    pub batch_statuses: Mutex<VecDeque<Reply>>,
    pub csv: Mutex<String>,
    pub status_calls: AtomicU32,
    pub auth_headers: Mutex<Vec<Option<String>>>,
    pub last_upload: Mutex<Option<RecordedUpload>>,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            user: Mutex::new((StatusCode::OK, user_json(120))),
            predict_reply: Mutex::new((
                StatusCode::OK,
                json!({"prediction_id": "p-1", "status": "processing", "credits_remaining": 119}),
            )),
            batch_reply: Mutex::new((
                StatusCode::OK,
                json!({"batch_id": "b-1", "status": "processing"}),
            )),
            prediction_statuses: Mutex::new(VecDeque::new()),
            batch_statuses: Mutex::new(VecDeque::new()),
            csv: Mutex::new(String::new()),
            status_calls: AtomicU32::new(0),
            auth_headers: Mutex::new(Vec::new()),
            last_upload: Mutex::new(None),
        }
    }

    pub fn set_user(&self, status: StatusCode, body: Value) {
        *self.user.lock().unwrap() = (status, body);
    }

    pub fn set_predict_reply(&self, status: StatusCode, body: Value) {
        *self.predict_reply.lock().unwrap() = (status, body);
    }

    pub fn set_batch_reply(&self, status: StatusCode, body: Value) {
        *self.batch_reply.lock().unwrap() = (status, body);
    }

    pub fn queue_prediction_status(&self, status: StatusCode, body: Value) {
        self.prediction_statuses
            .lock()
            .unwrap()
            .push_back((status, body));
    }

    pub fn queue_batch_status(&self, status: StatusCode, body: Value) {
        self.batch_statuses.lock().unwrap().push_back((status, body));
    }

    pub fn set_csv(&self, csv: &str) {
        *self.csv.lock().unwrap() = csv.to_string();
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn last_auth_header(&self) -> Option<String> {
        self.auth_headers.lock().unwrap().last().cloned().flatten()
    }

    pub fn last_upload(&self) -> Option<RecordedUpload> {
        self.last_upload.lock().unwrap().clone()
    }

    fn record_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.auth_headers.lock().unwrap().push(value);
    }
}

pub fn user_json(credits: u64) -> Value {
    json!({
        "username": USERNAME,
        "email": "drsmith@example.org",
        "name": "Dr Smith",
        "credits": credits,
        "plan": "standard"
    })
}

pub fn processing() -> Value {
    json!({"status": "processing"})
}

pub fn completed_prediction(confidence: f64) -> Value {
    json!({
        "status": "completed",
        "model_type": "pneumonia",
        "credits_charged": 1,
        "result": {
            "prediction": "PNEUMONIA",
            "confidence": confidence,
            "filename": "xray.png",
            "recommendation": "Consult a physician"
        }
    })
}

/// Start the mock backend; returns its base URL
pub async fn spawn_backend() -> (String, Arc<MockBackend>) {
    let backend = Arc::new(MockBackend::new());

    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/api/v1/predict", post(predict))
        .route("/api/v1/predictions/:id/result", get(prediction_status))
        .route("/api/v1/predict/batch", post(predict_batch))
        .route("/api/v1/batch/:id/status", get(batch_status))
        .route("/api/v1/batch/:id/export/csv", get(export_csv))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock backend");
    let addr = listener.local_addr().expect("Mock backend has no address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Mock backend failed");
    });

    (format!("http://{}", addr), backend)
}

async fn login(Form(form): Form<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
    let username = form.get("username").map(String::as_str);
    let password = form.get("password").map(String::as_str);

    if username == Some(USERNAME) && password == Some(PASSWORD) {
        (
            StatusCode::OK,
            Json(json!({
                "access_token": ACCESS_TOKEN,
                "refresh_token": "refresh-456",
                "token_type": "bearer",
                "user": user_json(120)
            })),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Incorrect username or password"})),
        )
    }
}

async fn me(State(backend): State<Arc<MockBackend>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    backend.record_auth(&headers);
    let (status, body) = backend.user.lock().unwrap().clone();
    (status, Json(body))
}

async fn predict(
    State(backend): State<Arc<MockBackend>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    backend.record_auth(&headers);
    *backend.last_upload.lock().unwrap() = Some(RecordedUpload {
        query: HashMap::new(),
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    let (status, body) = backend.predict_reply.lock().unwrap().clone();
    (status, Json(body))
}

async fn predict_batch(
    State(backend): State<Arc<MockBackend>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    backend.record_auth(&headers);
    *backend.last_upload.lock().unwrap() = Some(RecordedUpload {
        query,
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    let (status, body) = backend.batch_reply.lock().unwrap().clone();
    (status, Json(body))
}

async fn prediction_status(
    State(backend): State<Arc<MockBackend>>,
    Path(_id): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    backend.record_auth(&headers);
    backend.status_calls.fetch_add(1, Ordering::SeqCst);
    let next = backend.prediction_statuses.lock().unwrap().pop_front();
    let (status, body) = next.unwrap_or_else(|| (StatusCode::OK, processing()));
    (status, Json(body))
}

async fn batch_status(
    State(backend): State<Arc<MockBackend>>,
    Path(_id): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    backend.record_auth(&headers);
    backend.status_calls.fetch_add(1, Ordering::SeqCst);
    let next = backend.batch_statuses.lock().unwrap().pop_front();
    let (status, body) = next.unwrap_or_else(|| (StatusCode::OK, processing()));
    (status, Json(body))
}

async fn export_csv(
    State(backend): State<Arc<MockBackend>>,
    Path(id): Path<String>,
) -> (StatusCode, String) {
    if id == "missing" {
        return (StatusCode::NOT_FOUND, r#"{"detail": "Batch not found"}"#.to_string());
    }
    (StatusCode::OK, backend.csv.lock().unwrap().clone())
}
