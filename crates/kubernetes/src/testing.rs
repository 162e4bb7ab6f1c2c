//! In-process fake API server for adapter tests.
//!
//! Stores objects by URL path and enforces `resourceVersion` preconditions the
//! way the real API server does, which is all the adapters rely on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::Value;

use crate::KubeClient;

#[derive(Default)]
struct FakeState {
    objects: HashMap<String, Value>,
    next_version: u64,
    unavailable: bool,
    writes: usize,
}

impl FakeState {
    fn bump(&mut self, object: &mut Value) {
        self.next_version += 1;
        object["metadata"]["resourceVersion"] = Value::from(self.next_version.to_string());
    }
}

pub(crate) struct FakeApiServer {
    base_url: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeApiServer {
    pub(crate) async fn start() -> Self {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let router = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub(crate) fn client(&self) -> KubeClient {
        KubeClient::new(self.base_url.clone(), Some("test-token".into())).unwrap()
    }

    pub(crate) fn insert(&self, path: &str, mut object: Value) {
        let mut state = self.state.lock().unwrap();
        state.bump(&mut object);
        state.objects.insert(path.to_string(), object);
    }

    pub(crate) fn object(&self, path: &str) -> Option<Value> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    /// Bumps `resourceVersion` as if another client had written the object.
    pub(crate) fn touch(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(mut object) = state.objects.remove(path) {
            state.bump(&mut object);
            state.objects.insert(path.to_string(), object);
        }
    }

    pub(crate) fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }
}

async fn handle(
    State(state): State<Arc<Mutex<FakeState>>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    if state.unavailable {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let path = uri.path().to_string();
    let body: Option<Value> = serde_json::from_slice(&body).ok();

    match method {
        Method::GET => match state.objects.get(&path) {
            Some(object) => Json(object.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Method::POST => {
            let Some(mut object) = body else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
            let key = format!("{path}/{name}");
            if state.objects.contains_key(&key) {
                return StatusCode::CONFLICT.into_response();
            }
            state.bump(&mut object);
            state.writes += 1;
            state.objects.insert(key, object.clone());
            (StatusCode::CREATED, Json(object)).into_response()
        }
        Method::PUT | Method::PATCH => {
            let Some(update) = body else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            let Some(stored) = state.objects.get(&path).cloned() else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let sent = update["metadata"]["resourceVersion"].as_str();
            let current = stored["metadata"]["resourceVersion"].as_str();
            if sent.is_some() && sent != current {
                return StatusCode::CONFLICT.into_response();
            }

            let mut object = if method == Method::PUT {
                update
            } else {
                let mut merged = stored;
                merge(&mut merged, &update);
                merged
            };
            state.bump(&mut object);
            state.writes += 1;
            state.objects.insert(path, object.clone());
            Json(object).into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// RFC 7386 JSON merge patch.
fn merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            if let Value::Object(map) = target {
                for (key, value) in entries {
                    if value.is_null() {
                        map.remove(key);
                    } else {
                        merge(map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}
