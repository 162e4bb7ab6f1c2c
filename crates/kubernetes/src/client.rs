//! Minimal Kubernetes REST client.
//!
//! Only what the adapters need: JSON `GET`, `POST`, `PUT`, and merge-patch
//! `PATCH` against the API server, with bearer-token auth and the cluster CA.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use thiserror::Error;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Errors building a [`KubeClient`].
#[derive(Debug, Error)]
pub enum KubeConfigError {
    /// A required in-cluster environment variable is not set.
    #[error("environment variable {0} is not set; not running in a pod?")]
    MissingEnv(&'static str),

    /// The service-account CA bundle could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The HTTP client could not be built (e.g. invalid CA bundle).
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure of a single API call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 404.
    #[error("not found")]
    NotFound,

    /// 409: the object changed since the `resourceVersion` we sent.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other non-success status.
    #[error("API server returned {status}: {body}")]
    Status {
        /// HTTP status.
        status: StatusCode,
        /// Response body, for the log.
        body: String,
    },

    /// Connection, TLS, timeout, token, or body decoding failure.
    #[error("request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
enum Token {
    None,
    Static(String),
    /// Projected service-account tokens rotate; re-read on every request.
    File(PathBuf),
}

/// A handle to one API server. Cheap to clone.
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: reqwest::Client,
    base_url: String,
    token: Token,
}

impl KubeClient {
    /// Client for an explicit API server URL, e.g. `kubectl proxy` or a test server.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, KubeConfigError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.map_or(Token::None, Token::Static),
        })
    }

    /// Client configured from the pod's service account.
    pub fn in_cluster() -> Result<Self, KubeConfigError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| KubeConfigError::MissingEnv("KUBERNETES_SERVICE_HOST"))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .map_err(|_| KubeConfigError::MissingEnv("KUBERNETES_SERVICE_PORT"))?;
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let ca_path = dir.join("ca.crt");
        let ca = std::fs::read(&ca_path).map_err(|source| KubeConfigError::Io {
            path: ca_path,
            source,
        })?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .add_root_certificate(reqwest::Certificate::from_pem(&ca)?)
            .build()?;

        Ok(Self {
            http,
            base_url: format!("https://{host}:{port}"),
            token: Token::File(dir.join("token")),
        })
    }

    pub(crate) async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.send(Method::GET, path, None, None).await
    }

    pub(crate) async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::POST, path, Some(body), None).await
    }

    pub(crate) async fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::PUT, path, Some(body), None).await
    }

    pub(crate) async fn merge_patch(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::PATCH, path, Some(body), Some(MERGE_PATCH)).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        content_type: Option<&str>,
    ) -> Result<Value, ApiError> {
        let mut request = self.http.request(method, format!("{}{}", self.base_url, path));

        if let Some(token) = self.bearer_token().await? {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(|e| ApiError::Transport(e.to_string()))?;
            request = request
                .header(CONTENT_TYPE, content_type.unwrap_or("application/json"))
                .body(bytes);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| ApiError::Transport(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ApiError::NotFound,
            StatusCode::CONFLICT => ApiError::Conflict(body),
            _ => ApiError::Status { status, body },
        })
    }

    async fn bearer_token(&self) -> Result<Option<String>, ApiError> {
        match &self.token {
            Token::None => Ok(None),
            Token::Static(token) => Ok(Some(token.clone())),
            Token::File(path) => tokio::fs::read_to_string(path)
                .await
                .map(|t| Some(t.trim().to_string()))
                .map_err(|e| ApiError::Transport(format!("failed to read {}: {e}", path.display()))),
        }
    }
}
