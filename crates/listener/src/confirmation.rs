//! Subscription confirmation.
//!
//! SNS activates an HTTP subscription only after the endpoint fetches the
//! `SubscribeURL` it was sent. One attempt per delivery; SNS redelivers the
//! handshake if we answer with an error.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Why a confirmation was not delivered.
#[derive(Debug, Error)]
pub enum ConfirmationError {
    /// The `SubscribeURL` is not an absolute http(s) URL.
    #[error("invalid confirmation URL '{0}'")]
    InvalidTarget(String),

    /// Connection, TLS, or timeout failure.
    #[error("confirmation request failed: {0}")]
    Transport(String),

    /// The target answered with a non-2xx status.
    #[error("confirmation endpoint returned {0}")]
    Status(u16),
}

/// Delivers the confirmation GET.
#[async_trait]
pub trait SubscriptionConfirmer: Send + Sync {
    /// Fetches `target`; succeeds on any 2xx.
    async fn confirm(&self, target: &str) -> Result<(), ConfirmationError>;
}

/// [`SubscriptionConfirmer`] using a plain `reqwest` GET with no custom headers.
#[derive(Debug, Clone)]
pub struct HttpConfirmer {
    http: reqwest::Client,
}

impl HttpConfirmer {
    /// Builds a confirmer whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl SubscriptionConfirmer for HttpConfirmer {
    async fn confirm(&self, target: &str) -> Result<(), ConfirmationError> {
        let url = reqwest::Url::parse(target)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| ConfirmationError::InvalidTarget(target.to_string()))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ConfirmationError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ConfirmationError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    use super::*;

    async fn stub(status: StatusCode, hits: Arc<AtomicUsize>) -> String {
        let router = Router::new().route(
            "/confirm",
            get(move || {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}/confirm")
    }

    fn confirmer() -> HttpConfirmer {
        HttpConfirmer::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn success_status_confirms() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = stub(StatusCode::OK, Arc::clone(&hits)).await;

        confirmer().confirm(&url).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_status_is_reported_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = stub(StatusCode::FORBIDDEN, Arc::clone(&hits)).await;

        let err = confirmer().confirm(&url).await.unwrap_err();
        assert!(matches!(err, ConfirmationError::Status(403)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_target_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = confirmer()
            .confirm(&format!("http://{addr}/confirm"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmationError::Transport(_)));
    }

    #[tokio::test]
    async fn non_http_targets_are_rejected_without_a_request() {
        for target in ["not a url", "file:///etc/passwd"] {
            assert!(matches!(
                confirmer().confirm(target).await,
                Err(ConfirmationError::InvalidTarget(_))
            ));
        }
    }
}
