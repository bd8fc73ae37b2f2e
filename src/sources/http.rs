//! Shared HTTP plumbing for the live adapters

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Build a client whose every call is bounded by `timeout`
pub fn build_client(timeout: Duration) -> Result<Client, FetchError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("ledger-export/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::internal(format!("failed to create HTTP client: {}", e)))
}

/// Map a non-success status to a fetch error kind
pub fn status_error(status: StatusCode, context: &str) -> FetchError {
    let message = format!("{} returned {}", context, status);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => FetchError::unavailable(format!("{} (rate limited)", message)),
        StatusCode::BAD_REQUEST => FetchError::invalid_account(message),
        s if s.is_server_error() => FetchError::unavailable(message),
        _ => FetchError::internal(message),
    }
}

/// Fail on non-success status; the upstream body goes to the log only
pub async fn check_status(response: Response, context: &str) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(
        "{} failed ({}): {}",
        context,
        status,
        body.chars().take(200).collect::<String>()
    );
    Err(status_error(status, context))
}

/// Send a request and decode its JSON body
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder, context: &str) -> Result<T, FetchError> {
    debug!("Requesting {}", context);
    let response = request.send().await?;
    let response = check_status(response, context).await?;
    Ok(response.json().await?)
}

/// Enforces a minimum spacing between calls to one upstream
///
/// Callers that share a throttle take turns: each `wait` reserves the next
/// slot and sleeps until it arrives.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;

    #[test]
    fn test_status_mapping() {
        let kind = |s| status_error(s, "test").kind;
        assert_eq!(kind(StatusCode::UNAUTHORIZED), FetchErrorKind::Unauthorized);
        assert_eq!(kind(StatusCode::FORBIDDEN), FetchErrorKind::Unauthorized);
        assert_eq!(kind(StatusCode::TOO_MANY_REQUESTS), FetchErrorKind::UpstreamUnavailable);
        assert_eq!(kind(StatusCode::BAD_GATEWAY), FetchErrorKind::UpstreamUnavailable);
        assert_eq!(kind(StatusCode::BAD_REQUEST), FetchErrorKind::InvalidAccount);
        assert_eq!(kind(StatusCode::NOT_FOUND), FetchErrorKind::InternalError);
    }

    #[tokio::test]
    async fn test_timeout_is_upstream_unavailable() {
        use axum::{routing::get, Router};

        let app = Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = build_client(Duration::from_millis(100)).unwrap();
        let err = send_json::<serde_json::Value>(client.get(format!("http://{}/", addr)), "slow upstream")
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::UpstreamUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_calls() {
        let throttle = Throttle::new(Duration::from_millis(250));
        let start = Instant::now();

        throttle.wait().await;
        throttle.wait().await;
        throttle.wait().await;

        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
