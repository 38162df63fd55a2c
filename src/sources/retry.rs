//! Shared request retry loop for the REST/HTML clients. Timeouts,
//! connection failures and 5xx responses are retried with a linear
//! backoff; 4xx responses mean "no results" and are never retried.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::FetchError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff between attempts is `backoff_base * attempt`.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Raise the backoff base above the throttle's politeness delay, so
    /// every retry pause is longer than the pacing already applied between
    /// requests.
    pub fn slower_than(mut self, delay: Duration) -> Self {
        self.backoff_base = delay.saturating_add(self.backoff_base);
        self
    }
}

/// Send a request, retrying transient failures. Returns:
/// - `Ok(Some(response))` on a 2xx response,
/// - `Ok(None)` on a 4xx response (treated as "no results"),
/// - `Err(Transport)` once retries are exhausted.
pub async fn execute(
    policy: &RetryPolicy,
    source: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<Option<reqwest::Response>, FetchError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let req = request.try_clone().ok_or_else(|| FetchError::Transport {
            source_key: source,
            detail: "request body is not clonable".to_string(),
        })?;

        let last_detail = match req.send().await {
            Ok(resp) if resp.status().is_success() => return Ok(Some(resp)),
            Ok(resp) if resp.status().is_client_error() => {
                debug!(source, status = %resp.status(), "client error; treating as no results");
                return Ok(None);
            }
            Ok(resp) => format!("status {}", resp.status()),
            Err(e) => e.to_string(),
        };

        if attempt >= policy.max_attempts {
            return Err(FetchError::Transport {
                source_key: source,
                detail: last_detail,
            });
        }
        let pause = policy.backoff_base.saturating_mul(attempt);
        warn!(source, attempt, detail = %last_detail, backoff_ms = pause.as_millis() as u64, "retrying request");
        sleep(pause).await;
    }
}

// Canned HTTP responder on a loopback socket; enough to exercise the
// status-code branches without a real endpoint. Shared with the client
// modules' tests.
#[cfg(test)]
pub(crate) fn serve_responses(responses: Vec<(&'static str, &'static str)>) -> String {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    std::thread::spawn(move || {
        for (status, body) in responses {
            let (mut stream, _) = match listener.accept() {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let resp = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(resp.as_bytes());
        }
    });
    format!("http://{addr}/")
}
