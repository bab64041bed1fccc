//! Reachability probe for the application under test

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

/// Polls a URL until the application answers
#[derive(Debug, Clone)]
pub struct TargetProbe {
    url: String,
    timeout: Duration,
    interval: Duration,
}

impl TargetProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            interval: Duration::from_millis(500),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait for any non-5xx response. Redirects are not followed: a signed-out
    /// app answering with a redirect to its sign-in page is up.
    pub async fn wait_until_reachable(&self) -> E2eResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let start = std::time::Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match client.get(&self.url).send().await {
                Ok(resp) if !resp.status().is_server_error() => {
                    info!("{} reachable ({}) after {} attempt(s)", self.url, resp.status(), attempts);
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("{} returned {}", self.url, resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for {} to come up...", self.url);
                    }
                    if !e.is_connect() {
                        warn!("Reachability check error: {}", e);
                    }
                }
            }

            if start.elapsed() >= self.timeout {
                return Err(E2eError::TargetUnreachable {
                    url: self.url.clone(),
                    attempts,
                });
            }
            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_redirect_counts_as_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 302 Found\r\nLocation: /sign-in\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        });

        let probe = TargetProbe::new(format!("http://{}/", addr), Duration::from_secs(5));
        probe.wait_until_reachable().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_reports_attempts() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let probe = TargetProbe::new(format!("http://127.0.0.1:{}/", port), Duration::from_millis(300))
            .with_interval(Duration::from_millis(50));
        match probe.wait_until_reachable().await {
            Err(E2eError::TargetUnreachable { attempts, .. }) => assert!(attempts >= 2),
            other => panic!("expected TargetUnreachable, got {:?}", other),
        }
    }
}
