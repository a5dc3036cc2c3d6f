use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::FetchError;

/// The portal serves empty pages to clients it does not recognise.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Anything that can return the HTML behind a URL in one attempt.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ru-RU,ru"));
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let secs = timeout.as_secs();
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, secs))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(e, secs))?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyResponse);
        }
        Ok(body)
    }
}

/// Fetch with a fixed pause between attempts; only the last error surfaces.
pub async fn fetch_with_retry(
    source: &dyn PageSource,
    url: &str,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
) -> Result<String, FetchError> {
    let mut attempt = 0;
    loop {
        match source.fetch(url, timeout).await {
            Ok(body) => return Ok(body),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(
                    "Fetch failed for {} (attempt {}/{}): {}, retrying in {:.1}s",
                    url,
                    attempt,
                    retries + 1,
                    e,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub message: String,
}

impl Availability {
    fn down(message: impl Into<String>) -> Self {
        Availability {
            available: false,
            message: message.into(),
        }
    }
}

/// One short probe of the portal. A tiny body counts as down: that is what
/// soft blocks and maintenance pages look like.
pub async fn check_availability(
    source: &dyn PageSource,
    url: &str,
    timeout: Duration,
    min_chars: usize,
) -> Availability {
    let result = match source.fetch(url, timeout).await {
        Ok(body) if body.chars().count() >= min_chars => Availability {
            available: true,
            message: "site is reachable".to_string(),
        },
        Ok(_) | Err(FetchError::EmptyResponse) => Availability::down("site returned an empty page"),
        Err(e) => Availability::down(e.to_string()),
    };
    info!(available = result.available, "{}: {}", url, result.message);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Replays canned results in order, repeating the last one.
    struct Scripted {
        responses: Mutex<VecDeque<Result<String, FetchError>>>,
        pub calls: AtomicUsize,
    }

    impl Scripted {
        pub fn new(responses: Vec<Result<String, FetchError>>) -> Self {
            Scripted {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageSource for Scripted {
        async fn fetch(&self, _url: &str, _timeout: Duration) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut queue = self.responses.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        }
    }

    fn long_page() -> String {
        format!("<html><body>{}</body></html>", "ведомость ".repeat(20))
    }

    #[tokio::test]
    async fn retry_recovers_after_failures() {
        let source = Scripted::new(vec![
            Err(FetchError::Timeout(20)),
            Err(FetchError::Http(502)),
            Ok("<html>ok</html>".into()),
        ]);
        let body = fetch_with_retry(&source, "http://x", Duration::from_secs(1), 3, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(body, "<html>ok</html>");
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_surfaces_last_error() {
        let source = Scripted::new(vec![
            Err(FetchError::Http(500)),
            Err(FetchError::Network("reset".into())),
            Err(FetchError::Timeout(20)),
        ]);
        let err = fetch_with_retry(&source, "http://x", Duration::from_secs(1), 2, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout(20));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn availability_reports_timeout() {
        let source = Scripted::new(vec![Err(FetchError::Timeout(10))]);
        let a = check_availability(&source, "http://x", Duration::from_secs(10), 100).await;
        assert!(!a.available);
        assert!(a.message.contains("timeout"));
    }

    #[tokio::test]
    async fn availability_rejects_short_body() {
        let source = Scripted::new(vec![Ok("<html></html>".into())]);
        let a = check_availability(&source, "http://x", Duration::from_secs(10), 100).await;
        assert_eq!(a, Availability::down("site returned an empty page"));

        let source = Scripted::new(vec![Ok(long_page())]);
        let a = check_availability(&source, "http://x", Duration::from_secs(10), 100).await;
        assert!(a.available);
    }

    #[tokio::test]
    async fn availability_reports_http_status() {
        let source = Scripted::new(vec![Err(FetchError::Http(503))]);
        let a = check_availability(&source, "http://x", Duration::from_secs(10), 100).await;
        assert_eq!(a.message, "HTTP 503");
    }

    /// Serve one connection with a canned response; returns the URL and the
    /// raw request received.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/web/Ved/Default.aspx", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn http_fetcher_sends_browser_headers() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: 13\r\nConnection: close\r\n\r\n<html></html>",
        )
        .await;
        let fetcher = HttpFetcher::new().unwrap();
        let body = fetcher.fetch(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(body, "<html></html>");

        let request = server.await.unwrap().to_lowercase();
        assert!(request.contains("user-agent: mozilla/5.0"));
        assert!(request.contains("accept-language: ru-ru,ru"));
    }

    #[tokio::test]
    async fn http_fetcher_maps_status() {
        let (url, _server) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher.fetch(&url, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, FetchError::Http(503));
    }

    #[tokio::test]
    async fn http_fetcher_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher
            .fetch(&url, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)), "{err:?}");
    }
}
