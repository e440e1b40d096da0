use crate::error::{Error, Result};
use crate::request::Request;
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::time::Duration;

/// What a downloader hands back for a successful request.
#[derive(Debug, Clone, Default)]
pub struct Download {
    pub status: u16,
    pub body: Vec<u8>,
    /// Requests discovered while handling this one.
    pub follow_ups: Vec<Request>,
}

/// Fetches the content behind a request. Any `Err` counts as a failed
/// attempt and goes through the frontier's retry path.
#[async_trait]
pub trait Downloader: Send + Sync {
    fn name(&self) -> String;
    async fn download(&self, request: &Request) -> Result<Download>;
}

/// Plain HTTP downloader. Content selection is left to whoever consumes
/// the body, so it never produces follow-up requests.
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn name(&self) -> String {
        "http".to_string()
    }

    async fn download(&self, request: &Request) -> Result<Download> {
        log::info!("Visiting: {}", request.url);

        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::Download(format!("Bad method {}: {}", request.method, e)))?;
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(Duration::from_millis(request.timeout_ms));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let res = builder.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(Error::Download(format!("HTTP error: {}", status)));
        }

        let body = res.bytes().await?.to_vec();
        log::debug!("{} returned {} bytes", request.url, body.len());

        Ok(Download {
            status: status.as_u16(),
            body,
            follow_ups: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn downloader() -> HttpDownloader {
        HttpDownloader::new("crawl-coordinator-test", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetches_body_with_method_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("x-token", "abc"))
            .and(body_string("q=rust"))
            .respond_with(ResponseTemplate::new(200).set_body_string("found"))
            .mount(&server)
            .await;

        let request = Request::builder("job", format!("{}/search", server.uri()))
            .method("POST")
            .header("x-token", "abc")
            .body("q=rust")
            .build()
            .unwrap();
        let download = downloader().download(&request).await.unwrap();
        assert_eq!(download.status, 200);
        assert_eq!(download.body, b"found");
        assert!(download.follow_ups.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let request = Request::get("job", format!("{}/missing", server.uri())).unwrap();
        let result = downloader().download(&request).await;
        assert!(matches!(result, Err(Error::Download(_))));
    }
}
