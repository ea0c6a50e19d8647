use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{AppConfig, GENERIC_UA};
use crate::error::ScrapeError;

/// Plain GET of a detail page; the vendor serves those fully formed.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(cfg: &AppConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(GENERIC_UA)
            .redirect(reqwest::redirect::Policy::limited(8))
            .timeout(cfg.fetch_timeout())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError> {
        info!(%url, "fetching detail page");
        let rsp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::Fetch(e.to_string()))?;

        // Capture before .text() consumes the response
        let status = rsp.status();
        let final_url = rsp.url().clone();
        let rsp = rsp
            .error_for_status()
            .map_err(|e| ScrapeError::Fetch(e.to_string()))?;
        let text = rsp
            .text()
            .await
            .map_err(|e| ScrapeError::Fetch(e.to_string()))?;

        debug!(%url, %status, %final_url, len = text.len(), "detail page fetched");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::tests::serve_once;

    #[tokio::test]
    async fn returns_body_on_success() {
        let base = serve_once("200 OK", b"<html><img src=\"/x.jpg\"></html>").await;
        let fetcher = HttpPageFetcher::new(&AppConfig::default()).unwrap();
        let html = fetcher.fetch_html(&format!("{base}/detail")).await.unwrap();
        assert!(html.contains("x.jpg"));
    }

    #[tokio::test]
    async fn non_success_status_is_a_fetch_failure() {
        let base = serve_once("503 Service Unavailable", b"busy").await;
        let fetcher = HttpPageFetcher::new(&AppConfig::default()).unwrap();
        let err = fetcher
            .fetch_html(&format!("{base}/detail"))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), crate::error::Stage::Fetch);
    }
}
