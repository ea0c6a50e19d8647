use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::config::{AppConfig, BASE_DOMAIN, GENERIC_UA};
use crate::error::ScrapeError;

/// Turn a raw `src`/`href` into something fetchable.
///
/// Leading `/` and scheme-less values are prefixed with the vendor domain;
/// anything that already parses as a URL is kept.
pub fn absolute_url(raw: &str) -> String {
    if raw.starts_with('/') {
        format!("{}{}", BASE_DOMAIN, raw.trim_start_matches('/'))
    } else if Url::parse(raw).is_err() {
        format!("{BASE_DOMAIN}{raw}")
    } else {
        raw.to_string()
    }
}

#[async_trait]
pub trait ImageDownloader: Send + Sync {
    /// Store the image behind `src` as the file for `product_code`.
    async fn download(&self, src: &str, product_code: &str) -> Result<PathBuf, ScrapeError>;
}

pub struct HttpImageDownloader {
    client: reqwest::Client,
    cfg: AppConfig,
}

impl HttpImageDownloader {
    pub fn new(cfg: &AppConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(GENERIC_UA)
            .timeout(cfg.fetch_timeout())
            .build()?;
        Ok(Self {
            client,
            cfg: cfg.clone(),
        })
    }
}

#[async_trait]
impl ImageDownloader for HttpImageDownloader {
    async fn download(&self, src: &str, product_code: &str) -> Result<PathBuf, ScrapeError> {
        let url = absolute_url(src);
        info!(product_code, %url, "downloading image");

        let bytes = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|rsp| rsp.error_for_status())
            .map_err(|e| ScrapeError::Download(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| ScrapeError::Download(e.to_string()))?;

        let path = self.cfg.image_path(product_code);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| ScrapeError::Download(format!("{}: {e}", dir.display())))?;
        }

        // truncates any previous image for this code
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| ScrapeError::Download(format!("{}: {e}", path.display())))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| ScrapeError::Download(format!("{}: {e}", path.display())))?;
        file.flush()
            .await
            .map_err(|e| ScrapeError::Download(format!("{}: {e}", path.display())))?;

        debug!(product_code, bytes = bytes.len(), path = %path.display(), "image saved");
        Ok(path)
    }
}
