use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::download::{HttpImageDownloader, ImageDownloader};
use crate::error::{ScrapeError, ScrapeOutcome};
use crate::extract::extract;
use crate::fetch::{HttpPageFetcher, PageFetcher};
use crate::render::{ChromeRenderer, Renderer};
use crate::resolve::{SearchResult, resolve_product_link};
use crate::store::{ProductStore, SqliteRepository};

/// Render search -> resolve link -> fetch detail -> extract -> download -> upsert.
///
/// Stops at the first failing stage.
#[derive(Clone)]
pub struct Orchestrator {
    cfg: AppConfig,
    renderer: Arc<dyn Renderer>,
    fetcher: Arc<dyn PageFetcher>,
    downloader: Arc<dyn ImageDownloader>,
    store: Arc<dyn ProductStore>,
}

impl Orchestrator {
    pub fn new(
        cfg: &AppConfig,
        renderer: Arc<dyn Renderer>,
        fetcher: Arc<dyn PageFetcher>,
        downloader: Arc<dyn ImageDownloader>,
        store: Arc<dyn ProductStore>,
    ) -> Self {
        Self {
            cfg: cfg.clone(),
            renderer,
            fetcher,
            downloader,
            store,
        }
    }

    /// Wire up Chrome, reqwest and SQLite from configuration.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self::new(
            cfg,
            Arc::new(ChromeRenderer::new(cfg)),
            Arc::new(HttpPageFetcher::new(cfg)?),
            Arc::new(HttpImageDownloader::new(cfg)?),
            Arc::new(SqliteRepository::new(cfg)),
        ))
    }

    pub fn store(&self) -> &Arc<dyn ProductStore> {
        &self.store
    }

    pub async fn scrape(&self, product_code: &str) -> ScrapeOutcome {
        let started = Instant::now();
        let outcome = self.run_stages(product_code).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(path) => info!(
                product_code,
                path = %path.display(),
                elapsed_ms,
                "scrape finished"
            ),
            Err(e) => warn!(
                product_code,
                stage = %e.stage(),
                error = %e,
                elapsed_ms,
                "scrape aborted"
            ),
        }
        outcome
    }

    async fn run_stages(&self, product_code: &str) -> ScrapeOutcome {
        let search_url = self.cfg.search_url(product_code);
        let rendered = self.renderer.render(&search_url).await?;

        let detail_url = match resolve_product_link(&rendered) {
            SearchResult::Found(url) => url,
            SearchResult::NoResults => return Err(ScrapeError::NoSearchResults),
            SearchResult::Unrecognized => return Err(ScrapeError::NoProductLink),
        };
        info!(product_code, %detail_url, "product page located");

        let html = self.fetcher.fetch_html(&detail_url).await?;

        let found = extract(&html, product_code).ok_or(ScrapeError::NoImage)?;
        info!(
            product_code,
            name = %found.display_name,
            source = ?found.name_source,
            src = %found.image_src,
            "detail page extracted"
        );

        let path = self
            .downloader
            .download(&found.image_src, product_code)
            .await?;

        self.store
            .upsert_scraped(product_code, &found.display_name, &path)
            .await
            .map_err(|e| ScrapeError::Store(format!("{e:#}")))?;

        Ok(path)
    }
}
