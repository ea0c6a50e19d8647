use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Pipeline stage a scrape was abandoned at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Render,
    NoSearchResults,
    NoProductLink,
    Fetch,
    NoImage,
    Download,
    Store,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Render => "render",
            Stage::NoSearchResults => "no_search_results",
            Stage::NoProductLink => "no_product_link",
            Stage::Fetch => "fetch",
            Stage::NoImage => "no_image",
            Stage::Download => "download",
            Stage::Store => "store",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("browser session failed: {0}")]
    Render(String),
    #[error("vendor search returned no results")]
    NoSearchResults,
    #[error("no product detail link in rendered search page")]
    NoProductLink,
    #[error("detail page fetch failed: {0}")]
    Fetch(String),
    #[error("no product image on detail page")]
    NoImage,
    #[error("image download failed: {0}")]
    Download(String),
    #[error("record store failed: {0}")]
    Store(String),
}

impl ScrapeError {
    pub fn stage(&self) -> Stage {
        match self {
            ScrapeError::Render(_) => Stage::Render,
            ScrapeError::NoSearchResults => Stage::NoSearchResults,
            ScrapeError::NoProductLink => Stage::NoProductLink,
            ScrapeError::Fetch(_) => Stage::Fetch,
            ScrapeError::NoImage => Stage::NoImage,
            ScrapeError::Download(_) => Stage::Download,
            ScrapeError::Store(_) => Stage::Store,
        }
    }
}

/// Success carries the local image path.
pub type ScrapeOutcome = Result<PathBuf, ScrapeError>;
