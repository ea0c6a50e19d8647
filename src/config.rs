use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use ::config::{Config, Environment};
use serde::{Deserialize, Serialize};

// -------------------------
// Vendor constants (not configurable)
// -------------------------

pub const SEARCH_URL_TEMPLATE: &str =
    "https://minigt.tsm-models.com/index.php?action=product-search&keywords=";
/// Keep the trailing slash, URL joining relies on it.
pub const BASE_DOMAIN: &str = "https://minigt.tsm-models.com/";
pub const PRODUCT_LINK_MARKER: &str = "action=product-detail&";
pub const BRAND_PREFIX: &str = "Mini GT";

pub const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const GENERIC_UA: &str = "Mozilla/5.0";

pub const VIEWPORT_WIDTH: u32 = 1920;
pub const VIEWPORT_HEIGHT: u32 = 1080;

// -------------------------
// Runtime configuration
// -------------------------

/// Settings handed to every component constructor.
///
/// Defaults are overridden by `DIECAST_*` environment variables,
/// e.g. `DIECAST_PORT=8080` or `DIECAST_DB_PATH=/var/lib/diecast.db`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host used when building public image URLs.
    pub host: String,
    pub port: u16,
    /// Address the API server listens on.
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub image_dir: PathBuf,
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
    pub render_timeout_secs: u64,
    pub ready_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            bind_addr: "127.0.0.1".to_string(),
            db_path: PathBuf::from("diecast_collection.db"),
            image_dir: PathBuf::from("images/mini_gt"),
            chrome_executable: None,
            render_timeout_secs: 30,
            ready_timeout_secs: 10,
            fetch_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::from_env(Environment::with_prefix("DIECAST").try_parsing(true))
    }

    fn from_env(env: Environment) -> Result<Self> {
        Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(env)
            .build()
            .context("failed to assemble configuration")?
            .try_deserialize()
            .context("invalid DIECAST_* configuration")
    }

    pub fn search_url(&self, product_code: &str) -> String {
        format!("{SEARCH_URL_TEMPLATE}{product_code}")
    }

    pub fn image_path(&self, product_code: &str) -> PathBuf {
        self.image_dir.join(format!("{product_code}.jpg"))
    }

    /// Public URL the front-end uses to load a stored image.
    pub fn image_url(&self, product_code: &str) -> String {
        format!(
            "http://{}:{}/images/{}.jpg",
            self.host, self.port, product_code
        )
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Product codes end up as file names, so only a conservative alphabet passes.
pub fn is_valid_product_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= 64
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_vendor_and_public_urls() {
        let cfg = AppConfig::default();
        assert_eq!(
            cfg.search_url("MGT00123"),
            "https://minigt.tsm-models.com/index.php?action=product-search&keywords=MGT00123"
        );
        assert_eq!(
            cfg.image_url("MGT00123"),
            "http://localhost:5000/images/MGT00123.jpg"
        );
        assert_eq!(
            cfg.image_path("MGT00123"),
            PathBuf::from("images/mini_gt/MGT00123.jpg")
        );
    }

    #[test]
    fn environment_overrides_defaults() {
        let mut vars = ::config::Map::new();
        vars.insert("DIECAST_PORT".to_string(), "8080".to_string());
        vars.insert("DIECAST_DB_PATH".to_string(), "/tmp/diecast-test.db".to_string());

        let cfg = AppConfig::from_env(
            Environment::with_prefix("DIECAST")
                .try_parsing(true)
                .source(Some(vars)),
        )
        .unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/diecast-test.db"));
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.chrome_executable, None);
        assert_eq!(cfg.image_url("MGT00123"), "http://localhost:8080/images/MGT00123.jpg");
    }

    #[test]
    fn rejects_codes_that_escape_the_image_dir() {
        assert!(is_valid_product_code("MGT00123"));
        assert!(is_valid_product_code("mgt-001_b"));
        assert!(!is_valid_product_code(""));
        assert!(!is_valid_product_code("../etc/passwd"));
        assert!(!is_valid_product_code("a b"));
        assert!(!is_valid_product_code("x.jpg"));
    }
}
