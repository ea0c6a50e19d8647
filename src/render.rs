use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, DESKTOP_UA, VIEWPORT_HEIGHT, VIEWPORT_WIDTH};
use crate::error::ScrapeError;
use crate::resolve::readiness_script;

const READY_POLL: Duration = Duration::from_millis(250);

/// Runs a page's scripts and hands back the resulting markup.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, ScrapeError>;
}

/// One headless Chrome per call, released on every exit path.
pub struct ChromeRenderer {
    cfg: AppConfig,
}

impl ChromeRenderer {
    pub fn new(cfg: &AppConfig) -> Self {
        Self { cfg: cfg.clone() }
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<String, ScrapeError> {
        let started = Instant::now();
        let lease = BrowserLease::launch(&self.cfg).await?;

        let captured = tokio::time::timeout(
            self.cfg.render_timeout(),
            capture(&lease.browser, url, self.cfg.ready_timeout()),
        )
        .await;
        lease.release().await;

        let (html, ready) = match captured {
            Ok(res) => res?,
            Err(_) => {
                return Err(ScrapeError::Render(format!(
                    "render exceeded {}s",
                    self.cfg.render_timeout_secs
                )));
            }
        };

        info!(
            %url,
            len = html.len(),
            ready,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search page rendered"
        );
        Ok(html)
    }
}

// -------------------------
// Browser lease
// -------------------------

struct BrowserLease {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserLease {
    async fn launch(cfg: &AppConfig) -> Result<Self, ScrapeError> {
        let mut builder = BrowserConfig::builder()
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .viewport(Viewport {
                width: VIEWPORT_WIDTH,
                height: VIEWPORT_HEIGHT,
                ..Viewport::default()
            })
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if let Some(path) = &cfg.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(ScrapeError::Render)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::Render(format!("could not start browser: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "cdp handler event error");
                }
            }
        });

        debug!("browser session started");
        Ok(Self { browser, handler })
    }

    async fn release(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "browser close failed");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "browser process did not exit cleanly");
        }
        debug!("browser session released");
    }
}

impl Drop for BrowserLease {
    // Browser kills its child on drop; the handler task has to go too.
    fn drop(&mut self) {
        self.handler.abort();
    }
}

// -------------------------
// Page capture
// -------------------------

fn cdp_err(e: impl std::fmt::Display) -> ScrapeError {
    ScrapeError::Render(e.to_string())
}

/// Rendered markup plus whether the readiness predicate held before capture.
async fn capture(
    browser: &Browser,
    url: &str,
    ready_timeout: Duration,
) -> Result<(String, bool), ScrapeError> {
    let page = browser.new_page("about:blank").await.map_err(cdp_err)?;
    page.execute(SetUserAgentOverrideParams::new(DESKTOP_UA))
        .await
        .map_err(cdp_err)?;

    info!(%url, "loading search page");
    page.goto(url).await.map_err(cdp_err)?;

    let ready = wait_until_ready(&page, ready_timeout).await;
    let html = page.content().await.map_err(cdp_err)?;
    Ok((html, ready))
}

/// Poll the readiness predicate until it holds or `limit` passes.
///
/// Timing out is not fatal: whatever has rendered so far is captured and the
/// link resolver decides.
async fn wait_until_ready(page: &Page, limit: Duration) -> bool {
    let script = readiness_script();
    let started = Instant::now();

    let polled = tokio::time::timeout(limit, async {
        loop {
            match page.evaluate(script.clone()).await {
                Ok(v) if predicate_held(v.value()) => return,
                Ok(_) => {}
                Err(e) => debug!(error = %e, "readiness probe failed"),
            }
            sleep(READY_POLL).await;
        }
    })
    .await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match polled {
        Ok(()) => {
            debug!(elapsed_ms, "search page ready");
            true
        }
        Err(_) => {
            warn!(elapsed_ms, "search page readiness timed out, capturing anyway");
            false
        }
    }
}

/// Anything but a literal `true` means not ready yet.
fn predicate_held(value: Option<&serde_json::Value>) -> bool {
    value.and_then(serde_json::Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn only_a_true_predicate_counts_as_ready() {
        assert!(predicate_held(Some(&json!(true))));
        assert!(!predicate_held(Some(&json!(false))));
        assert!(!predicate_held(Some(&json!("true"))));
        assert!(!predicate_held(Some(&serde_json::Value::Null)));
        assert!(!predicate_held(None));
    }

    #[tokio::test]
    async fn missing_browser_binary_is_a_render_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig {
            chrome_executable: Some(dir.path().join("no-such-chrome")),
            render_timeout_secs: 5,
            ..AppConfig::default()
        };
        let err = ChromeRenderer::new(&cfg)
            .render("https://minigt.tsm-models.com/")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Render(_)));
    }
}
