use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Session, SessionFactory, POLL_INTERVAL};

/// Launches a dedicated headless Chrome for every session.
pub struct ChromeFactory {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub request_timeout: Duration,
}

#[async_trait]
impl SessionFactory for ChromeFactory {
    async fn open(&self) -> Result<Box<dyn Session>> {
        info!("Launching browser (headless={})", self.headless);

        let mut builder = BrowserConfig::builder()
            .request_timeout(self.request_timeout)
            .window_size(1920, 1080)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");
        if let Some(ref path) = self.executable {
            builder = builder.chrome_executable(path);
        }
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open page")?;

        Ok(Box::new(ChromeSession {
            browser,
            page,
            handler,
        }))
    }
}

struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

#[async_trait]
impl Session for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("Navigating to {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.page.find_element(selector).await?.click().await?;
        Ok(())
    }

    async fn press_key(&mut self, selector: &str, key: &str) -> Result<()> {
        let el = self.page.find_element(selector).await?;
        el.focus().await?;
        el.press_key(key).await?;
        Ok(())
    }

    async fn scroll_into_view(&mut self, selector: &str) -> Result<()> {
        self.page
            .find_element(selector)
            .await?
            .scroll_into_view()
            .await?;
        Ok(())
    }

    async fn read_attribute(&mut self, selector: &str, attr: &str) -> Result<Option<String>> {
        let el = self.page.find_element(selector).await?;
        Ok(el.attribute(attr).await?)
    }

    async fn read_outer_html(&mut self, selector: &str) -> Result<Option<String>> {
        let el = self.page.find_element(selector).await?;
        Ok(el.outer_html().await?)
    }

    async fn read_all(&mut self, selector: &str, attr: &str) -> Result<Vec<String>> {
        let mut values = Vec::new();
        for el in self.page.find_elements(selector).await? {
            if let Some(v) = el.attribute(attr).await? {
                values.push(v);
            }
        }
        Ok(values)
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let closed = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler.abort();
        closed.context("Failed to close browser")?;
        Ok(())
    }
}
