//! Headless browser driver
//!
//! [`BrowserDriver`] is the seam between the fetch policy and the actual
//! browser. [`ChromiumDriver`] drives Chrome over CDP: each render opens a
//! fresh page (one execution context), applies the stealth profile,
//! navigates under a timeout and closes the page again on every path.

use crate::config::BrowserConfig;
use crate::crawler::fetcher::FetchError;
use crate::crawler::stealth::ContextProfile;
use crate::HarvestError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, SetBlockedUrLsParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Renders a URL to its final DOM as HTML
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Opens an execution context with `profile`, navigates to `url`, waits
    /// for the render to settle and returns the document HTML.
    ///
    /// The context must be released before returning, whatever the outcome.
    async fn render(&self, url: &Url, profile: &ContextProfile) -> Result<String, FetchError>;
}

fn classify_cdp(url: &Url, error: CdpError) -> FetchError {
    match error {
        CdpError::Timeout => FetchError::Timeout {
            url: url.to_string(),
            detail: "browser reported timeout".to_string(),
        },
        other => FetchError::Transient {
            url: url.to_string(),
            detail: other.to_string(),
        },
    }
}

/// Chrome/Chromium over the DevTools protocol
pub struct ChromiumDriver {
    browser: Browser,
    handler: JoinHandle<()>,
    page_timeout: Duration,
}

impl ChromiumDriver {
    /// Launches the browser and starts its event loop
    pub async fn launch(config: &BrowserConfig) -> Result<Self, HarvestError> {
        let mut builder = ChromeConfig::builder()
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--mute-audio")
            .arg("--lang=vi-VN");

        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }

        let chrome_config = builder.build().map_err(HarvestError::Browser)?;
        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| HarvestError::Browser(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {}", e);
                }
            }
        });

        info!(
            "Browser launched (headless: {}, page timeout: {}s)",
            config.headless, config.page_timeout_secs
        );

        Ok(Self {
            browser,
            handler,
            page_timeout: Duration::from_secs(config.page_timeout_secs),
        })
    }

    /// Closes the browser process and stops the event loop
    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser process wait failed: {}", e);
        }
        self.handler.abort();
    }

    async fn prepare(&self, page: &Page, profile: &ContextProfile) -> Result<(), CdpError> {
        page.execute(EnableParams::default()).await?;
        page.execute(SetUserAgentOverrideParams::new(profile.user_agent.clone()))
            .await?;
        if !profile.blocked_url_patterns.is_empty() {
            page.execute(SetBlockedUrLsParams::new(profile.blocked_url_patterns.clone()))
                .await?;
        }
        let (width, height) = profile.viewport;
        page.execute(SetDeviceMetricsOverrideParams::new(
            width as i64,
            height as i64,
            1.0,
            false,
        ))
        .await?;
        page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
            profile.init_script,
        ))
        .await?;
        Ok(())
    }

    async fn navigate(&self, page: &Page, url: &Url, profile: &ContextProfile) -> Result<String, CdpError> {
        self.prepare(page, profile).await?;
        page.goto(url.as_str()).await?;
        page.content().await
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn render(&self, url: &Url, profile: &ContextProfile) -> Result<String, FetchError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| classify_cdp(url, e))?;

        let outcome = tokio::time::timeout(self.page_timeout, self.navigate(&page, url, profile)).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close page for {}: {}", url, e);
        }

        match outcome {
            Ok(Ok(html)) => Ok(html),
            Ok(Err(e)) => Err(classify_cdp(url, e)),
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                detail: format!("no render within {}s", self.page_timeout.as_secs()),
            }),
        }
    }
}

impl std::fmt::Debug for ChromiumDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumDriver")
            .field("page_timeout", &self.page_timeout)
            .finish_non_exhaustive()
    }
}
