//! Page rendering over CDP.

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::Page;
use tracing::{debug, info, warn};

use super::{BrowserFetcher, RenderedPage};
use crate::error::ScrapeError;

const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// Closes the tab when the fetch finishes or is abandoned.
struct OpenPage {
    page: Option<Page>,
}

impl OpenPage {
    fn get(&self) -> Result<&Page, ScrapeError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScrapeError::browser("page already closed"))
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
    }
}

impl Drop for OpenPage {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            debug!("Closing abandoned page");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = page.close().await;
                });
            }
        }
    }
}

impl BrowserFetcher {
    /// Render `url` and return its HTML.
    pub async fn fetch(&mut self, url: &str) -> Result<RenderedPage, ScrapeError> {
        let opened = self.session().await?.new_page("about:blank").await;
        let page = match opened {
            Ok(page) => OpenPage { page: Some(page) },
            Err(e) => {
                self.reset();
                return Err(ScrapeError::browser(format!("Failed to open page: {}", e)));
            }
        };

        let result = self.render(page.get()?, url).await;
        page.close().await;

        if matches!(result, Err(ScrapeError::Browser { .. })) {
            // The session may be dead; reconnect on the next fetch.
            self.reset();
        }
        result
    }

    async fn render(&self, page: &Page, url: &str) -> Result<RenderedPage, ScrapeError> {
        page.execute(SetUserAgentOverrideParams::new(
            self.config.user_agent.clone(),
        ))
        .await
        .map_err(|e| ScrapeError::browser(format!("Failed to set user agent: {}", e)))?;

        info!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| ScrapeError::navigation(url, format!("Invalid URL: {}", e)))?;

        let navigation = page
            .execute(nav_params)
            .await
            .map_err(|e| ScrapeError::navigation(url, e.to_string()))?;
        if let Some(error_text) = navigation.result.error_text.clone() {
            return Err(ScrapeError::navigation(url, error_text));
        }

        let ready_timeout = Duration::from_secs(self.config.timeout);
        match tokio::time::timeout(
            ready_timeout,
            page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
        )
        .await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }

        if let Some(ref selector) = self.config.wait_for_selector {
            debug!("Waiting for selector: {}", selector);
            match tokio::time::timeout(ready_timeout, page.find_element(selector.as_str())).await {
                Ok(Ok(_)) => debug!("Selector found"),
                Ok(Err(e)) => debug!("Selector not found: {}", e),
                Err(_) => warn!("Timeout waiting for selector {}", selector),
            }
        }

        let final_url = page
            .url()
            .await
            .map_err(|e| ScrapeError::browser(format!("Failed to read page URL: {}", e)))?
            .map(|u| u.to_string())
            .unwrap_or_else(|| url.to_string());

        let content = page
            .content()
            .await
            .map_err(|e| ScrapeError::browser(format!("Failed to read page content: {}", e)))?;

        Ok(RenderedPage {
            url: url.to_string(),
            final_url,
            content,
        })
    }
}
