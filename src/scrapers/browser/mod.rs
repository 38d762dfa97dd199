//! Browser-backed page source.
//!
//! Each worker owns one CDP session, started on first use: a local Chrome,
//! or the remote DevTools endpoint named by `remote_url`.

mod config;
#[cfg(feature = "browser")]
mod fetch;
mod pool;

pub use config::BrowserEngineConfig;
pub use pool::BrowserPageSource;

#[cfg(feature = "browser")]
use std::path::PathBuf;
#[cfg(feature = "browser")]
use std::time::Duration;

#[cfg(feature = "browser")]
use chromiumoxide::{handler::HandlerConfig, Browser, BrowserConfig};
#[cfg(feature = "browser")]
use futures::{Stream, StreamExt};
#[cfg(feature = "browser")]
use tracing::{debug, info};
use url::Url;

use crate::error::ScrapeError;

/// HTML of a rendered page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub final_url: String,
    pub content: String,
}

/// Executable names looked up in `PATH`, most specific first.
#[cfg(feature = "browser")]
const CHROME_NAMES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
];

/// Install locations that are usually not on `PATH`.
#[cfg(feature = "browser")]
const CHROME_PATHS: &[&str] = &[
    "/opt/google/chrome/google-chrome",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

/// Flags for a locally launched Chrome: the fixed set, the proxy, then any
/// configured extras.
pub fn launch_args(config: &BrowserEngineConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "--disable-blink-features=AutomationControlled",
        "--disable-dev-shm-usage",
        "--no-first-run",
        "--no-default-browser-check",
        "--no-sandbox",
        "--disable-gpu",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();
    if let Some(proxy) = &config.proxy {
        args.push(format!("--proxy-server={}", proxy));
    }
    args.extend(config.chrome_args.iter().cloned());
    args
}

/// The `/json/version` endpoint of a DevTools URL given as ws(s) or http(s).
pub fn version_endpoint(remote_url: &str) -> Result<String, ScrapeError> {
    let mut url = Url::parse(remote_url)
        .map_err(|e| ScrapeError::browser(format!("Invalid DevTools URL {}: {}", remote_url, e)))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => {
            return Err(ScrapeError::browser(format!(
                "Unsupported DevTools scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ScrapeError::browser(format!("Cannot rewrite {}", remote_url)))?;
    url.set_path("/json/version");
    url.set_query(None);
    Ok(url.to_string())
}

#[cfg(feature = "browser")]
fn chrome_executable() -> Result<PathBuf, ScrapeError> {
    CHROME_NAMES
        .iter()
        .find_map(|name| which::which(name).ok())
        .or_else(|| {
            CHROME_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|path| path.exists())
        })
        .ok_or_else(|| {
            ScrapeError::browser(
                "Chrome/Chromium not found. Install it or set BROWSER_URL to a remote DevTools endpoint",
            )
        })
}

/// Poll the CDP event stream until the connection ends.
#[cfg(feature = "browser")]
fn drive<H, T, E>(mut handler: H)
where
    H: Stream<Item = Result<T, E>> + Unpin + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
        debug!("Browser connection closed");
    });
}

/// A single browser session.
#[cfg(feature = "browser")]
pub struct BrowserFetcher {
    config: BrowserEngineConfig,
    browser: Option<Browser>,
}

#[cfg(feature = "browser")]
impl BrowserFetcher {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self {
            config,
            browser: None,
        }
    }

    /// The live session, started if there is none.
    async fn session(&mut self) -> Result<&Browser, ScrapeError> {
        if self.browser.is_none() {
            let browser = match &self.config.remote_url {
                Some(remote_url) => Self::connect(remote_url, &self.config).await?,
                None => Self::launch(&self.config).await?,
            };
            self.browser = Some(browser);
        }
        self.browser
            .as_ref()
            .ok_or_else(|| ScrapeError::browser("Browser session unavailable"))
    }

    async fn launch(config: &BrowserEngineConfig) -> Result<Browser, ScrapeError> {
        let chrome = chrome_executable()?;
        info!(
            "Launching {} (headless={})",
            chrome.display(),
            config.headless
        );

        let mut builder = launch_args(config)
            .into_iter()
            .fold(BrowserConfig::builder().chrome_executable(chrome), |b, arg| {
                b.arg(arg)
            });
        if !config.headless {
            builder = builder.with_head();
        }
        let launch_config = builder
            .build()
            .map_err(|e| ScrapeError::browser(format!("Bad browser config: {}", e)))?;

        let (browser, handler) = Browser::launch(launch_config)
            .await
            .map_err(|e| ScrapeError::browser(format!("Failed to launch browser: {}", e)))?;
        drive(handler);
        Ok(browser)
    }

    async fn connect(remote_url: &str, config: &BrowserEngineConfig) -> Result<Browser, ScrapeError> {
        let endpoint = version_endpoint(remote_url)?;
        info!("Connecting to remote browser via {}", endpoint);

        let version: serde_json::Value = reqwest::get(&endpoint)
            .await
            .map_err(|e| ScrapeError::browser(format!("Failed to reach {}: {}", endpoint, e)))?
            .json()
            .await
            .map_err(|e| ScrapeError::browser(format!("Bad DevTools version info: {}", e)))?;
        let ws_url = version["webSocketDebuggerUrl"]
            .as_str()
            .ok_or_else(|| ScrapeError::browser("No webSocketDebuggerUrl in version info"))?;

        let handler_config = HandlerConfig {
            request_timeout: Duration::from_secs(config.timeout),
            ..Default::default()
        };
        let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| ScrapeError::browser(format!("Failed to connect to {}: {}", ws_url, e)))?;
        drive(handler);
        Ok(browser)
    }

    /// Drop the session so the next fetch starts a fresh one.
    pub fn reset(&mut self) {
        self.browser = None;
    }
}

#[cfg(not(feature = "browser"))]
pub struct BrowserFetcher;

#[cfg(not(feature = "browser"))]
impl BrowserFetcher {
    pub fn new(_config: BrowserEngineConfig) -> Self {
        Self
    }

    pub async fn fetch(&mut self, url: &str) -> Result<RenderedPage, ScrapeError> {
        Err(ScrapeError::browser(format!(
            "Browser support not compiled, cannot load {}. Rebuild with: cargo build --features browser",
            url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_args_append_proxy_and_extras() {
        let config = BrowserEngineConfig {
            proxy: Some("socks5://127.0.0.1:1080".to_string()),
            chrome_args: vec!["--lang=en-US".to_string()],
            ..Default::default()
        };
        let args = launch_args(&config);
        assert_eq!(args[0], "--disable-blink-features=AutomationControlled");
        assert_eq!(
            &args[args.len() - 2..],
            ["--proxy-server=socks5://127.0.0.1:1080", "--lang=en-US"]
        );
        assert!(!launch_args(&BrowserEngineConfig::default())
            .iter()
            .any(|a| a.starts_with("--proxy-server")));
    }

    #[test]
    fn test_version_endpoint() {
        assert_eq!(
            version_endpoint("ws://localhost:9222").unwrap(),
            "http://localhost:9222/json/version"
        );
        assert_eq!(
            version_endpoint("wss://chrome.internal/devtools/browser/abc?x=1").unwrap(),
            "https://chrome.internal/json/version"
        );
        assert_eq!(
            version_endpoint("http://10.0.0.5:9222/").unwrap(),
            "http://10.0.0.5:9222/json/version"
        );
        assert_eq!(
            version_endpoint("ftp://nope").unwrap_err().code(),
            "BROWSER_ERROR"
        );
    }
}
