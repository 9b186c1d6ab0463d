use crate::browser::{CapturedResponse, RenderSession, Renderer};
use crate::error::PriceWatchError;
use crate::extract::botwall;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Records JSON-looking fetch/XHR response bodies into `window.__pwResponses`.
const TRAFFIC_OBSERVER: &str = r#"
(function() {
    if (window.__pwResponses) return;
    window.__pwResponses = [];
    const MAX_ENTRIES = 200;
    const MAX_BODY = 512 * 1024;
    const keep = (url, body) => {
        if (typeof body !== 'string' || body.length > MAX_BODY) return;
        const head = body.trimStart().charAt(0);
        if (head !== '{' && head !== '[') return;
        if (window.__pwResponses.length >= MAX_ENTRIES) return;
        window.__pwResponses.push({ url: String(url), body: body });
    };

    const originalFetch = window.fetch;
    if (originalFetch) {
        window.fetch = function(...args) {
            return originalFetch.apply(this, args).then(response => {
                try {
                    response.clone().text().then(text => keep(response.url, text)).catch(() => {});
                } catch (e) {}
                return response;
            });
        };
    }

    const originalOpen = XMLHttpRequest.prototype.open;
    const originalSend = XMLHttpRequest.prototype.send;
    XMLHttpRequest.prototype.open = function(method, url, ...rest) {
        this.__pwUrl = url;
        return originalOpen.call(this, method, url, ...rest);
    };
    XMLHttpRequest.prototype.send = function(...args) {
        this.addEventListener('load', () => {
            try {
                if (this.responseType === '' || this.responseType === 'text') {
                    keep(this.__pwUrl, this.responseText);
                }
            } catch (e) {}
        });
        return originalSend.apply(this, args);
    };
})();
"#;

const STEALTH: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = { runtime: {} };
"#;

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub headed: bool,
    pub settle_delay: Duration,
    pub challenge_wait: Duration,
}

pub struct ChromiumRenderer {
    browser: Arc<Mutex<Browser>>,
    _handle: tokio::task::JoinHandle<()>,
    user_data_dir: PathBuf,
    settings: RenderSettings,
}

impl ChromiumRenderer {
    pub async fn launch(
        chrome_path: PathBuf,
        settings: RenderSettings,
    ) -> Result<Self, PriceWatchError> {
        // Unique profile dir so concurrent runs never share a SingletonLock
        let user_data_dir = std::env::temp_dir().join(format!(
            "pricewatch-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis()
        ));
        std::fs::create_dir_all(&user_data_dir).map_err(|e| {
            PriceWatchError::BrowserLaunch(format!(
                "Failed to create user data dir {}: {}",
                user_data_dir.display(),
                e
            ))
        })?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(user_data_dir.clone())
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--user-agent=Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-renderer-backgrounding")
            .arg("--window-size=1920,1080")
            .viewport(None);

        if !settings.headed {
            builder = builder.arg("--headless=new");
        }

        let browser_config = builder
            .build()
            .map_err(|e| PriceWatchError::BrowserLaunch(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| PriceWatchError::BrowserLaunch(e.to_string()))?;

        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                tracing::trace!("Browser event: {:?}", event);
            }
        });

        Ok(ChromiumRenderer {
            browser: Arc::new(Mutex::new(browser)),
            _handle: handle,
            user_data_dir,
            settings,
        })
    }

    pub async fn shutdown(&self) -> Result<(), PriceWatchError> {
        let mut browser = self.browser.lock().await;
        browser
            .close()
            .await
            .map_err(|e| PriceWatchError::Render(format!("Failed to close browser: {}", e)))?;
        drop(browser);

        // Chrome subprocesses hold file locks for a moment after close
        tokio::time::sleep(Duration::from_millis(500)).await;

        if self.user_data_dir.exists() {
            for attempt in 1..=3 {
                match std::fs::remove_dir_all(&self.user_data_dir) {
                    Ok(_) => break,
                    Err(e) if attempt < 3 => {
                        tracing::debug!(
                            "Cleanup attempt {}/3 for {}: {}, retrying...",
                            attempt,
                            self.user_data_dir.display(),
                            e
                        );
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    Err(_) => {
                        tracing::debug!(
                            "Could not clean up temp dir {}, leaving it to the OS",
                            self.user_data_dir.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn open(&self) -> Result<Box<dyn RenderSession>, PriceWatchError> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| PriceWatchError::Render(format!("Failed to create page: {}", e)))?;

        if let Err(e) = page
            .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH))
            .await
        {
            tracing::debug!("Stealth script not installed: {}", e);
        }

        Ok(Box::new(ChromiumSession {
            page,
            settings: self.settings.clone(),
        }))
    }
}

pub struct ChromiumSession {
    page: Page,
    settings: RenderSettings,
}

impl ChromiumSession {
    async fn eval_string(&self, script: &str) -> Result<String, PriceWatchError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| PriceWatchError::Render(format!("Script evaluation failed: {}", e)))?
            .into_value::<String>()
            .map_err(|e| PriceWatchError::Render(format!("Unexpected script result: {}", e)))
    }

    async fn is_challenge(&self) -> bool {
        match self.eval_string("document.title").await {
            Ok(title) => botwall::is_challenge_title(&title),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn install_traffic_observer(&self) -> Result<(), PriceWatchError> {
        self.page
            .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
                TRAFFIC_OBSERVER,
            ))
            .await
            .map_err(|e| PriceWatchError::Render(format!("Failed to install observer: {}", e)))?;
        Ok(())
    }

    async fn load(&self, url: &str) -> Result<(), PriceWatchError> {
        tracing::info!("Navigating to: {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| PriceWatchError::Render(format!("Failed to navigate to {}: {}", url, e)))?;
        Ok(())
    }

    async fn wait_settled(&self) -> Result<(), PriceWatchError> {
        tokio::time::sleep(self.settings.settle_delay).await;

        // document.readyState === 'complete', up to 10s
        for _ in 0..20 {
            let ready = self
                .eval_string("document.readyState")
                .await
                .unwrap_or_default();
            if ready == "complete" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        if self.is_challenge().await {
            tracing::info!(
                "Challenge page detected, waiting up to {:?}",
                self.settings.challenge_wait
            );
            let checks = self.settings.challenge_wait.as_secs().max(1);
            for _ in 0..checks {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if !self.is_challenge().await {
                    tracing::info!("Challenge page cleared");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PriceWatchError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| PriceWatchError::Render(format!("Screenshot failed: {}", e)))
    }

    async fn query_text(&self, selector: &str) -> Result<Vec<String>, PriceWatchError> {
        let script = format!(
            "Array.from(document.querySelectorAll({})).map(e => (e.innerText || e.textContent || '').trim())",
            serde_json::to_string(selector)?
        );
        self.page
            .evaluate(script)
            .await
            .map_err(|e| PriceWatchError::Render(format!("Query failed: {}", e)))?
            .into_value::<Vec<String>>()
            .map_err(|e| PriceWatchError::Render(format!("Unexpected query result: {}", e)))
    }

    async fn html(&self) -> Result<String, PriceWatchError> {
        self.page
            .content()
            .await
            .map_err(|e| PriceWatchError::Render(format!("Failed to get page content: {}", e)))
    }

    async fn title(&self) -> Result<String, PriceWatchError> {
        self.eval_string("document.title").await
    }

    async fn captured_responses(&self) -> Result<Vec<CapturedResponse>, PriceWatchError> {
        let raw = self
            .eval_string("JSON.stringify(window.__pwResponses || [])")
            .await?;
        let responses: Vec<CapturedResponse> = serde_json::from_str(&raw)?;
        tracing::debug!("Observer captured {} responses", responses.len());
        Ok(responses)
    }

    async fn close(self: Box<Self>) -> Result<(), PriceWatchError> {
        self.page
            .close()
            .await
            .map_err(|e| PriceWatchError::Render(format!("Failed to close page: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a local Chrome install.
    #[tokio::test]
    #[ignore]
    async fn test_observer_captures_fetch_bodies() {
        let chrome = crate::browser::resolve::resolve_chrome(None).unwrap();
        let renderer = ChromiumRenderer::launch(
            chrome,
            RenderSettings {
                headed: false,
                settle_delay: Duration::from_millis(200),
                challenge_wait: Duration::from_secs(1),
            },
        )
        .await
        .unwrap();

        let session = renderer.open().await.unwrap();
        session.install_traffic_observer().await.unwrap();
        session
            .load("data:text/html,<script>fetch('data:application/json,{\"price\":5}')</script>")
            .await
            .unwrap();
        session.wait_settled().await.unwrap();
        let responses = session.captured_responses().await.unwrap();
        assert!(responses.iter().any(|r| r.body.contains("price")));
        session.close().await.unwrap();
        renderer.shutdown().await.unwrap();
    }
}
