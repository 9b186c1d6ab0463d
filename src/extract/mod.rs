pub mod botwall;
pub mod dom;
pub mod locale;
pub mod network;
pub mod product_name;
pub mod scoring;

use crate::browser::RenderSession;
use crate::error::ExtractError;
use crate::model::ExtractionResult;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NetworkSettings {
    /// How long to keep listening for responses after the page settled.
    pub capture_window: Duration,
    pub default_currency: String,
    pub default_confidence: f64,
}

/// The network branch: captured responses first, then data embedded in the
/// HTML, then the DOM scorer as a last resort.
pub struct NetworkExtractor {
    settings: NetworkSettings,
}

impl NetworkExtractor {
    pub fn new(settings: NetworkSettings) -> Self {
        Self { settings }
    }

    pub async fn extract(
        &self,
        session: &dyn RenderSession,
        url: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        tokio::time::sleep(self.settings.capture_window).await;

        let currency = self.settings.default_currency.as_str();
        let confidence = self.settings.default_confidence;

        match session.captured_responses().await {
            Ok(responses) => {
                if let Some(result) = network::from_responses(&responses, currency, confidence) {
                    return Ok(result);
                }
                tracing::debug!("No price in {} captured responses", responses.len());
            }
            Err(e) => tracing::warn!("Could not read captured responses: {}", e),
        }

        let html = session
            .html()
            .await
            .map_err(|e| ExtractError::Render(e.to_string()))?;
        if let Some(result) = network::from_embedded_data(&html, currency, confidence) {
            return Ok(result);
        }

        let title = session.title().await.unwrap_or_default();
        let report = botwall::detect(&title, &dom::page_text(&html));
        if report.is_blocked {
            tracing::warn!("Skipping DOM fallback, page looks blocked: {}", report.summary());
            return Err(ExtractError::Blocked(report.summary()));
        }

        let name = self.product_name(session, url, &title).await;
        tracing::debug!("DOM fallback with product name hint {:?}", name);
        dom::extract(&html, &name, currency)
    }

    async fn product_name(&self, session: &dyn RenderSession, url: &str, title: &str) -> String {
        if let Some(name) = product_name::from_url(url) {
            return name;
        }

        let mut headings = Vec::new();
        for selector in product_name::NAME_SELECTORS {
            match session.query_text(selector).await {
                Ok(texts) => headings.extend(texts),
                Err(e) => tracing::debug!("Name selector {} failed: {}", selector, e),
            }
        }
        product_name::from_page(&headings, title).unwrap_or_default()
    }
}
