//! Page rendering abstraction.
//!
//! The engine only needs a handful of primitives from a browser: load a page,
//! wait for it to settle, take a screenshot, read element text and see the
//! network responses the page received. `session` implements them over
//! Chromium; tests substitute scripted fakes.

pub mod resolve;
pub mod session;

use crate::error::PriceWatchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A response body seen by the traffic observer while the page rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub url: String,
    pub body: String,
}

/// A browser able to open isolated rendering sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RenderSession>, PriceWatchError>;
}

/// One tab. Methods are called in roughly the order listed.
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Start recording response bodies. Must run before `load`.
    async fn install_traffic_observer(&self) -> Result<(), PriceWatchError>;
    async fn load(&self, url: &str) -> Result<(), PriceWatchError>;
    /// Wait for the document to finish loading and any challenge interstitial to clear.
    async fn wait_settled(&self) -> Result<(), PriceWatchError>;
    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, PriceWatchError>;
    async fn query_text(&self, selector: &str) -> Result<Vec<String>, PriceWatchError>;
    async fn html(&self) -> Result<String, PriceWatchError>;
    async fn title(&self) -> Result<String, PriceWatchError>;
    async fn captured_responses(&self) -> Result<Vec<CapturedResponse>, PriceWatchError>;
    async fn close(self: Box<Self>) -> Result<(), PriceWatchError>;
}
