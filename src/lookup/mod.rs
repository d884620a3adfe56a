//! Product Lookup Layer
//!
//! Resolves a normalized code to product metadata by walking an ordered
//! chain of external providers. The first provider with usable data wins;
//! a failing provider never aborts the chain.

pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use providers::{build_providers, ProviderKind};

/// Provider failures, always recovered inside the chain
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Missing API key for {0}")]
    MissingCredential(&'static str),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Canonical product metadata
///
/// All fields are independently optional; when every field is `None` the
/// lookup found nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl ProductInfo {
    /// True when no field carries data
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.brand.is_none()
            && self.description.is_none()
            && self.category.is_none()
    }
}

/// An external metadata source
///
/// Each provider owns its own notion of a hit: `Ok(None)` means the
/// provider answered but had nothing for this code.
#[async_trait]
pub trait ProductProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Look up product metadata for a normalized code
    async fn lookup(&self, code: &str) -> Result<Option<ProductInfo>, ProviderError>;
}

/// Ordered fallback chain of providers
pub struct ProviderChain {
    providers: Vec<Arc<dyn ProductProvider>>,
    /// Upper bound on a single provider call
    timeout: Duration,
}

impl ProviderChain {
    /// Create a chain querying `providers` in the given order
    pub fn new(providers: Vec<Arc<dyn ProductProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolve a normalized code, returning empty info if every provider misses
    pub async fn resolve(&self, code: &str) -> ProductInfo {
        let started = Instant::now();

        for provider in &self.providers {
            let name = provider.name();
            let outcome = match tokio::time::timeout(self.timeout, provider.lookup(code)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            match outcome {
                Ok(Some(product)) if !product.is_empty() => {
                    info!(
                        provider = name,
                        code = %code,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Product resolved"
                    );
                    return product;
                }
                Ok(_) => {
                    debug!(provider = name, code = %code, "No product data");
                }
                Err(e) => {
                    warn!(provider = name, code = %code, error = %e, "Provider lookup failed");
                }
            }
        }

        debug!(
            code = %code,
            providers = self.providers.len(),
            "All providers exhausted"
        );
        ProductInfo::default()
    }
}
