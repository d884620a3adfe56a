//! HTTP product metadata providers
//!
//! One adapter per public API. Each adapter knows its endpoint, its own
//! "is this a hit" test and how its fields map onto [`ProductInfo`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ProductInfo, ProductProvider, ProviderError};
use crate::config::{LookupConfig, ProviderSettings};

/// Supported metadata APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// barcode.monster
    BarcodeMonster,
    /// UPCitemdb trial endpoint
    UpcItemDb,
    /// Open Food Facts product database
    OpenFoodFacts,
    /// barcodelookup.com (API key required)
    BarcodeLookup,
    /// Google Shopping through SerpApi (API key required)
    SerpApiShopping,
}

impl ProviderKind {
    /// Default chain order
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::BarcodeMonster,
        ProviderKind::UpcItemDb,
        ProviderKind::OpenFoodFacts,
        ProviderKind::BarcodeLookup,
        ProviderKind::SerpApiShopping,
    ];

    /// Name used in logs and configuration
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::BarcodeMonster => "barcode_monster",
            ProviderKind::UpcItemDb => "upcitemdb",
            ProviderKind::OpenFoodFacts => "open_food_facts",
            ProviderKind::BarcodeLookup => "barcode_lookup",
            ProviderKind::SerpApiShopping => "serpapi_shopping",
        }
    }

    /// Whether the API refuses requests without a key
    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProviderKind::BarcodeLookup | ProviderKind::SerpApiShopping)
    }

    /// Environment variable consulted when the config has no key
    pub fn api_key_env(&self) -> String {
        format!("SHELFSCAN_{}_KEY", self.name().to_ascii_uppercase())
    }

    /// Endpoint queried for this API
    pub fn base_url(&self) -> &'static str {
        match self {
            ProviderKind::BarcodeMonster => "https://barcode.monster/api",
            ProviderKind::UpcItemDb => "https://api.upcitemdb.com/prod/trial/lookup",
            ProviderKind::OpenFoodFacts => "https://world.openfoodfacts.org/api/v0/product",
            ProviderKind::BarcodeLookup => "https://api.barcodelookup.com/v3/products",
            ProviderKind::SerpApiShopping => "https://serpapi.com/search",
        }
    }

    /// Map a decoded response body onto product info, `None` on a miss
    pub fn parse(&self, body: &Value) -> Option<ProductInfo> {
        match self {
            ProviderKind::BarcodeMonster => parse_barcode_monster(body),
            ProviderKind::UpcItemDb => parse_upcitemdb(body),
            ProviderKind::OpenFoodFacts => parse_open_food_facts(body),
            ProviderKind::BarcodeLookup => parse_barcode_lookup(body),
            ProviderKind::SerpApiShopping => parse_serpapi_shopping(body),
        }
    }
}

/// Non-empty text value of a JSON field
fn text(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First element of a non-empty JSON array field
fn first_item<'a>(obj: &'a Value, key: &str) -> Option<&'a Value> {
    obj.get(key)?.as_array()?.first()
}

fn parse_barcode_monster(body: &Value) -> Option<ProductInfo> {
    let product = text(body, "product")?;
    Some(ProductInfo {
        brand: text(body, "brand"),
        description: text(body, "description").or_else(|| Some(product.clone())),
        category: text(body, "category"),
        title: Some(product),
    })
}

fn parse_upcitemdb(body: &Value) -> Option<ProductInfo> {
    let item = first_item(body, "items")?;
    Some(ProductInfo {
        title: text(item, "title").or_else(|| text(item, "model")),
        brand: text(item, "brand"),
        description: text(item, "description").or_else(|| text(item, "title")),
        category: text(item, "category"),
    })
}

fn parse_open_food_facts(body: &Value) -> Option<ProductInfo> {
    if body.get("status").and_then(Value::as_i64) != Some(1) {
        return None;
    }
    let product = body.get("product")?;

    let category = text(product, "categories").or_else(|| {
        let tags: Vec<&str> = product
            .get("categories_tags")?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .collect();
        (!tags.is_empty()).then(|| tags.join(", "))
    });

    Some(ProductInfo {
        title: text(product, "product_name"),
        brand: text(product, "brands"),
        description: text(product, "generic_name").or_else(|| text(product, "product_name")),
        category,
    })
}

fn parse_barcode_lookup(body: &Value) -> Option<ProductInfo> {
    let product = first_item(body, "products")?;
    Some(ProductInfo {
        title: text(product, "title"),
        brand: text(product, "brand"),
        description: text(product, "description").or_else(|| text(product, "title")),
        category: text(product, "category"),
    })
}

fn parse_serpapi_shopping(body: &Value) -> Option<ProductInfo> {
    let result = first_item(body, "shopping_results")?;
    Some(ProductInfo {
        title: text(result, "title"),
        brand: text(result, "source"),
        description: text(result, "description"),
        category: text(result, "category"),
    })
}

/// A provider backed by one public HTTP API
pub struct HttpProvider {
    kind: ProviderKind,
    client: reqwest::Client,
    api_key: Option<String>,
    /// Endpoint the code is appended to
    base_url: String,
}

impl HttpProvider {
    pub fn new(kind: ProviderKind, client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            kind,
            client,
            api_key,
            base_url: kind.base_url().to_string(),
        }
    }

    /// Point the provider at another server
    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential(self.kind.name()))
    }

    /// Request URL for a code
    ///
    /// Codes placed in the path are pushed as one percent-encoded segment,
    /// so `/`, `?` and `#` inside a code never change the endpoint.
    fn endpoint(&self, code: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;

        match self.kind {
            ProviderKind::BarcodeMonster => {
                push_segment(&mut url, code)?;
                url.query_pairs_mut().append_pair("json", "1");
            }
            ProviderKind::UpcItemDb => {
                url.query_pairs_mut().append_pair("upc", code);
            }
            ProviderKind::OpenFoodFacts => {
                push_segment(&mut url, &format!("{code}.json"))?;
            }
            ProviderKind::BarcodeLookup => {
                let key = self.key()?;
                url.query_pairs_mut()
                    .append_pair("barcode", code)
                    .append_pair("formatted", "n")
                    .append_pair("key", key);
            }
            ProviderKind::SerpApiShopping => {
                let key = self.key()?;
                url.query_pairs_mut()
                    .append_pair("engine", "google_shopping")
                    .append_pair("q", code)
                    .append_pair("api_key", key);
            }
        }

        Ok(url)
    }
}

/// Append one path segment, escaping anything that would split it
fn push_segment(url: &mut Url, segment: &str) -> Result<(), ProviderError> {
    url.path_segments_mut()
        .map_err(|_| ProviderError::InvalidUrl("base URL cannot take path segments".to_string()))?
        .pop_if_empty()
        .push(segment);
    Ok(())
}

#[async_trait]
impl ProductProvider for HttpProvider {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    async fn lookup(&self, code: &str) -> Result<Option<ProductInfo>, ProviderError> {
        debug!(provider = self.name(), code = %code, "Querying provider");

        let response = self.client.get(self.endpoint(code)?).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(self.kind.parse(&json))
    }
}

/// Shared HTTP client with the fixed lookup headers and timeout
pub fn build_client(config: &LookupConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_str(&config.accept).context("Invalid Accept header")?,
    );

    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to create HTTP client")
}

/// API key from the config entry, falling back to the environment
fn resolve_api_key<F>(settings: &ProviderSettings, env: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    settings
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| env(&settings.kind.api_key_env()).filter(|k| !k.trim().is_empty()))
}

/// Build the configured providers in chain order
///
/// Disabled providers and providers missing a required key are skipped.
pub fn build_providers(config: &LookupConfig) -> Result<Vec<Arc<dyn ProductProvider>>> {
    let client = build_client(config)?;
    Ok(providers_with_env(config, &client, |name| std::env::var(name).ok()))
}

fn providers_with_env<F>(
    config: &LookupConfig,
    client: &reqwest::Client,
    env: F,
) -> Vec<Arc<dyn ProductProvider>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut providers: Vec<Arc<dyn ProductProvider>> = Vec::new();

    for settings in &config.providers {
        if !settings.enabled {
            debug!(provider = settings.kind.name(), "Provider disabled");
            continue;
        }

        let api_key = resolve_api_key(settings, &env);
        if settings.kind.requires_api_key() && api_key.is_none() {
            warn!(
                provider = settings.kind.name(),
                env = %settings.kind.api_key_env(),
                "No API key configured, skipping provider"
            );
            continue;
        }

        providers.push(Arc::new(HttpProvider::new(settings.kind, client.clone(), api_key)));
    }

    info!(
        providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
        "Lookup chain ready"
    );
    providers
}
