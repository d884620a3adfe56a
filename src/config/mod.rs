//! Application Configuration
//!
//! User settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::lookup::ProviderKind;
use crate::vision::{AuxRegions, ValidationMode};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scan loop settings
    pub scan: ScanSettings,
    /// Product lookup settings
    pub lookup: LookupConfig,
    /// Scan log settings
    pub storage: StorageSettings,
}

/// Scan loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Reject QR codes and symbologies without a check digit
    pub barcode_only: bool,
    /// New codes of one frame resolved concurrently (1 = strictly sequential)
    pub max_concurrent_lookups: usize,
    /// Regions the OCR engine reads price and quantity from
    pub aux_regions: AuxRegions,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            barcode_only: false,
            max_concurrent_lookups: 1,
            aux_regions: AuxRegions::default(),
        }
    }
}

impl ScanSettings {
    pub fn validation_mode(&self) -> ValidationMode {
        if self.barcode_only {
            ValidationMode::BarcodeOnly
        } else {
            ValidationMode::Permissive
        }
    }
}

/// Product lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Per-provider request timeout in seconds
    pub timeout_secs: u64,
    /// User-Agent header sent to every provider
    pub user_agent: String,
    /// Accept header sent to every provider
    pub accept: String,
    /// Providers in query order
    pub providers: Vec<ProviderSettings>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string(),
            accept: "application/json".to_string(),
            providers: ProviderKind::ALL
                .iter()
                .map(|&kind| ProviderSettings {
                    kind,
                    enabled: true,
                    api_key: None,
                })
                .collect(),
        }
    }
}

/// One entry of the provider chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Which API
    pub kind: ProviderKind,
    /// Whether the provider takes part in lookups
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API key, falls back to `SHELFSCAN_<PROVIDER>_KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Scan log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON scan log path
    pub log_path: PathBuf,
    /// Record codes even when no provider knew them
    pub persist_unresolved: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("barcodes.json"),
            persist_unresolved: true,
        }
    }
}

/// Default config file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}
