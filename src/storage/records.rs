//! Deduplicated scan log
//!
//! The log is a JSON array of records, loaded fully at startup and rewritten
//! in full after every new record. Each normalized code appears at most once.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::lookup::ProductInfo;
use crate::vision::{normalize, AuxiliaryFields, SymbolType};

/// Scan log failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Scan log {path:?} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize scan log: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One scanned product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Local time the code was first recorded (ISO-8601)
    pub timestamp: String,
    /// Symbology label
    #[serde(rename = "type", default)]
    pub symbol_type: String,
    /// Normalized code, unique within the log
    pub code: String,
    /// Product metadata, flattened into the record
    #[serde(flatten)]
    pub info: ProductInfo,
    /// Printed price read from the same frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mrp: Option<String>,
    /// Printed quantity read from the same frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
}

fn now_iso8601() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// Append-only record log with its seen-set
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    records: Vec<Record>,
    seen: HashSet<String>,
    /// Whether codes no provider knew are still recorded
    persist_unresolved: bool,
}

impl RecordStore {
    /// Load the log at `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();

        let records: Vec<Record> = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content).map_err(|source| StorageError::Corrupt {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            debug!("No scan log at {:?}, starting empty", path);
            Vec::new()
        };

        let seen = records.iter().map(|r| normalize(&r.code)).collect();

        info!("Loaded {} records from {:?}", records.len(), path);

        Ok(Self {
            path,
            records,
            seen,
            persist_unresolved: true,
        })
    }

    /// Set the policy for codes without any product metadata
    pub fn with_persist_unresolved(mut self, persist_unresolved: bool) -> Self {
        self.persist_unresolved = persist_unresolved;
        self
    }

    /// Path of the backing log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records in insertion order
    #[cfg(test)]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Codes already recorded
    pub fn seen(&self) -> &HashSet<String> {
        &self.seen
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the code (in any equivalent spelling) is already recorded
    pub fn contains(&self, code: &str) -> bool {
        self.seen.contains(&normalize(code))
    }

    /// Record a newly resolved code
    ///
    /// Returns `Ok(false)` without side effects for empty or already seen
    /// codes, and for empty product info when unresolved codes are not
    /// persisted. A failed write is rolled back in memory and returned.
    pub fn try_record(
        &mut self,
        code: &str,
        symbol_type: &SymbolType,
        info: ProductInfo,
        aux: &AuxiliaryFields,
    ) -> Result<bool, StorageError> {
        let code = normalize(code);
        if code.is_empty() || self.seen.contains(&code) {
            return Ok(false);
        }
        if info.is_empty() && !self.persist_unresolved {
            debug!(code = %code, "Skipping code without product data");
            return Ok(false);
        }

        self.records.push(Record {
            timestamp: now_iso8601(),
            symbol_type: symbol_type.label().to_string(),
            code: code.clone(),
            info,
            mrp: aux.mrp.clone(),
            quantity: aux.quantity.clone(),
        });
        self.seen.insert(code.clone());

        if let Err(e) = self.persist() {
            self.records.pop();
            self.seen.remove(&code);
            return Err(e);
        }

        info!(code = %code, symbol_type = %symbol_type, total = self.records.len(), "Recorded new code");
        Ok(true)
    }

    /// Sibling of the log file, `<log name>.tmp`
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Rewrite the whole log through a synced temp file
    fn persist(&self) -> Result<(), StorageError> {
        let io_err = |source: std::io::Error| StorageError::Io {
            path: self.path.clone(),
            source,
        };

        let content = serde_json::to_string_pretty(&self.records)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let temp_path = self.temp_path();
        let mut file = std::fs::File::create(&temp_path).map_err(io_err)?;
        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|source| {
                std::fs::remove_file(&temp_path).ok();
                io_err(source)
            })?;
        drop(file);

        std::fs::rename(&temp_path, &self.path).map_err(|source| {
            std::fs::remove_file(&temp_path).ok();
            io_err(source)
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn product(title: &str) -> ProductInfo {
        ProductInfo {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    fn no_aux() -> AuxiliaryFields {
        AuxiliaryFields::default()
    }

    #[test]
    fn test_open_missing_log_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("barcodes.json")).unwrap();

        assert!(store.is_empty());
        assert!(store.seen().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_duplicate_code_recorded_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("barcodes.json");
        let mut store = RecordStore::open(&path).unwrap();

        let first = store
            .try_record("036000291452", &SymbolType::UpcA, product("Tissues"), &no_aux())
            .unwrap();
        let second = store
            .try_record("036000291452", &SymbolType::UpcA, product("Other"), &no_aux())
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(store.len(), 1);

        let reloaded = RecordStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.records()[0].info.title.as_deref(), Some("Tissues"));
    }

    #[test]
    fn test_equivalent_spellings_share_one_record() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open(dir.path().join("barcodes.json")).unwrap();

        assert!(store
            .try_record("12345678905", &SymbolType::Other("UPC_A".into()), product("A"), &no_aux())
            .unwrap());
        assert!(!store
            .try_record("0012345678905", &SymbolType::Ean13, product("A"), &no_aux())
            .unwrap());

        assert_eq!(store.records()[0].code, "012345678905");
        assert!(store.contains("0012345678905"));
        assert!(store.contains("12345678905"));
    }

    #[test]
    fn test_empty_code_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("barcodes.json");
        let mut store = RecordStore::open(&path).unwrap();

        assert!(!store.try_record("", &SymbolType::Qr, product("x"), &no_aux()).unwrap());
        assert!(store.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_code_kept_as_decoded() {
        let dir = TempDir::new().unwrap();
        let mut store = RecordStore::open(dir.path().join("barcodes.json")).unwrap();

        assert!(store.try_record(" abc ", &SymbolType::Qr, product("x"), &no_aux()).unwrap());
        assert!(store.try_record("abc", &SymbolType::Qr, product("y"), &no_aux()).unwrap());

        assert_eq!(store.records()[0].code, " abc ");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_log_named_tmp_is_rewritten_through_sibling() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.tmp");
        let mut store = RecordStore::open(&path).unwrap();

        store
            .try_record("96385074", &SymbolType::Ean8, product("Gum"), &no_aux())
            .unwrap();
        store
            .try_record("4006381333931", &SymbolType::Ean13, product("Pen"), &no_aux())
            .unwrap();

        assert_eq!(store.temp_path(), dir.path().join("scan.tmp.tmp"));
        assert!(!store.temp_path().exists());
        assert_eq!(RecordStore::open(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_unresolved_policy() {
        let dir = TempDir::new().unwrap();

        let mut keep = RecordStore::open(dir.path().join("keep.json")).unwrap();
        assert!(keep
            .try_record("96385074", &SymbolType::Ean8, ProductInfo::default(), &no_aux())
            .unwrap());
        assert!(keep.records()[0].info.is_empty());

        let mut skip = RecordStore::open(dir.path().join("skip.json"))
            .unwrap()
            .with_persist_unresolved(false);
        assert!(!skip
            .try_record("96385074", &SymbolType::Ean8, ProductInfo::default(), &no_aux())
            .unwrap());
        assert!(skip.is_empty());
        assert!(!skip.contains("96385074"));
    }

    #[test]
    fn test_reload_preserves_records_and_seen_set() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("barcodes.json");
        let mut store = RecordStore::open(&path).unwrap();

        let aux = AuxiliaryFields {
            mrp: Some("45.00".into()),
            quantity: Some("500".into()),
        };
        store
            .try_record("036000291452", &SymbolType::UpcA, product("Tissues"), &aux)
            .unwrap();
        store
            .try_record("4006381333931", &SymbolType::Ean13, ProductInfo::default(), &no_aux())
            .unwrap();
        store
            .try_record("https://example.com/ü", &SymbolType::Qr, product("Link"), &no_aux())
            .unwrap();

        let reloaded = RecordStore::open(&path).unwrap();
        assert_eq!(reloaded.records(), store.records());
        assert_eq!(reloaded.seen(), store.seen());
    }

    #[test]
    fn test_log_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("barcodes.json");
        let mut store = RecordStore::open(&path).unwrap();

        let aux = AuxiliaryFields {
            mrp: Some("12.5".into()),
            quantity: None,
        };
        store
            .try_record("036000291452", &SymbolType::UpcA, product("Tissues"), &aux)
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        let record = &value.as_array().unwrap()[0];

        assert_eq!(record["type"], "UPC_A");
        assert_eq!(record["code"], "036000291452");
        assert_eq!(record["title"], "Tissues");
        assert!(record["brand"].is_null());
        assert!(record["description"].is_null());
        assert!(record["category"].is_null());
        assert_eq!(record["mrp"], "12.5");
        assert!(record.get("quantity").is_none());
        assert!(record["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_loads_existing_log_with_raw_codes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("barcodes.json");
        std::fs::write(
            &path,
            r#"[
                {"timestamp": "2024-05-01T10:00:00", "code": "0012345678905",
                 "mrp": null, "quantity": "1", "title": null, "brand": null,
                 "description": null, "category": null}
            ]"#,
        )
        .unwrap();

        let mut store = RecordStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].symbol_type, "");
        assert!(store.contains("12345678905"));
        assert!(!store
            .try_record("12345678905", &SymbolType::UpcA, product("dup"), &no_aux())
            .unwrap());
    }

    #[test]
    fn test_corrupt_log_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("barcodes.json");
        std::fs::write(&path, "[{not json").unwrap();

        let result = RecordStore::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));
    }

    #[test]
    fn test_write_failure_propagates_and_rolls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("barcodes.json");
        let mut store = RecordStore::open(&path).unwrap();

        // A directory in place of the log makes the final rename fail
        std::fs::create_dir(&path).unwrap();

        let result = store.try_record("036000291452", &SymbolType::UpcA, product("x"), &no_aux());
        assert!(matches!(result, Err(StorageError::Io { .. })));
        assert!(store.is_empty());
        assert!(!store.contains("036000291452"));
        assert!(!dir.path().join("barcodes.json.tmp").exists());
    }
}
