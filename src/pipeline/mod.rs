//! Scan Pipeline
//!
//! Per frame: outline every symbol, validate and normalize it, claim new
//! codes, resolve them through the provider chain and record the result.

pub mod claims;

pub use claims::{Claim, CodeClaims};

use futures_util::{stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tracing::debug;

use crate::capture::ScanFrame;
use crate::lookup::ProviderChain;
use crate::overlay::{OverlayRequest, OverlaySink};
use crate::storage::{RecordStore, StorageError};
use crate::vision::{normalize, validate, AuxiliaryFields, DecodedSymbol, ValidationMode};

/// What happened to one detected symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Failed checksum or symbology policy; never looked up
    Invalid,
    /// Already recorded, or being resolved right now
    Duplicate,
    /// Resolved and appended to the log
    Recorded(String),
    /// Resolved without metadata and not recorded
    Unresolved(String),
}

/// Per-frame tally of outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub detected: usize,
    pub invalid: usize,
    pub duplicates: usize,
    pub recorded: Vec<String>,
    pub unresolved: usize,
}

impl FrameReport {
    fn add(&mut self, outcome: ScanOutcome) {
        match outcome {
            ScanOutcome::Invalid => self.invalid += 1,
            ScanOutcome::Duplicate => self.duplicates += 1,
            ScanOutcome::Recorded(code) => self.recorded.push(code),
            ScanOutcome::Unresolved(_) => self.unresolved += 1,
        }
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: FrameReport) {
        self.detected += other.detected;
        self.invalid += other.invalid;
        self.duplicates += other.duplicates;
        self.recorded.extend(other.recorded);
        self.unresolved += other.unresolved;
    }
}

/// Validation, lookup and recording for decoded frames
pub struct ScanPipeline {
    chain: ProviderChain,
    store: Mutex<RecordStore>,
    claims: CodeClaims,
    mode: ValidationMode,
    max_concurrent_lookups: usize,
}

impl ScanPipeline {
    pub fn new(chain: ProviderChain, store: RecordStore, mode: ValidationMode) -> Self {
        Self {
            chain,
            store: Mutex::new(store),
            claims: CodeClaims::new(),
            mode,
            max_concurrent_lookups: 1,
        }
    }

    /// Resolve up to `n` new codes of a frame at once
    pub fn with_max_concurrent_lookups(mut self, n: usize) -> Self {
        self.max_concurrent_lookups = n.max(1);
        self
    }

    /// Access the record store
    #[cfg(test)]
    pub fn store(&self) -> parking_lot::MutexGuard<'_, RecordStore> {
        self.store.lock()
    }

    /// Process every symbol of one frame
    ///
    /// A storage failure aborts the frame and is returned; pending lookups
    /// of the frame are dropped.
    pub async fn process_frame(
        &self,
        frame: &ScanFrame,
        overlay: &mut dyn OverlaySink,
    ) -> Result<FrameReport, StorageError> {
        let mut report = FrameReport {
            detected: frame.symbols.len(),
            ..Default::default()
        };

        let mut pending = Vec::new();
        for symbol in &frame.symbols {
            overlay.draw(&OverlayRequest::for_symbol(symbol));

            match self.admit(symbol) {
                Ok(claim) => pending.push((claim, symbol)),
                Err(outcome) => report.add(outcome),
            }
        }

        let outcomes: Vec<ScanOutcome> = stream::iter(pending)
            .map(|(claim, symbol)| self.resolve_claimed(claim, symbol, &frame.aux))
            .buffer_unordered(self.max_concurrent_lookups)
            .try_collect()
            .await?;

        for outcome in outcomes {
            report.add(outcome);
        }

        Ok(report)
    }

    /// Validate, normalize and claim a symbol's code
    fn admit(&self, symbol: &DecodedSymbol) -> Result<Claim<'_>, ScanOutcome> {
        let text = symbol.text.as_str();
        if text.is_empty() || !validate(text, &symbol.symbol_type, self.mode) {
            debug!(code = %symbol.text, symbol_type = %symbol.symbol_type, "Rejected symbol");
            return Err(ScanOutcome::Invalid);
        }

        let code = normalize(text);
        self.claims
            .claim(&code, |c| self.store.lock().contains(c))
            .ok_or(ScanOutcome::Duplicate)
    }

    async fn resolve_claimed(
        &self,
        claim: Claim<'_>,
        symbol: &DecodedSymbol,
        aux: &AuxiliaryFields,
    ) -> Result<ScanOutcome, StorageError> {
        let code = claim.code().to_string();
        let info = self.chain.resolve(&code).await;

        let recorded = self
            .store
            .lock()
            .try_record(&code, &symbol.symbol_type, info, aux)?;

        // Claim is released only after the seen-set holds the code
        drop(claim);

        Ok(if recorded {
            ScanOutcome::Recorded(code)
        } else {
            ScanOutcome::Unresolved(code)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::tests::{cola, StubBehavior, StubProvider};
    use crate::lookup::ProductProvider;
    use crate::vision::SymbolType;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        labels: Vec<String>,
    }

    impl OverlaySink for RecordingSink {
        fn draw(&mut self, request: &OverlayRequest) {
            self.labels.push(request.label.clone());
        }
    }

    fn pipeline(
        dir: &TempDir,
        providers: &[Arc<StubProvider>],
        mode: ValidationMode,
    ) -> ScanPipeline {
        let providers = providers
            .iter()
            .map(|p| p.clone() as Arc<dyn ProductProvider>)
            .collect();
        let chain = ProviderChain::new(providers, Duration::from_millis(200));
        let store = RecordStore::open(dir.path().join("barcodes.json")).unwrap();
        ScanPipeline::new(chain, store, mode)
    }

    fn frame(index: u64, symbols: &[(&str, SymbolType)]) -> ScanFrame {
        let symbols = symbols
            .iter()
            .map(|(text, ty)| DecodedSymbol::new(*text, ty.clone(), vec![(0, 20), (40, 20), (40, 40)]))
            .collect();
        ScanFrame::new(index, symbols, AuxiliaryFields::default())
    }

    #[tokio::test]
    async fn test_upca_scenario_records_once() {
        let dir = TempDir::new().unwrap();
        let miss = StubProvider::new("miss", StubBehavior::Miss);
        let hit = StubProvider::new("hit", StubBehavior::Hit(cola()));
        let pipeline = pipeline(&dir, &[miss.clone(), hit.clone()], ValidationMode::Permissive);
        let mut sink = RecordingSink::default();

        let report = pipeline
            .process_frame(&frame(0, &[("036000291452", SymbolType::UpcA)]), &mut sink)
            .await
            .unwrap();

        assert_eq!(report.recorded, vec!["036000291452".to_string()]);
        assert_eq!(*miss.seen_codes.lock(), vec!["036000291452".to_string()]);
        assert_eq!(hit.calls(), 1);
        {
            let store = pipeline.store();
            assert_eq!(store.len(), 1);
            assert_eq!(store.records()[0].code, "036000291452");
            assert_eq!(store.records()[0].symbol_type, "UPC_A");
            assert_eq!(store.records()[0].info, cola());
        }

        // Seen again in a later frame: no lookup, no new record
        let report = pipeline
            .process_frame(&frame(1, &[("036000291452", SymbolType::UpcA)]), &mut sink)
            .await
            .unwrap();
        assert_eq!(report.duplicates, 1);
        assert!(report.recorded.is_empty());
        assert_eq!(hit.calls(), 1);
        assert_eq!(pipeline.store().len(), 1);

        assert_eq!(sink.labels, vec!["036000291452 (UPC_A)"; 2]);
    }

    #[tokio::test]
    async fn test_invalid_symbol_never_looked_up() {
        let dir = TempDir::new().unwrap();
        let hit = StubProvider::new("hit", StubBehavior::Hit(cola()));
        let pipeline = pipeline(&dir, &[hit.clone()], ValidationMode::Permissive);
        let mut sink = RecordingSink::default();

        let report = pipeline
            .process_frame(
                &frame(0, &[("036000291453", SymbolType::UpcA), ("", SymbolType::Qr)]),
                &mut sink,
            )
            .await
            .unwrap();

        assert_eq!(report.detected, 2);
        assert_eq!(report.invalid, 2);
        assert_eq!(hit.calls(), 0);
        assert!(pipeline.store().is_empty());
        // Invalid symbols are still outlined
        assert_eq!(sink.labels.len(), 2);
    }

    #[tokio::test]
    async fn test_qr_payload_recorded_as_decoded() {
        let dir = TempDir::new().unwrap();
        let hit = StubProvider::new("hit", StubBehavior::Hit(cola()));
        let pipeline = pipeline(&dir, &[hit.clone()], ValidationMode::Permissive);

        let report = pipeline
            .process_frame(
                &frame(0, &[(" abc ", SymbolType::Qr), ("abc", SymbolType::Qr)]),
                &mut RecordingSink::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.recorded.len(), 2);
        assert_eq!(*hit.seen_codes.lock(), vec![" abc ".to_string(), "abc".to_string()]);
        assert!(pipeline.store().contains(" abc "));
    }

    #[tokio::test]
    async fn test_barcode_only_rejects_qr() {
        let dir = TempDir::new().unwrap();
        let hit = StubProvider::new("hit", StubBehavior::Hit(cola()));
        let pipeline = pipeline(&dir, &[hit.clone()], ValidationMode::BarcodeOnly);

        let report = pipeline
            .process_frame(
                &frame(0, &[("https://example.com", SymbolType::Qr), ("96385074", SymbolType::Ean8)]),
                &mut RecordingSink::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.invalid, 1);
        assert_eq!(report.recorded, vec!["96385074".to_string()]);
        assert_eq!(hit.calls(), 1);
    }

    #[tokio::test]
    async fn test_same_code_twice_in_one_frame_with_concurrency() {
        let dir = TempDir::new().unwrap();
        let hit = StubProvider::new("hit", StubBehavior::Hit(cola()));
        let pipeline = pipeline(&dir, &[hit.clone()], ValidationMode::Permissive)
            .with_max_concurrent_lookups(4);

        let report = pipeline
            .process_frame(
                &frame(
                    0,
                    &[
                        ("12345678905", SymbolType::Other("UPC_E".into())),
                        ("0012345678905", SymbolType::Other("EAN_13_RAW".into())),
                        ("4006381333931", SymbolType::Ean13),
                        ("4006381333931", SymbolType::Ean13),
                    ],
                ),
                &mut RecordingSink::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.recorded.len(), 2);
        assert_eq!(report.duplicates, 2);
        assert_eq!(hit.calls(), 2);

        let store = pipeline.store();
        assert_eq!(store.len(), 2);
        assert!(store.contains("012345678905"));
        assert!(store.contains("4006381333931"));
    }

    #[tokio::test]
    async fn test_unresolved_codes_skipped_when_configured() {
        let dir = TempDir::new().unwrap();
        let miss = StubProvider::new("miss", StubBehavior::Miss);
        let chain = ProviderChain::new(
            vec![miss.clone() as Arc<dyn ProductProvider>],
            Duration::from_millis(200),
        );
        let store = RecordStore::open(dir.path().join("barcodes.json"))
            .unwrap()
            .with_persist_unresolved(false);
        let pipeline = ScanPipeline::new(chain, store, ValidationMode::Permissive);

        let scan = frame(0, &[("96385074", SymbolType::Ean8)]);
        let report = pipeline
            .process_frame(&scan, &mut RecordingSink::default())
            .await
            .unwrap();
        assert_eq!(report.unresolved, 1);
        assert!(pipeline.store().is_empty());

        // Not recorded, so a later sighting is looked up again
        pipeline
            .process_frame(&scan, &mut RecordingSink::default())
            .await
            .unwrap();
        assert_eq!(miss.calls(), 2);
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let hit = StubProvider::new("hit", StubBehavior::Hit(cola()));
        let pipeline = pipeline(&dir, &[hit.clone()], ValidationMode::Permissive);
        std::fs::create_dir(dir.path().join("barcodes.json")).unwrap();

        let result = pipeline
            .process_frame(
                &frame(0, &[("96385074", SymbolType::Ean8)]),
                &mut RecordingSink::default(),
            )
            .await;

        assert!(matches!(result, Err(StorageError::Io { .. })));
        assert!(pipeline.store().is_empty());
        // The claim was released with the failed lookup
        assert!(pipeline.claims.is_idle());
    }

    #[test]
    fn test_report_merge() {
        let mut total = FrameReport::default();
        total.merge(FrameReport {
            detected: 3,
            invalid: 1,
            duplicates: 1,
            recorded: vec!["96385074".into()],
            unresolved: 0,
        });
        total.merge(FrameReport {
            detected: 1,
            unresolved: 1,
            ..Default::default()
        });
        assert_eq!(total.detected, 4);
        assert_eq!(total.recorded.len(), 1);
        assert_eq!(total.unresolved, 1);
    }
}
