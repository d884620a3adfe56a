//! Vision Layer
//!
//! Consumes what the upstream barcode decoder and OCR engine produce:
//! - Symbol validation and code normalization
//! - Numeric extraction of auxiliary print (price, quantity)

pub mod ocr;
pub mod symbol;

pub use ocr::{AuxRegions, AuxiliaryFields, OcrText};
pub use symbol::{normalize, validate, DecodedSymbol, SymbolType, ValidationMode};
