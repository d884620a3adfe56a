//! Decoded symbol types, check digit validation and code normalization
//!
//! EAN-8, EAN-13 and UPC-A payloads are validated with the ISO/IEC 16388
//! check digit before they are trusted. Normalization folds the UPC-A and
//! zero-prefixed EAN-13 spellings of the same product onto one code.

use std::fmt;

/// Symbology reported by the barcode decoder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolType {
    UpcA,
    Ean8,
    Ean13,
    Qr,
    /// Any symbology without checksum support, keeps the decoder's name
    Other(String),
}

impl SymbolType {
    /// Parse a decoder format string such as `"EAN_13"` or `"QR_CODE"`
    pub fn from_format(format: &str) -> Self {
        let key: String = format
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        match key.as_str() {
            "UPCA" => SymbolType::UpcA,
            "EAN8" => SymbolType::Ean8,
            "EAN13" => SymbolType::Ean13,
            "QR" | "QRCODE" => SymbolType::Qr,
            _ => SymbolType::Other(format.trim().to_string()),
        }
    }

    /// Stable label used in the scan log and overlay text
    pub fn label(&self) -> &str {
        match self {
            SymbolType::UpcA => "UPC_A",
            SymbolType::Ean8 => "EAN_8",
            SymbolType::Ean13 => "EAN_13",
            SymbolType::Qr => "QR_CODE",
            SymbolType::Other(name) => name,
        }
    }

    /// Whether this symbology carries a numeric check digit
    pub fn is_checksummed(&self) -> bool {
        matches!(self, SymbolType::UpcA | SymbolType::Ean8 | SymbolType::Ean13)
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A symbol located and decoded in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSymbol {
    /// Decoded payload text
    pub text: String,
    /// Symbology
    pub symbol_type: SymbolType,
    /// Localization polygon in frame pixels
    pub position: Vec<(i32, i32)>,
}

impl DecodedSymbol {
    pub fn new(text: impl Into<String>, symbol_type: SymbolType, position: Vec<(i32, i32)>) -> Self {
        Self {
            text: text.into(),
            symbol_type,
            position,
        }
    }
}

/// How symbologies without a check digit are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// QR and other symbologies pass through unchecked
    #[default]
    Permissive,
    /// Only checksummed retail barcodes are accepted
    BarcodeOnly,
}

/// Compute the EAN check digit for a payload without its check digit
///
/// Returns `None` if the payload is empty or contains a non-digit.
pub fn check_digit(payload: &str) -> Option<u8> {
    if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    // Weight 3 starts at the rightmost payload digit
    let sum: u32 = payload
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 0 { digit * 3 } else { digit }
        })
        .sum();

    Some(((10 - sum % 10) % 10) as u8)
}

/// Validate an EAN-8 or EAN-13 code including its check digit
pub fn is_valid_ean(code: &str) -> bool {
    if !matches!(code.len(), 8 | 13) || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let (payload, check) = code.split_at(code.len() - 1);
    let expected = check.as_bytes()[0] - b'0';
    check_digit(payload) == Some(expected)
}

/// Validate a UPC-A code as an EAN-13 with an implicit leading zero
pub fn is_valid_upca(code: &str) -> bool {
    if code.len() != 12 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    is_valid_ean(&format!("0{code}"))
}

/// Decide whether a decoded code can be trusted
pub fn validate(code: &str, symbol_type: &SymbolType, mode: ValidationMode) -> bool {
    if !symbol_type.is_checksummed() {
        return mode == ValidationMode::Permissive;
    }
    match symbol_type {
        SymbolType::UpcA => is_valid_upca(code),
        _ => is_valid_ean(code),
    }
}

/// Fold equivalent UPC-A / EAN-13 spellings onto one canonical code
pub fn normalize(code: &str) -> String {
    if code.len() == 11 && code.bytes().all(|b| b.is_ascii_digit()) {
        format!("0{code}")
    } else if code.len() == 13 && code.starts_with('0') {
        code[1..].to_string()
    } else {
        code.to_string()
    }
}
