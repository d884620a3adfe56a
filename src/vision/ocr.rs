//! Auxiliary print extraction
//!
//! The OCR engine itself runs upstream and hands over the text boxes it read
//! in a frame. Boxes falling inside the price and quantity regions are
//! reduced to the numeric value they carry.

use serde::{Deserialize, Serialize};

/// A frame region handed to the OCR engine, as fractions of the frame size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuxRegion {
    /// Left edge (0.0 - 1.0)
    pub x0: f32,
    /// Top edge (0.0 - 1.0)
    pub y0: f32,
    /// Right edge (0.0 - 1.0)
    pub x1: f32,
    /// Bottom edge (0.0 - 1.0)
    pub y1: f32,
}

impl AuxRegion {
    /// Pixel rectangle (x, y, width, height) for a frame of the given size
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let fx = |f: f32| (f.clamp(0.0, 1.0) * width as f32).round() as u32;
        let fy = |f: f32| (f.clamp(0.0, 1.0) * height as f32).round() as u32;
        let (x, y) = (fx(self.x0), fy(self.y0));
        (x, y, fx(self.x1).saturating_sub(x), fy(self.y1).saturating_sub(y))
    }

    /// Whether the center of a pixel box lies inside this region
    pub fn contains(&self, width: u32, height: u32, bounds: (u32, u32, u32, u32)) -> bool {
        let (rx, ry, rw, rh) = self.to_pixels(width, height);
        // Doubled coordinates keep the center in integers
        let cx = bounds.0 as u64 * 2 + bounds.2 as u64;
        let cy = bounds.1 as u64 * 2 + bounds.3 as u64;
        cx >= rx as u64 * 2
            && cx < (rx as u64 + rw as u64) * 2
            && cy >= ry as u64 * 2
            && cy < (ry as u64 + rh as u64) * 2
    }
}

/// One text box read by the OCR engine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OcrText {
    /// Recognized text
    pub text: String,
    /// Bounding box (x, y, width, height) in frame pixels
    pub bounds: (u32, u32, u32, u32),
}

/// Regions scanned for auxiliary print next to the barcode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuxRegions {
    /// Printed maximum retail price
    pub mrp: AuxRegion,
    /// Printed net quantity
    pub quantity: AuxRegion,
}

impl Default for AuxRegions {
    fn default() -> Self {
        Self {
            mrp: AuxRegion { x0: 0.6, y0: 0.2, x1: 0.95, y1: 0.4 },
            quantity: AuxRegion { x0: 0.6, y0: 0.4, x1: 0.95, y1: 0.6 },
        }
    }
}

/// Auxiliary values read from the current frame, not tied to one symbol
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxiliaryFields {
    pub mrp: Option<String>,
    pub quantity: Option<String>,
}

impl AuxiliaryFields {
    /// Extract both values from the OCR text boxes of a frame
    pub fn from_ocr(texts: &[OcrText], regions: &AuxRegions, width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return Self::default();
        }

        Self {
            mrp: first_number(&texts_in(texts, &regions.mrp, width, height)),
            quantity: first_number(&texts_in(texts, &regions.quantity, width, height)),
        }
    }
}

/// Text of the boxes inside `region`, in OCR order
fn texts_in<'a>(texts: &'a [OcrText], region: &AuxRegion, width: u32, height: u32) -> Vec<&'a str> {
    texts
        .iter()
        .filter(|t| region.contains(width, height, t.bounds))
        .map(|t| t.text.as_str())
        .collect()
}

/// First number found across the OCR lines, in line order
pub fn first_number<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    lines.iter().find_map(|line| extract_number(line.as_ref()))
}

/// First `digits[.digits]` token in a line of OCR text
///
/// A trailing dot is kept, so `"45."` yields `"45."`.
pub fn extract_number(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|b| b.is_ascii_digit())?;

    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }

    Some(text[start..end].to_string())
}
