//! Frame data structures handed over by the decoder and OCR collaborators

use serde::Deserialize;
use std::time::Instant;

use crate::vision::{AuxRegions, AuxiliaryFields, DecodedSymbol, OcrText, SymbolType};

/// Everything the upstream collaborators extracted from one video frame
#[derive(Debug, Clone)]
pub struct ScanFrame {
    /// Sequence number within the stream
    pub index: u64,
    /// Decoded symbols, in decoder order
    pub symbols: Vec<DecodedSymbol>,
    /// Auxiliary print read from the frame
    pub aux: AuxiliaryFields,
    /// Timestamp when the frame was received
    pub timestamp: Instant,
}

impl ScanFrame {
    /// Create a new frame
    pub fn new(index: u64, symbols: Vec<DecodedSymbol>, aux: AuxiliaryFields) -> Self {
        Self {
            index,
            symbols,
            aux,
            timestamp: Instant::now(),
        }
    }
}

/// Wire form of one decoded symbol
#[derive(Debug, Deserialize)]
pub(crate) struct SymbolMessage {
    pub text: String,
    pub format: String,
    #[serde(default)]
    pub points: Vec<(i32, i32)>,
}

/// Wire form of one frame
#[derive(Debug, Deserialize)]
pub(crate) struct FrameMessage {
    /// Frame width in pixels, needed to place OCR boxes
    #[serde(default)]
    pub width: u32,
    /// Frame height in pixels
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub symbols: Vec<SymbolMessage>,
    /// Text boxes read by the OCR engine
    #[serde(default)]
    pub ocr: Vec<OcrText>,
}

impl FrameMessage {
    pub fn into_frame(self, index: u64, regions: &AuxRegions) -> ScanFrame {
        let symbols = self
            .symbols
            .into_iter()
            .map(|s| DecodedSymbol::new(s.text, SymbolType::from_format(&s.format), s.points))
            .collect();

        let aux = AuxiliaryFields::from_ocr(&self.ocr, regions, self.width, self.height);

        ScanFrame::new(index, symbols, aux)
    }
}
