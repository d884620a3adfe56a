//! Frame Input Layer
//!
//! Camera access and symbol decoding run outside this program. Their output
//! arrives as a stream of frames, one JSON object per line:
//!
//! ```json
//! {"width": 640, "height": 480,
//!  "symbols": [{"text": "036000291452", "format": "UPC_A", "points": [[10, 20], [110, 20], [110, 60], [10, 60]]}],
//!  "ocr": [{"text": "MRP Rs 45.00", "bounds": [420, 120, 150, 24]}]}
//! ```

pub mod frame;

pub use frame::ScanFrame;

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::vision::AuxRegions;
use frame::FrameMessage;

/// A producer of decoded frames
pub trait FrameSource {
    /// Next frame, or `None` once the stream has ended
    fn next_frame(&mut self) -> Result<Option<ScanFrame>>;
}

/// Frames read from newline-delimited JSON
pub struct JsonLinesSource<R> {
    reader: R,
    regions: AuxRegions,
    line: String,
    line_no: u64,
    frames: u64,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R, regions: AuxRegions) -> Self {
        Self {
            reader,
            regions,
            line: String::new(),
            line_no: 0,
            frames: 0,
        }
    }
}

impl JsonLinesSource<Box<dyn BufRead + Send>> {
    /// Open a file, or stdin for `-`
    pub fn open(input: &Path, regions: AuxRegions) -> Result<Self> {
        let reader: Box<dyn BufRead + Send> = if input == Path::new("-") {
            info!("Reading frames from stdin");
            Box::new(std::io::BufReader::new(std::io::stdin()))
        } else {
            info!("Reading frames from {:?}", input);
            let file = std::fs::File::open(input)
                .with_context(|| format!("Failed to open frame stream {:?}", input))?;
            Box::new(std::io::BufReader::new(file))
        };
        Ok(Self::new(reader, regions))
    }
}

impl<R: BufRead> FrameSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Result<Option<ScanFrame>> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .context("Failed to read frame stream")?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<FrameMessage>(trimmed) {
                Ok(message) => {
                    let frame = message.into_frame(self.frames, &self.regions);
                    self.frames += 1;
                    return Ok(Some(frame));
                }
                Err(e) => {
                    warn!(line = self.line_no, error = %e, "Skipping malformed frame");
                }
            }
        }
    }
}

/// Run a frame source on its own thread, forwarding frames over a channel
///
/// The channel closes when the source ends, fails, or the receiver is dropped.
pub fn spawn_reader<S>(mut source: S, capacity: usize) -> (mpsc::Receiver<ScanFrame>, JoinHandle<()>)
where
    S: FrameSource + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let handle = std::thread::spawn(move || loop {
        match source.next_frame() {
            Ok(Some(frame)) => {
                if tx.blocking_send(frame).is_err() {
                    debug!("Frame receiver dropped, stopping reader");
                    break;
                }
            }
            Ok(None) => {
                info!("Frame stream ended");
                break;
            }
            Err(e) => {
                tracing::error!("Frame source error: {:#}", e);
                break;
            }
        }
    });

    (rx, handle)
}
