//! Overlay Presentation Layer
//!
//! Builds the draw requests for detected symbols. The renderer lives
//! outside this program; requests reach it through an [`OverlaySink`].

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread::JoinHandle;
use tracing::debug;

use crate::vision::DecodedSymbol;

/// Vertical offset of the label above the first polygon point
const LABEL_OFFSET_Y: i32 = 10;

/// Request to outline one symbol and label it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayRequest {
    /// Closed polygon around the symbol
    pub polygon: Vec<(i32, i32)>,
    /// Label text, `"{code} ({type})"`
    pub label: String,
    /// Where the label is drawn
    pub label_anchor: Option<(i32, i32)>,
}

impl OverlayRequest {
    /// Build the request for a decoded symbol
    pub fn for_symbol(symbol: &DecodedSymbol) -> Self {
        Self {
            polygon: symbol.position.clone(),
            label: format!("{} ({})", symbol.text, symbol.symbol_type),
            label_anchor: symbol
                .position
                .first()
                .map(|&(x, y)| (x, y.saturating_sub(LABEL_OFFSET_Y))),
        }
    }

    /// Line segments of the closed polygon
    pub fn edges(&self) -> impl Iterator<Item = ((i32, i32), (i32, i32))> + '_ {
        let n = self.polygon.len();
        (0..n).map(move |i| (self.polygon[i], self.polygon[(i + 1) % n]))
    }
}

/// Receiver of draw requests
pub trait OverlaySink: Send {
    fn draw(&mut self, request: &OverlayRequest);
}

/// Sink that forwards requests to a renderer thread
#[derive(Clone)]
pub struct ChannelOverlay {
    sender: Sender<OverlayRequest>,
}

impl ChannelOverlay {
    /// Create a sink and the receiving end for the renderer
    pub fn channel() -> (Self, Receiver<OverlayRequest>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl OverlaySink for ChannelOverlay {
    fn draw(&mut self, request: &OverlayRequest) {
        // Renderer gone means nobody is watching; scanning continues
        let _ = self.sender.send(request.clone());
    }
}

/// Renderer that writes each request to the log
///
/// Stands in for an on-screen renderer; exits when every sender is dropped.
pub fn spawn_log_renderer(receiver: Receiver<OverlayRequest>) -> JoinHandle<usize> {
    std::thread::spawn(move || {
        let mut drawn = 0;
        for request in receiver {
            debug!(
                label = %request.label,
                anchor = ?request.label_anchor,
                edges = request.edges().count(),
                "Draw symbol outline"
            );
            drawn += 1;
        }
        drawn
    })
}
