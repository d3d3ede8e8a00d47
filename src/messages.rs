// src/messages.rs - message channel types between the renderer and the session
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Correlation id binding a session's active job to its inbound messages.
/// `0` means "no document tracked".
pub type DocumentCookie = u32;

/// Parameters of one print request as resolved by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintParams {
    pub silent: bool,
    pub print_background: bool,
    pub device_name: String,
}

/// One rendered page as delivered by the rendering worker.
#[derive(Debug, Clone)]
pub struct PrintedPage {
    pub cookie: DocumentCookie,
    pub page_number: u32,
    pub data: Vec<u8>,
}

/// Requests the session sends toward the target frame.
#[derive(Debug, Clone)]
pub enum RenderRequest {
    PrintPages(PrintParams),
    RenderMissingPages { cookie: DocumentCookie },
}

/// Messages the rendering worker delivers back, in order per frame.
#[derive(Debug)]
pub enum RenderMessage {
    GotDocumentCookie { cookie: DocumentCookie },
    GotPageCount { cookie: DocumentCookie, pages: u32 },
    PagePrinted(PrintedPage),
    InvalidPrinterSettings,
    PrintingFailed { cookie: DocumentCookie },
}

/// Handle to one renderer frame: where print requests for a document go.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    tx: mpsc::UnboundedSender<RenderRequest>,
}

impl RenderFrame {
    pub fn new(tx: mpsc::UnboundedSender<RenderRequest>) -> Self {
        Self { tx }
    }

    /// Builds a frame together with the receiving end of its request channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RenderRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(
        &self,
        request: RenderRequest,
    ) -> Result<(), mpsc::error::SendError<RenderRequest>> {
        self.tx.send(request)
    }
}
