// src/spooler.rs - platform boundary the print job worker drives
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::messages::{DocumentCookie, PrintedPage};
use crate::query_queue::PrintSettings;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("printer rejected the document: {0}")]
    Rejected(String),
    #[error("spooler I/O failure: {0}")]
    Io(String),
}

/// Display metadata handed to the spooler when a document opens.
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub cookie: DocumentCookie,
    pub source_name: String,
    pub settings: PrintSettings,
}

/// Low-level talk to the printer. One open document per cookie at a time.
#[async_trait]
pub trait Spooler: Send + Sync {
    async fn start_document(&self, doc: &DocumentMeta) -> Result<(), SpoolError>;
    async fn spool_page(
        &self,
        cookie: DocumentCookie,
        page: &PrintedPage,
    ) -> Result<(), SpoolError>;
    async fn finish_document(&self, cookie: DocumentCookie) -> Result<(), SpoolError>;
    async fn abort_document(&self, cookie: DocumentCookie) -> Result<(), SpoolError>;
}

/// Record of one document as the simulated spooler saw it.
#[derive(Debug, Clone)]
pub struct SpooledDocument {
    pub cookie: DocumentCookie,
    pub source_name: String,
    pub device_name: String,
    pub pages: Vec<u32>,
    pub finished: bool,
    pub aborted: bool,
}

#[derive(Debug, Default)]
struct SimSpoolerState {
    documents: Vec<SpooledDocument>,
    fail_page: Option<u32>,
}

/// In-memory spooler used by the host binary and the tests. Records every
/// document and page it receives; can inject a failure on a chosen page.
#[derive(Debug, Default)]
pub struct SimSpooler {
    state: Mutex<SimSpoolerState>,
}

impl SimSpooler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next spool of `page_number` fail with an I/O error.
    pub async fn fail_on_page(&self, page_number: u32) {
        self.state.lock().await.fail_page = Some(page_number);
    }

    pub async fn documents(&self) -> Vec<SpooledDocument> {
        self.state.lock().await.documents.clone()
    }
}

#[async_trait]
impl Spooler for SimSpooler {
    async fn start_document(&self, doc: &DocumentMeta) -> Result<(), SpoolError> {
        let mut state = self.state.lock().await;
        tracing::debug!(
            cookie = doc.cookie,
            source = %doc.source_name,
            device = %doc.settings.device_name,
            "sim spooler opened document"
        );
        state.documents.push(SpooledDocument {
            cookie: doc.cookie,
            source_name: doc.source_name.clone(),
            device_name: doc.settings.device_name.clone(),
            pages: Vec::new(),
            finished: false,
            aborted: false,
        });
        Ok(())
    }

    async fn spool_page(
        &self,
        cookie: DocumentCookie,
        page: &PrintedPage,
    ) -> Result<(), SpoolError> {
        let mut state = self.state.lock().await;
        if state.fail_page == Some(page.page_number) {
            state.fail_page = None;
            return Err(SpoolError::Io(format!(
                "injected failure on page {}",
                page.page_number
            )));
        }
        let doc = open_document(&mut state, cookie)
            .ok_or_else(|| SpoolError::Rejected(format!("no open document for cookie {cookie}")))?;
        doc.pages.push(page.page_number);
        Ok(())
    }

    async fn finish_document(&self, cookie: DocumentCookie) -> Result<(), SpoolError> {
        let mut state = self.state.lock().await;
        let doc = open_document(&mut state, cookie)
            .ok_or_else(|| SpoolError::Rejected(format!("no open document for cookie {cookie}")))?;
        doc.finished = true;
        tracing::debug!(cookie, pages = doc.pages.len(), "sim spooler finished document");
        Ok(())
    }

    async fn abort_document(&self, cookie: DocumentCookie) -> Result<(), SpoolError> {
        let mut state = self.state.lock().await;
        if let Some(doc) = open_document(&mut state, cookie) {
            doc.aborted = true;
            tracing::debug!(cookie, "sim spooler aborted document");
        }
        Ok(())
    }
}

fn open_document(
    state: &mut SimSpoolerState,
    cookie: DocumentCookie,
) -> Option<&mut SpooledDocument> {
    state
        .documents
        .iter_mut()
        .rev()
        .find(|doc| doc.cookie == cookie && !doc.finished && !doc.aborted)
}
