// src/print_job.rs - one active print operation and its spooling worker
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::messages::{DocumentCookie, PrintedPage};
use crate::query_queue::PrinterQuery;
use crate::spooler::{DocumentMeta, Spooler};

/// Why a print job ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrintFailure {
    #[error("invalid printer settings")]
    InvalidSettings,
    #[error("cancelled by the user")]
    Cancelled,
    #[error("rendering worker terminated")]
    WorkerGone,
    #[error("renderer reported a failed print")]
    Renderer,
    #[error("spooler failure: {0}")]
    Spooler(String),
}

/// Lifecycle notification pushed to the job's single session observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub cookie: DocumentCookie,
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEventKind {
    AllPagesRequested,
    PageDone { page_number: u32 },
    DocDone,
    JobDone,
    Failed(PrintFailure),
}

#[derive(Debug)]
enum JobCommand {
    SetPageCount(u32),
    SpoolPage(PrintedPage),
    RequestAllPages,
    Stop,
    Cancel(PrintFailure),
}

/// Owning handle over one active print operation.
///
/// Dropping the handle does not abort the worker: a cancellation that is
/// still flushing through the spooler finishes on its own task.
#[derive(Debug)]
pub struct PrintJob {
    id: Uuid,
    cookie: DocumentCookie,
    commands: mpsc::UnboundedSender<JobCommand>,
    finished: watch::Receiver<bool>,
}

impl PrintJob {
    /// Spawns the worker for `query` and subscribes the caller to its events.
    pub fn spawn(
        query: PrinterQuery,
        source_name: &str,
        spooler: Arc<dyn Spooler>,
    ) -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let id = Uuid::new_v4();
        let cookie = query.cookie;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = watch::channel(false);
        let worker = JobWorker {
            id,
            meta: DocumentMeta {
                cookie,
                source_name: source_name.to_string(),
                settings: query.settings,
            },
            spooler,
            events: event_tx,
            finished: finished_tx,
        };
        tokio::spawn(worker.run(command_rx));
        (
            Self {
                id,
                cookie,
                commands: command_tx,
                finished: finished_rx,
            },
            event_rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cookie(&self) -> DocumentCookie {
        self.cookie
    }

    pub fn set_page_count(&self, pages: u32) {
        let _ = self.commands.send(JobCommand::SetPageCount(pages));
    }

    pub fn spool_page(&self, page: PrintedPage) {
        let _ = self.commands.send(JobCommand::SpoolPage(page));
    }

    /// Asks the worker to acknowledge that every page has been requested
    /// from the renderer. The worker answers with `AllPagesRequested`.
    pub fn request_all_pages(&self) {
        let _ = self.commands.send(JobCommand::RequestAllPages);
    }

    /// Best-effort abort. Returns immediately; the worker reports back with
    /// a terminal `Failed` event once it has stopped.
    pub fn cancel(&self, reason: PrintFailure) {
        let _ = self.commands.send(JobCommand::Cancel(reason));
    }

    /// Blocks until the worker has flushed everything it was handed and
    /// stopped. Pages queued ahead of the stop are spooled first.
    pub async fn stop(&self) {
        let _ = self.commands.send(JobCommand::Stop);
        let mut finished = self.finished.clone();
        // Err here means the worker is already gone, which is just as done.
        let _ = finished.wait_for(|done| *done).await;
    }
}

struct JobWorker {
    id: Uuid,
    meta: DocumentMeta,
    spooler: Arc<dyn Spooler>,
    events: mpsc::UnboundedSender<JobEvent>,
    finished: watch::Sender<bool>,
}

impl JobWorker {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<JobCommand>) {
        let cookie = self.meta.cookie;
        tracing::info!(job = %self.id, cookie, "print job worker starting");
        if let Err(err) = self.spooler.start_document(&self.meta).await {
            tracing::warn!(job = %self.id, cookie, %err, "spooler refused the document");
            self.emit(JobEventKind::Failed(PrintFailure::Spooler(err.to_string())));
            let _ = self.finished.send(true);
            return;
        }

        let mut expected: u32 = 0;
        let mut spooled: u32 = 0;
        while let Some(command) = commands.recv().await {
            match command {
                JobCommand::SetPageCount(pages) => {
                    expected = pages;
                }
                JobCommand::SpoolPage(page) => {
                    let page_number = page.page_number;
                    match self.spooler.spool_page(cookie, &page).await {
                        Ok(()) => {
                            spooled += 1;
                            self.emit(JobEventKind::PageDone { page_number });
                            if expected > 0 && spooled >= expected {
                                self.finish_document().await;
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(job = %self.id, cookie, page_number, %err, "page spool failed");
                            let _ = self.spooler.abort_document(cookie).await;
                            self.emit(JobEventKind::Failed(PrintFailure::Spooler(
                                err.to_string(),
                            )));
                            break;
                        }
                    }
                }
                JobCommand::RequestAllPages => {
                    self.emit(JobEventKind::AllPagesRequested);
                }
                JobCommand::Stop => {
                    // Pages queued ahead of the stop were already flushed;
                    // close out whatever document we have.
                    match self.spooler.finish_document(cookie).await {
                        Ok(()) => self.emit(JobEventKind::JobDone),
                        Err(err) => self.emit(JobEventKind::Failed(PrintFailure::Spooler(
                            err.to_string(),
                        ))),
                    }
                    break;
                }
                JobCommand::Cancel(reason) => {
                    let _ = self.spooler.abort_document(cookie).await;
                    self.emit(JobEventKind::Failed(reason));
                    break;
                }
            }
        }
        let _ = self.finished.send(true);
        tracing::info!(job = %self.id, cookie, pages = spooled, "print job worker finished");
    }

    async fn finish_document(&self) {
        match self.spooler.finish_document(self.meta.cookie).await {
            Ok(()) => {
                self.emit(JobEventKind::DocDone);
                self.emit(JobEventKind::JobDone);
            }
            Err(err) => {
                self.emit(JobEventKind::Failed(PrintFailure::Spooler(err.to_string())));
            }
        }
    }

    fn emit(&self, kind: JobEventKind) {
        // The observer may already have unsubscribed; that is fine.
        let _ = self.events.send(JobEvent {
            cookie: self.meta.cookie,
            kind,
        });
    }
}
