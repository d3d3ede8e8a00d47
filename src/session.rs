// src/session.rs - per-document print session controller
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::PrintingConfig;
use crate::messages::{DocumentCookie, PrintParams, PrintedPage, RenderFrame, RenderMessage, RenderRequest};
use crate::print_job::{JobEvent, JobEventKind, PrintFailure, PrintJob};
use crate::query_queue::{PrinterQuery, PrinterQueryQueue};
use crate::spooler::Spooler;

pub type CompletionCallback = Box<dyn FnOnce(bool) + Send>;

/// Platform-specific reporting composed into the session. Variants add
/// behavior around the base handling without replacing it.
pub trait PlatformHooks: Send {
    /// Runs when the renderer reports a failed print, before the base
    /// handling cancels the job.
    fn printing_failed(&self, cookie: DocumentCookie) {
        let _ = cookie;
    }

    /// Runs after a print request was accepted and sent to the frame.
    fn print_requested(&self, params: &PrintParams) {
        let _ = params;
    }
}

/// Default hooks: structured logging only.
#[derive(Debug, Default)]
pub struct LoggingHooks;

impl PlatformHooks for LoggingHooks {
    fn printing_failed(&self, cookie: DocumentCookie) {
        tracing::warn!(cookie, "renderer reported print failure");
    }

    fn print_requested(&self, params: &PrintParams) {
        tracing::info!(device = %params.device_name, silent = params.silent, "print requested");
    }
}

/// What woke the session up: a render message, a job event, or a closed
/// channel on either side.
enum Wakeup {
    Message(RenderMessage),
    RendererClosed,
    Event(JobEvent),
    EventsClosed,
    Idle,
}

async fn next_wakeup(
    renderer_alive: bool,
    render_rx: &mut mpsc::UnboundedReceiver<RenderMessage>,
    job_events: Option<&mut mpsc::UnboundedReceiver<JobEvent>>,
) -> Wakeup {
    match (renderer_alive, job_events) {
        (true, Some(events)) => tokio::select! {
            event = events.recv() => match event {
                Some(event) => Wakeup::Event(event),
                None => Wakeup::EventsClosed,
            },
            message = render_rx.recv() => match message {
                Some(message) => Wakeup::Message(message),
                None => Wakeup::RendererClosed,
            },
        },
        (true, None) => match render_rx.recv().await {
            Some(message) => Wakeup::Message(message),
            None => Wakeup::RendererClosed,
        },
        (false, Some(events)) => match events.recv().await {
            Some(event) => Wakeup::Event(event),
            None => Wakeup::EventsClosed,
        },
        (false, None) => Wakeup::Idle,
    }
}

/// Coordinates the lifecycle of a single print job for one document session.
///
/// Owned by one task; every delivery is serialized through [`service_next`].
/// At most one job is active at a time, and every inbound message must carry
/// the active document cookie before it is applied.
///
/// [`service_next`]: PrintSession::service_next
pub struct PrintSession {
    source_name: String,
    printing_enabled: bool,
    queue: Arc<PrinterQueryQueue>,
    spooler: Arc<dyn Spooler>,
    hooks: Box<dyn PlatformHooks>,
    render_rx: mpsc::UnboundedReceiver<RenderMessage>,
    renderer_alive: bool,
    frame: Option<RenderFrame>,
    job: Option<PrintJob>,
    job_events: Option<mpsc::UnboundedReceiver<JobEvent>>,
    cookie: DocumentCookie,
    pages_expected: u32,
    pages_printed: u32,
    printing_succeeded: bool,
    expecting_first_page: bool,
    inside_drain: bool,
    callback: Option<CompletionCallback>,
}

impl PrintSession {
    pub fn new(
        config: &PrintingConfig,
        queue: Arc<PrinterQueryQueue>,
        spooler: Arc<dyn Spooler>,
        render_rx: mpsc::UnboundedReceiver<RenderMessage>,
    ) -> Self {
        Self {
            source_name: config.source_name.clone(),
            printing_enabled: config.enabled,
            queue,
            spooler,
            hooks: Box::new(LoggingHooks),
            render_rx,
            renderer_alive: true,
            frame: None,
            job: None,
            job_events: None,
            cookie: 0,
            pages_expected: 0,
            pages_printed: 0,
            printing_succeeded: false,
            expecting_first_page: false,
            inside_drain: false,
            callback: None,
        }
    }

    /// Replaces the platform hooks. The default only logs.
    pub fn set_hooks(&mut self, hooks: Box<dyn PlatformHooks>) {
        self.hooks = hooks;
    }

    /// Prints the current document immediately. Rendering is asynchronous, so
    /// the outcome arrives later through the completion callback; the return
    /// value only says whether the request was accepted. Returns `false`
    /// without side effect when printing is disabled or a job is active.
    pub fn print_now(&mut self, frame: &RenderFrame, params: PrintParams) -> bool {
        if !self.printing_enabled {
            tracing::debug!("print request rejected: printing disabled");
            return false;
        }
        if self.job.is_some() {
            tracing::debug!(cookie = self.cookie, "print request rejected: job already active");
            return false;
        }
        if frame.send(RenderRequest::PrintPages(params.clone())).is_err() {
            tracing::warn!("print request dropped: target frame is gone");
            return false;
        }
        self.hooks.print_requested(&params);
        self.frame = Some(frame.clone());
        true
    }

    /// Installs the single completion sink. Replacing it discards the
    /// previous one.
    pub fn set_callback(&mut self, callback: impl FnOnce(bool) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Display name the owned job uses for document metadata.
    pub fn render_source_name(&self) -> &str {
        &self.source_name
    }

    pub fn set_printing_enabled(&mut self, enabled: bool) {
        self.printing_enabled = enabled;
    }

    pub fn is_printing(&self) -> bool {
        self.job.is_some()
    }

    pub fn pages_printed(&self) -> u32 {
        self.pages_printed
    }

    pub fn pages_expected(&self) -> u32 {
        self.pages_expected
    }

    /// Services the next render message or job event. Returns `false` once
    /// nothing can arrive anymore (renderer gone and no job events pending).
    pub async fn service_next(&mut self) -> bool {
        let wakeup = next_wakeup(
            self.renderer_alive,
            &mut self.render_rx,
            self.job_events.as_mut(),
        )
        .await;
        match wakeup {
            Wakeup::Message(message) => self.handle_render_message(message).await,
            Wakeup::RendererClosed => self.render_process_gone(),
            Wakeup::Event(event) => self.handle_job_event(event),
            Wakeup::EventsClosed => self.job_events = None,
            Wakeup::Idle => return false,
        }
        true
    }

    /// The rendering worker is unrecoverable. Stops reading its messages,
    /// releases any pending settings query, and cancels the active job; the
    /// failure surfaces through the completion callback.
    pub fn render_process_gone(&mut self) {
        if self.renderer_alive {
            tracing::warn!(cookie = self.cookie, "rendering worker is gone");
        }
        self.renderer_alive = false;
        self.queue.release(self.cookie);
        if self.job.is_some() {
            self.cancel_job(PrintFailure::WorkerGone);
        }
    }

    /// The containing navigation was aborted. Cancels the active job with
    /// forced-termination semantics.
    pub fn navigation_stopped(&mut self) {
        if self.job.is_none() {
            return;
        }
        tracing::info!(cookie = self.cookie, "navigation stopped with a print job active");
        self.cancel_job(PrintFailure::Cancelled);
    }

    /// The owning document session is going away. Drains in-flight pages
    /// rather than discarding them, then services events until the job is
    /// released. No timeout is applied; a renderer that hangs while keeping
    /// its channel open blocks this call (wrap in `tokio::time::timeout` for
    /// a bound).
    pub async fn close(&mut self) {
        self.disconnect_from_current_print_job().await;
        while self.job.is_some() {
            if !self.service_next().await {
                break;
            }
        }
    }

    async fn handle_render_message(&mut self, message: RenderMessage) {
        match message {
            RenderMessage::GotDocumentCookie { cookie } => {
                self.on_got_document_cookie(cookie).await;
            }
            RenderMessage::GotPageCount { cookie, pages } => {
                self.on_got_page_count(cookie, pages).await;
            }
            RenderMessage::PagePrinted(page) => self.on_page_printed(page),
            RenderMessage::InvalidPrinterSettings => self.on_invalid_printer_settings(),
            RenderMessage::PrintingFailed { cookie } => self.on_printing_failed(cookie),
        }
    }

    async fn on_got_document_cookie(&mut self, cookie: DocumentCookie) {
        if !self.accepts_cookie(cookie) {
            return;
        }
        self.opportunistically_create_print_job(cookie).await;
    }

    async fn on_got_page_count(&mut self, cookie: DocumentCookie, pages: u32) {
        if !self.accepts_cookie(cookie) {
            return;
        }
        if !self.opportunistically_create_print_job(cookie).await {
            return;
        }
        self.pages_expected = pages;
        self.expecting_first_page = true;
        if let Some(job) = &self.job {
            job.set_page_count(pages);
        }
        tracing::debug!(cookie, pages, "expected page count recorded");
    }

    fn on_page_printed(&mut self, page: PrintedPage) {
        if self.job.is_none() || page.cookie != self.cookie {
            tracing::debug!(
                cookie = page.cookie,
                page = page.page_number,
                "dropping page without a matching job"
            );
            return;
        }
        if self.pages_expected > 0 && self.pages_printed >= self.pages_expected {
            tracing::warn!(
                cookie = page.cookie,
                page = page.page_number,
                "dropping page beyond the expected count"
            );
            return;
        }
        if self.expecting_first_page {
            tracing::debug!(cookie = page.cookie, "first rendered page arrived");
            self.expecting_first_page = false;
        }
        self.pages_printed += 1;
        if let Some(job) = &self.job {
            job.spool_page(page);
        }
    }

    fn on_invalid_printer_settings(&mut self) {
        tracing::warn!(cookie = self.cookie, "renderer reported invalid printer settings");
        if self.job.is_some() {
            self.cancel_job(PrintFailure::InvalidSettings);
        } else {
            // No job was ever built for this request; resolve it here.
            self.queue.release(self.cookie);
            self.printing_done(false);
        }
    }

    fn on_printing_failed(&mut self, cookie: DocumentCookie) {
        if self.cookie != 0 && cookie != self.cookie {
            tracing::debug!(got = cookie, current = self.cookie, "dropping stale failure report");
            return;
        }
        self.hooks.printing_failed(cookie);
        self.queue.release(cookie);
        if self.job.is_some() {
            self.cancel_job(PrintFailure::Renderer);
        } else {
            self.printing_done(false);
        }
    }

    fn handle_job_event(&mut self, event: JobEvent) {
        if event.cookie != self.cookie {
            tracing::debug!(
                got = event.cookie,
                current = self.cookie,
                "dropping event from a released job"
            );
            return;
        }
        match event.kind {
            // The drain re-checks its exit condition after every event.
            JobEventKind::AllPagesRequested => {}
            JobEventKind::PageDone { page_number } => {
                tracing::debug!(cookie = event.cookie, page_number, "page spooled");
            }
            JobEventKind::DocDone => {
                self.printing_succeeded = true;
            }
            JobEventKind::JobDone => self.release_print_job(),
            JobEventKind::Failed(reason) => {
                tracing::warn!(cookie = event.cookie, %reason, "print job failed");
                self.printing_succeeded = false;
                self.printing_done(false);
                self.release_print_job();
            }
        }
    }

    fn accepts_cookie(&self, cookie: DocumentCookie) -> bool {
        if cookie == 0 {
            tracing::warn!("dropping message without a document cookie");
            return false;
        }
        if self.cookie != 0 && cookie != self.cookie {
            tracing::debug!(
                got = cookie,
                current = self.cookie,
                "dropping stale message from a superseded job"
            );
            return false;
        }
        true
    }

    /// Creates the job for `cookie` if none exists yet. Used on the
    /// renderer-driven path, where the first correlated message arrives
    /// before any explicit job creation.
    async fn opportunistically_create_print_job(&mut self, cookie: DocumentCookie) -> bool {
        if self.job.is_some() {
            return true;
        }
        if cookie == 0 {
            return false;
        }
        let Some(query) = self.queue.pop(cookie) else {
            tracing::warn!(cookie, "no pending settings query for document");
            return false;
        };
        self.create_new_print_job(query).await
    }

    /// Installs a new job built from `query`, disconnecting from the current
    /// one first. At most one job is installed per call.
    async fn create_new_print_job(&mut self, query: PrinterQuery) -> bool {
        if self.job.is_some() {
            self.disconnect_from_current_print_job().await;
            if self.job.is_some() {
                // A cancel is pending; its terminal event has not been
                // delivered yet, so a new job cannot be installed.
                return false;
            }
        }
        if query.cookie == 0 {
            tracing::warn!("settings query cannot produce a valid print job");
            return false;
        }
        let cookie = query.cookie;
        let (job, events) = PrintJob::spawn(query, &self.source_name, Arc::clone(&self.spooler));
        tracing::info!(cookie, job = %job.id(), "print job created");
        self.job = Some(job);
        self.job_events = Some(events);
        self.cookie = cookie;
        self.pages_expected = 0;
        self.pages_printed = 0;
        self.printing_succeeded = false;
        self.expecting_first_page = false;
        true
    }

    /// Makes sure the current job has received and flushed every page the
    /// renderer already produced, then detaches from it.
    async fn disconnect_from_current_print_job(&mut self) {
        if self.job.is_none() {
            return;
        }
        if !self.renderer_alive {
            // Waiting on an unreachable renderer cannot complete.
            self.cancel_job(PrintFailure::WorkerGone);
            return;
        }
        let drained = self.render_all_missing_pages_now().await;
        if self.job.is_some() && !self.document_complete() {
            debug_assert!(!drained);
            self.terminate_print_job(true).await;
        } else if self.job.is_some() {
            // Every page is with the job; wait for the flush, then let go.
            self.terminate_print_job(false).await;
        }
    }

    /// Terminates the job: `cancel` aborts immediately and lets the terminal
    /// event release the handle; otherwise blocks until the worker reports
    /// completion and releases here.
    async fn terminate_print_job(&mut self, cancel: bool) {
        if cancel {
            self.cancel_job(PrintFailure::Cancelled);
        } else if let Some(job) = &self.job {
            job.stop().await;
            self.release_print_job();
        }
    }

    fn cancel_job(&mut self, reason: PrintFailure) {
        let Some(job) = &self.job else { return };
        tracing::info!(cookie = self.cookie, job = %job.id(), %reason, "cancelling print job");
        self.printing_succeeded = false;
        job.cancel(reason);
        // Release happens when the worker's terminal event arrives.
    }

    /// Releases the job handle. Idempotent; the single site that clears it.
    fn release_print_job(&mut self) {
        let Some(job) = self.job.take() else { return };
        tracing::info!(
            cookie = self.cookie,
            job = %job.id(),
            success = self.printing_succeeded,
            "releasing print job"
        );
        self.job_events = None;
        self.cookie = 0;
        self.pages_expected = 0;
        self.pages_printed = 0;
        self.expecting_first_page = false;
        // The worker finishes asynchronous cleanup on its own task.
        drop(job);
        let success = self.printing_succeeded;
        self.printing_done(success);
    }

    /// Invokes the completion callback exactly once, then clears it, so a
    /// later unrelated callback cannot be mistaken for this request's
    /// outcome.
    fn printing_done(&mut self, success: bool) {
        if let Some(callback) = self.callback.take() {
            callback(success);
        }
    }

    /// Asks the frame to render every page still missing, then waits for
    /// them. Returns `false` when nothing is pending or the wait gave up.
    async fn render_all_missing_pages_now(&mut self) -> bool {
        let Some(job) = &self.job else { return false };
        if self.document_complete() {
            self.printing_succeeded = true;
            return true;
        }
        let Some(frame) = &self.frame else {
            tracing::debug!(cookie = self.cookie, "no target frame to ask for missing pages");
            return false;
        };
        if frame
            .send(RenderRequest::RenderMissingPages { cookie: self.cookie })
            .is_err()
        {
            self.renderer_alive = false;
            return false;
        }
        job.request_all_pages();
        let drained = self.run_inner_drain().await;
        if drained {
            self.printing_succeeded = true;
        }
        drained
    }

    /// Waits until every expected page has been handed to the job, while
    /// still servicing page deliveries and job events. The caller's forward
    /// progress is blocked; the session's ability to observe events is not.
    /// Returns `true` when the document completed; `false` on worker loss,
    /// job failure, or re-entry.
    async fn run_inner_drain(&mut self) -> bool {
        if self.inside_drain {
            tracing::warn!("page drain is not reentrant");
            return false;
        }
        self.inside_drain = true;
        let complete = loop {
            if self.document_complete() {
                break true;
            }
            if self.job.is_none() {
                break false;
            }
            let wakeup = next_wakeup(
                self.renderer_alive,
                &mut self.render_rx,
                self.job_events.as_mut(),
            )
            .await;
            match wakeup {
                Wakeup::Message(RenderMessage::PagePrinted(page)) => self.on_page_printed(page),
                Wakeup::Message(RenderMessage::PrintingFailed { cookie })
                    if cookie == self.cookie =>
                {
                    self.printing_succeeded = false;
                    break false;
                }
                Wakeup::Message(RenderMessage::InvalidPrinterSettings) => {
                    self.printing_succeeded = false;
                    break false;
                }
                Wakeup::Message(message) => {
                    tracing::debug!(?message, "dropping control message during page drain");
                }
                Wakeup::RendererClosed => {
                    self.renderer_alive = false;
                    break false;
                }
                Wakeup::Event(event) => {
                    let terminal = event.cookie == self.cookie
                        && matches!(
                            event.kind,
                            JobEventKind::JobDone | JobEventKind::Failed(_)
                        );
                    self.handle_job_event(event);
                    if terminal {
                        break false;
                    }
                }
                Wakeup::EventsClosed => {
                    self.job_events = None;
                    break false;
                }
                Wakeup::Idle => break false,
            }
        };
        self.inside_drain = false;
        complete
    }

    fn document_complete(&self) -> bool {
        self.pages_expected > 0 && self.pages_printed >= self.pages_expected
    }
}
