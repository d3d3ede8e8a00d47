// src/main.rs - printhost demo binary: one scripted print, end to end
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use printhost::config::{self, Config};
use printhost::messages::{
    PrintParams, PrintedPage, RenderFrame, RenderMessage, RenderRequest,
};
use printhost::query_queue::{PrintSettings, PrinterQuery, PrinterQueryQueue};
use printhost::session::PrintSession;
use printhost::spooler::SimSpooler;

#[derive(Parser, Debug)]
#[command(name = "printhost", about = "Document print session host")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "printhost.toml")]
    config: PathBuf,

    /// Number of pages the scripted renderer produces
    #[arg(long, default_value_t = 3)]
    pages: u32,

    /// Override the configured printer device
    #[arg(long)]
    device: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    tracing::info!("Starting printhost");

    let cfg = match config::load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!(
                "Could not load '{}' ({}), using defaults",
                args.config.display(),
                err
            );
            Config::default()
        }
    };
    let device_name = args.device.unwrap_or_else(|| cfg.spooler.device_name.clone());
    let queue = Arc::new(PrinterQueryQueue::new());
    let spooler = Arc::new(SimSpooler::new());
    let (render_tx, render_rx) = mpsc::unbounded_channel();
    let (frame, frame_rx) = RenderFrame::channel();

    spawn_scripted_renderer(
        frame_rx,
        render_tx,
        Arc::clone(&queue),
        args.pages,
        cfg.spooler.copies,
    );

    let mut session = PrintSession::new(&cfg.printing, queue, spooler.clone(), render_rx);
    tracing::info!(
        source = session.render_source_name(),
        device = %device_name,
        pages = args.pages,
        "Session configured"
    );
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    session.set_callback(move |success| {
        let _ = done_tx.send(success);
    });

    let params = PrintParams {
        silent: true,
        print_background: false,
        device_name,
    };
    if !session.print_now(&frame, params) {
        tracing::error!("print request rejected");
        return Ok(());
    }

    let success = loop {
        if let Ok(success) = done_rx.try_recv() {
            break success;
        }
        if !session.service_next().await {
            break false;
        }
    };
    tracing::info!(success, "print session finished");

    for doc in spooler.documents().await {
        tracing::info!(
            cookie = doc.cookie,
            source = %doc.source_name,
            device = %doc.device_name,
            pages = doc.pages.len(),
            finished = doc.finished,
            "spooled document"
        );
    }
    Ok(())
}

/// Stands in for the rendering worker: answers each print request with a
/// cookie, a page count, and the rendered pages.
fn spawn_scripted_renderer(
    mut requests: mpsc::UnboundedReceiver<RenderRequest>,
    messages: mpsc::UnboundedSender<RenderMessage>,
    queue: Arc<PrinterQueryQueue>,
    pages: u32,
    copies: u32,
) {
    tokio::spawn(async move {
        let mut next_cookie = 41u32;
        while let Some(request) = requests.recv().await {
            match request {
                RenderRequest::PrintPages(params) => {
                    next_cookie += 1;
                    let cookie = next_cookie;
                    queue.register(PrinterQuery {
                        cookie,
                        settings: PrintSettings {
                            device_name: params.device_name.clone(),
                            copies,
                            silent: params.silent,
                            print_background: params.print_background,
                        },
                    });
                    let _ = messages.send(RenderMessage::GotDocumentCookie { cookie });
                    let _ = messages.send(RenderMessage::GotPageCount { cookie, pages });
                    for page_number in 1..=pages {
                        let _ = messages.send(RenderMessage::PagePrinted(PrintedPage {
                            cookie,
                            page_number,
                            data: vec![0u8; 64],
                        }));
                    }
                }
                RenderRequest::RenderMissingPages { cookie } => {
                    tracing::debug!(cookie, "renderer asked for missing pages");
                }
            }
        }
    });
}
