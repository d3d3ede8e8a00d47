use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use printhost::config::PrintingConfig;
use printhost::messages::{
    DocumentCookie, PrintParams, PrintedPage, RenderFrame, RenderMessage, RenderRequest,
};
use printhost::query_queue::{PrintSettings, PrinterQuery, PrinterQueryQueue};
use printhost::session::{PlatformHooks, PrintSession};
use printhost::spooler::SimSpooler;

const TEST_TIMEOUT: Duration = Duration::from_secs(2);

struct Rig {
    render_tx: mpsc::UnboundedSender<RenderMessage>,
    frame: RenderFrame,
    frame_rx: mpsc::UnboundedReceiver<RenderRequest>,
    queue: Arc<PrinterQueryQueue>,
    spooler: Arc<SimSpooler>,
    done_rx: mpsc::UnboundedReceiver<bool>,
}

fn harness(enabled: bool) -> (PrintSession, Rig) {
    let (render_tx, render_rx) = mpsc::unbounded_channel();
    let (frame, frame_rx) = RenderFrame::channel();
    let queue = Arc::new(PrinterQueryQueue::new());
    let spooler = Arc::new(SimSpooler::new());
    let mut session = PrintSession::new(
        &PrintingConfig {
            enabled,
            source_name: "test document".to_string(),
        },
        Arc::clone(&queue),
        spooler.clone(),
        render_rx,
    );
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    session.set_callback(move |success| {
        let _ = done_tx.send(success);
    });
    (
        session,
        Rig {
            render_tx,
            frame,
            frame_rx,
            queue,
            spooler,
            done_rx,
        },
    )
}

fn params(device_name: &str) -> PrintParams {
    PrintParams {
        silent: true,
        print_background: false,
        device_name: device_name.to_string(),
    }
}

fn settings(device_name: &str) -> PrintSettings {
    PrintSettings {
        device_name: device_name.to_string(),
        copies: 1,
        silent: true,
        print_background: false,
    }
}

fn page(cookie: DocumentCookie, page_number: u32) -> PrintedPage {
    PrintedPage {
        cookie,
        page_number,
        data: vec![0u8; 16],
    }
}

/// Registers the settings query and delivers cookie plus page count, the way
/// the rendering worker answers an accepted print request.
fn begin_rendering(rig: &Rig, cookie: DocumentCookie, pages: u32) {
    rig.queue.register(PrinterQuery {
        cookie,
        settings: settings("Test Printer"),
    });
    rig.render_tx
        .send(RenderMessage::GotDocumentCookie { cookie })
        .expect("send cookie");
    rig.render_tx
        .send(RenderMessage::GotPageCount { cookie, pages })
        .expect("send page count");
}

async fn drive_until(session: &mut PrintSession, mut cond: impl FnMut(&PrintSession) -> bool) {
    timeout(TEST_TIMEOUT, async {
        while !cond(session) {
            assert!(
                session.service_next().await,
                "session went idle before reaching the expected state"
            );
        }
    })
    .await
    .expect("timed out driving the session");
}

/// Drives the session until the completion callback fires, returning its
/// success flag.
async fn drive_until_done(session: &mut PrintSession, rig: &mut Rig) -> bool {
    timeout(TEST_TIMEOUT, async {
        loop {
            if let Ok(success) = rig.done_rx.try_recv() {
                return success;
            }
            assert!(
                session.service_next().await,
                "session went idle before the callback fired"
            );
        }
    })
    .await
    .expect("print did not resolve in time")
}

#[tokio::test]
async fn full_print_cycle_reports_success() {
    let (mut session, mut rig) = harness(true);
    assert!(session.print_now(&rig.frame, params("Office Laser")));

    begin_rendering(&rig, 42, 3);
    for page_number in 1..=3 {
        rig.render_tx
            .send(RenderMessage::PagePrinted(page(42, page_number)))
            .expect("send page");
    }

    assert!(drive_until_done(&mut session, &mut rig).await);
    assert!(!session.is_printing());
    // Exactly one callback per request cycle.
    assert!(rig.done_rx.try_recv().is_err());

    let docs = rig.spooler.documents().await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].cookie, 42);
    assert_eq!(docs[0].pages, vec![1, 2, 3]);
    assert!(docs[0].finished);
}

#[tokio::test]
async fn second_print_now_while_job_active_sends_nothing() {
    let (mut session, mut rig) = harness(true);
    assert!(session.print_now(&rig.frame, params("Office Laser")));
    begin_rendering(&rig, 7, 3);
    drive_until(&mut session, |s| s.is_printing()).await;

    assert!(!session.print_now(&rig.frame, params("Office Laser")));

    // Only the first request ever reached the frame.
    assert!(matches!(
        rig.frame_rx.try_recv(),
        Ok(RenderRequest::PrintPages(_))
    ));
    assert!(rig.frame_rx.try_recv().is_err());
}

#[tokio::test]
async fn print_now_rejected_when_printing_disabled() {
    let (mut session, mut rig) = harness(false);

    assert!(!session.print_now(&rig.frame, params("Office Laser")));

    assert!(rig.frame_rx.try_recv().is_err());
    assert!(!session.is_printing());
}

#[tokio::test]
async fn renderer_death_after_partial_render_reports_failure() {
    let (mut session, mut rig) = harness(true);
    assert!(session.print_now(&rig.frame, params("Office Laser")));
    begin_rendering(&rig, 7, 5);
    for page_number in 1..=2 {
        rig.render_tx
            .send(RenderMessage::PagePrinted(page(7, page_number)))
            .expect("send page");
    }
    drive_until(&mut session, |s| s.pages_printed() == 2).await;

    session.render_process_gone();

    assert!(!drive_until_done(&mut session, &mut rig).await);
    assert!(!session.is_printing());
    assert!(rig.done_rx.try_recv().is_err());

    // The session is usable again for a fresh request.
    assert!(session.print_now(&rig.frame, params("Office Laser")));
}

#[tokio::test]
async fn close_drains_outstanding_pages() {
    let (mut session, mut rig) = harness(true);
    assert!(session.print_now(&rig.frame, params("Office Laser")));
    begin_rendering(&rig, 11, 3);
    rig.render_tx
        .send(RenderMessage::PagePrinted(page(11, 1)))
        .expect("send page");
    drive_until(&mut session, |s| s.pages_printed() == 1).await;

    // The remaining pages arrive while the session is already closing.
    let late_tx = rig.render_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = late_tx.send(RenderMessage::PagePrinted(page(11, 2)));
        let _ = late_tx.send(RenderMessage::PagePrinted(page(11, 3)));
    });

    timeout(TEST_TIMEOUT, session.close())
        .await
        .expect("close timed out");

    assert!(!session.is_printing());
    assert!(matches!(rig.done_rx.try_recv(), Ok(true)));

    let docs = rig.spooler.documents().await;
    assert_eq!(docs[0].pages, vec![1, 2, 3]);
    assert!(docs[0].finished);
}

#[tokio::test]
async fn close_gives_up_when_the_renderer_dies() {
    let (mut session, mut rig) = harness(true);
    assert!(session.print_now(&rig.frame, params("Office Laser")));
    begin_rendering(&rig, 12, 3);
    rig.render_tx
        .send(RenderMessage::PagePrinted(page(12, 1)))
        .expect("send page");
    drive_until(&mut session, |s| s.pages_printed() == 1).await;

    // Drop the only sender: the renderer dies mid-drain.
    let render_tx = rig.render_tx;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(render_tx);
    });

    timeout(TEST_TIMEOUT, session.close())
        .await
        .expect("close timed out");

    assert!(!session.is_printing());
    assert!(matches!(rig.done_rx.try_recv(), Ok(false)));

    let docs = rig.spooler.documents().await;
    assert!(docs[0].aborted);
}

#[tokio::test]
async fn navigation_stop_cancels_the_active_job() {
    let (mut session, mut rig) = harness(true);
    assert!(session.print_now(&rig.frame, params("Office Laser")));
    begin_rendering(&rig, 8, 4);
    rig.render_tx
        .send(RenderMessage::PagePrinted(page(8, 1)))
        .expect("send page");
    drive_until(&mut session, |s| s.pages_printed() == 1).await;

    session.navigation_stopped();

    assert!(!drive_until_done(&mut session, &mut rig).await);
    assert!(!session.is_printing());

    let docs = rig.spooler.documents().await;
    assert!(docs[0].aborted);
}

#[tokio::test]
async fn invalid_settings_before_any_page_reports_failure() {
    let (mut session, mut rig) = harness(true);
    assert!(session.print_now(&rig.frame, params("Office Laser")));
    begin_rendering(&rig, 9, 3);
    rig.render_tx
        .send(RenderMessage::InvalidPrinterSettings)
        .expect("send invalid settings");

    assert!(!drive_until_done(&mut session, &mut rig).await);
    assert!(!session.is_printing());

    let docs = rig.spooler.documents().await;
    assert!(docs[0].aborted);
}

#[tokio::test]
async fn invalid_settings_without_a_job_reports_failure() {
    let (mut session, mut rig) = harness(true);
    assert!(session.print_now(&rig.frame, params("Office Laser")));
    rig.render_tx
        .send(RenderMessage::InvalidPrinterSettings)
        .expect("send invalid settings");

    assert!(!drive_until_done(&mut session, &mut rig).await);
    assert!(!session.is_printing());
}

#[tokio::test]
async fn renderer_failure_report_runs_the_platform_hook() {
    struct RecordingHooks {
        failures: Arc<AtomicU32>,
    }
    impl PlatformHooks for RecordingHooks {
        fn printing_failed(&self, _cookie: DocumentCookie) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    let (mut session, mut rig) = harness(true);
    let failures = Arc::new(AtomicU32::new(0));
    session.set_hooks(Box::new(RecordingHooks {
        failures: Arc::clone(&failures),
    }));
    assert!(session.print_now(&rig.frame, params("Office Laser")));
    begin_rendering(&rig, 13, 2);
    rig.render_tx
        .send(RenderMessage::PagePrinted(page(13, 1)))
        .expect("send page");
    rig.render_tx
        .send(RenderMessage::PrintingFailed { cookie: 13 })
        .expect("send failure");

    assert!(!drive_until_done(&mut session, &mut rig).await);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert!(!session.is_printing());
}

#[tokio::test]
async fn mismatched_cookie_messages_are_ignored() {
    let (mut session, rig) = harness(true);
    assert!(session.print_now(&rig.frame, params("Office Laser")));
    begin_rendering(&rig, 5, 2);
    drive_until(&mut session, |s| s.pages_expected() == 2).await;

    rig.render_tx
        .send(RenderMessage::PagePrinted(page(6, 1)))
        .expect("send stale page");
    rig.render_tx
        .send(RenderMessage::GotPageCount { cookie: 6, pages: 9 })
        .expect("send stale count");
    for _ in 0..2 {
        assert!(session.service_next().await);
    }

    assert_eq!(session.pages_printed(), 0);
    assert_eq!(session.pages_expected(), 2);
    assert!(session.is_printing());
}
