// printhost: per-document print session coordination over an async spooler

pub mod config;
pub mod messages;
pub mod print_job;
pub mod query_queue;
pub mod session;
pub mod spooler;

// Re-exports for the common surface
pub use crate::messages::{
    DocumentCookie, PrintParams, PrintedPage, RenderFrame, RenderMessage, RenderRequest,
};
pub use crate::print_job::{JobEvent, JobEventKind, PrintFailure, PrintJob};
pub use crate::query_queue::{PrintSettings, PrinterQuery, PrinterQueryQueue};
pub use crate::session::{LoggingHooks, PlatformHooks, PrintSession};
pub use crate::spooler::{SimSpooler, SpoolError, Spooler};
