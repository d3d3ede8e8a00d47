// src/query_queue.rs - pending printer settings queries, keyed by cookie
use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::messages::DocumentCookie;

/// Printer settings resolved for one pending request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintSettings {
    pub device_name: String,
    #[serde(default = "default_copies")]
    pub copies: u32,
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub print_background: bool,
}

fn default_copies() -> u32 {
    1
}

/// A resolved settings query waiting to be claimed by its print job.
#[derive(Debug, Clone)]
pub struct PrinterQuery {
    pub cookie: DocumentCookie,
    pub settings: PrintSettings,
}

/// Owns the settings queries that have been resolved but not yet claimed.
///
/// The session pops the query for a cookie when it builds the job, and
/// releases it when a request is abandoned before a job exists.
#[derive(Debug, Default)]
pub struct PrinterQueryQueue {
    pending: Mutex<HashMap<DocumentCookie, PrinterQuery>>,
}

impl PrinterQueryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, query: PrinterQuery) {
        let mut pending = self.pending.lock().expect("printer query lock poisoned");
        if pending.insert(query.cookie, query).is_some() {
            tracing::warn!("replaced a pending settings query that was never claimed");
        }
    }

    pub fn pop(&self, cookie: DocumentCookie) -> Option<PrinterQuery> {
        let mut pending = self.pending.lock().expect("printer query lock poisoned");
        pending.remove(&cookie)
    }

    /// Drops the pending query for `cookie`, if any. Returns whether one
    /// existed. A cookie of `0` never matches.
    pub fn release(&self, cookie: DocumentCookie) -> bool {
        if cookie == 0 {
            return false;
        }
        let mut pending = self.pending.lock().expect("printer query lock poisoned");
        if pending.remove(&cookie).is_some() {
            tracing::debug!(cookie, "released pending settings query");
            true
        } else {
            false
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .expect("printer query lock poisoned")
            .len()
    }
}
