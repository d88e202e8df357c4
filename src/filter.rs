//! Three-tier filter table consulted by the Event Dispatcher: a one-shot
//! bgapi job map, a named-event map, and an ordered header-filter list
//! (spec.md §3, §4.5), grounded on `original_source/event.go`'s
//! `bgFilter`/`eventFilter`/`headerFilter` structs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::event::EventHandler;

/// The catch-all event-name filter.
pub const EVENT_ALL: &str = "ALL";

struct HeaderFilterEntry {
    header: String,
    value: String,
    callback: EventHandler,
}

pub(crate) struct FilterTable {
    bgapi: Mutex<HashMap<String, EventHandler>>,
    event: RwLock<HashMap<String, EventHandler>>,
    header: RwLock<Vec<HeaderFilterEntry>>,
}

impl FilterTable {
    pub(crate) fn new() -> Self {
        Self {
            bgapi: Mutex::new(HashMap::new()),
            event: RwLock::new(HashMap::new()),
            header: RwLock::new(Vec::new()),
        }
    }

    pub(crate) async fn register_bgapi(&self, job_uuid: String, callback: EventHandler) {
        self.bgapi.lock().await.insert(job_uuid, callback);
    }

    /// Removes and returns the callback for `job_uuid`, if any (one-shot).
    pub(crate) async fn take_bgapi(&self, job_uuid: &str) -> Option<EventHandler> {
        self.bgapi.lock().await.remove(job_uuid)
    }

    pub(crate) async fn filter_event(&self, name: String, callback: EventHandler) {
        self.event.write().await.insert(name, callback);
    }

    pub(crate) async fn get_event(&self, name: &str) -> Option<EventHandler> {
        self.event.read().await.get(name).cloned()
    }

    /// Registers (or replaces, in place, preserving its position) an ordered
    /// header filter. Duplicate-key registration is keyed on the `(header,
    /// value)` pair, not the header alone, so distinct values for the same
    /// header coexist as separate ordered entries (spec.md §3).
    pub(crate) async fn filter_header(&self, header: String, value: String, callback: EventHandler) {
        let mut guard = self.header.write().await;
        if let Some(existing) = guard.iter_mut().find(|e| e.header == header && e.value == value) {
            existing.callback = callback;
        } else {
            guard.push(HeaderFilterEntry { header, value, callback });
        }
    }

    /// Returns the callback for the first header filter (in registration
    /// order) whose header/value pair the event matches.
    pub(crate) async fn match_header(&self, event: &crate::event::Event) -> Option<EventHandler> {
        let guard = self.header.read().await;
        for entry in guard.iter() {
            if event.header_values(&entry.header).iter().any(|v| v == &entry.value) {
                return Some(entry.callback.clone());
            }
        }
        None
    }
}
