//! Event Dispatcher: the three-tier priority cascade described in spec.md
//! §4.5, grounded on `original_source/connection.go`'s `handleEvent`.

use crate::event::Event;
use crate::filter::{FilterTable, EVENT_ALL};

/// Dispatches one decoded event against `filters`:
/// 1. `BACKGROUND_JOB` events are matched by `Job-Uuid` against the one-shot
///    bgapi map and always terminate dispatch here, matched or not.
/// 2. Otherwise, the named-event filter for `Event-Name` is tried.
/// 3. Then the ordered header-filter list, in registration order.
/// 4. Finally the `ALL` catch-all.
/// The first match wins; a `None` result means no handler was registered.
pub(crate) async fn dispatch_event(event: Event, filters: &FilterTable) {
    if event.name().as_deref() == Some("BACKGROUND_JOB") {
        if let Some(job_uuid) = event.get_header("Job-Uuid") {
            if let Some(callback) = filters.take_bgapi(&job_uuid).await {
                callback(&event);
            } else {
                tracing::debug!(%job_uuid, "no bgapi callback registered for job");
            }
        } else {
            tracing::debug!("BACKGROUND_JOB event with no Job-Uuid header");
        }
        return;
    }

    if let Some(name) = event.name() {
        if let Some(callback) = filters.get_event(&name).await {
            callback(&event);
            return;
        }
    }

    if let Some(callback) = filters.match_header(&event).await {
        callback(&event);
        return;
    }

    if let Some(callback) = filters.get_event(EVENT_ALL).await {
        callback(&event);
    }
}
