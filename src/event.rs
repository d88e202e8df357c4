//! Event Decoder: turns a `RawResponse` event frame into an `Event`
//! (spec.md §4.2).

use std::sync::Arc;

use bytes::Bytes;
use percent_encoding::percent_decode_str;

use crate::error::{Error, Result};
use crate::frame::{content_type, RawResponse};
use crate::headers::HeaderMap;

/// A decoded FreeSWITCH event. Header values are stored as received
/// (percent-encoded) and decoded lazily on access, matching the original's
/// `url.PathUnescape`-on-read behavior.
#[derive(Debug, Clone, Default)]
pub struct Event {
    headers: HeaderMap,
    pub body: Bytes,
}

/// Callback invoked by the Event Dispatcher for a matched filter.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

impl Event {
    pub fn name(&self) -> Option<String> {
        self.get_header("Event-Name")
    }

    /// Percent-decodes the first value for `name`, falling back to the raw
    /// string on an invalid percent sequence rather than failing the lookup.
    pub fn get_header(&self, name: &str) -> Option<String> {
        self.headers.get(name).map(decode_lossy)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// All values for `name`, percent-decoded, in header-filter match order.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers.get_all(name).iter().map(|v| decode_lossy(v)).collect()
    }

    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

fn decode_lossy(raw: &str) -> String {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Decodes an event body per `raw.content_type()` (spec.md §4.2).
pub fn decode(raw: &RawResponse) -> Result<Event> {
    match raw.content_type() {
        Some(content_type::EVENT_PLAIN) => decode_plain(&raw.body),
        Some(content_type::EVENT_JSON) => decode_json(&raw.body),
        Some(content_type::EVENT_XML) => Err(Error::NotImplemented("text/event-xml")),
        other => Err(Error::UnsupportedMessageType(
            other.unwrap_or_default().to_string(),
        )),
    }
}

/// Builds an `Event` directly from a response's headers/body, for contexts
/// (bgapi callbacks, send-pool callbacks) that hand a raw reply to a
/// callback expecting the `Event` shape without a real event frame.
pub(crate) fn from_raw_response(raw: &RawResponse) -> Event {
    // RawResponse exposes only targeted accessors, not a full header
    // iterator; bgapi/send-pool callback synthesis only ever needs the
    // handful of headers callers actually inspect on a reply.
    let mut headers = HeaderMap::new();
    for name in ["Job-Uuid", "Reply-Text"] {
        for value in raw.header_values(name) {
            headers.append(name, value.clone());
        }
    }
    Event { headers, body: raw.body.clone() }
}

/// Nested MIME-header-block parser shared by `text/event-plain` bodies.
/// Unlike `frame::read_frame` this runs synchronously over an
/// already-buffered body slice (no further socket I/O is needed: the
/// Frame Reader already consumed exactly `Content-Length` bytes).
fn decode_plain(body: &[u8]) -> Result<Event> {
    let text = String::from_utf8_lossy(body);
    let mut headers = HeaderMap::new();
    let mut consumed = 0usize;
    for line in text.split_inclusive('\n') {
        consumed += line.len();
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.append(name.trim(), value.trim().to_string());
        }
    }
    let inner_body = if let Some(len) = headers.get("Content-Length") {
        let len: usize = len.parse().map_err(Error::InvalidContentLength)?;
        let start = consumed.min(body.len());
        let end = (start + len).min(body.len());
        Bytes::copy_from_slice(&body[start..end])
    } else {
        Bytes::new()
    };
    Ok(Event { headers, body: inner_body })
}

fn decode_json(body: &[u8]) -> Result<Event> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let mut headers = HeaderMap::new();
    let mut inner_body = Bytes::new();
    let Some(obj) = value.as_object() else {
        return Ok(Event { headers, body: inner_body });
    };
    for (key, val) in obj {
        if key == "_body" {
            if let Some(s) = val.as_str() {
                inner_body = Bytes::copy_from_slice(s.as_bytes());
            }
            continue;
        }
        match val {
            serde_json::Value::String(s) => headers.append(key, s.clone()),
            serde_json::Value::Array(items) => {
                if let Some(strings) = all_strings(items) {
                    for s in strings {
                        headers.append(key, s);
                    }
                } else {
                    tracing::warn!(header = %key, "dropping non-string array event header");
                }
            }
            _ => tracing::warn!(header = %key, "dropping non-string event header"),
        }
    }
    Ok(Event { headers, body: inner_body })
}

fn all_strings(items: &[serde_json::Value]) -> Option<Vec<String>> {
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}
