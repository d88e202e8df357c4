//! Response Router: per-content-type handoff of `RawResponse` frames from
//! the receive loop to whichever component is waiting for that content type
//! (spec.md §4.3).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};

use crate::error::{Error, Result};
use crate::frame::{content_type, RawResponse};

const WAIT_WINDOW: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 1;

/// Receivers handed out once at router construction; each is owned
/// exclusively by whichever component consumes that content type.
pub(crate) struct RouterReceivers {
    pub reply: mpsc::Receiver<RawResponse>,
    pub api_response: mpsc::Receiver<RawResponse>,
    pub event_plain: mpsc::Receiver<RawResponse>,
    pub event_json: mpsc::Receiver<RawResponse>,
    pub event_xml: mpsc::Receiver<RawResponse>,
    pub auth_request: mpsc::Receiver<RawResponse>,
    pub disconnect: mpsc::Receiver<RawResponse>,
}

/// Routes each frame read off the wire to its content-type channel.
///
/// Each channel has capacity 1, approximating the original's unbuffered Go
/// channel: a send only completes instantly when the previous occupant of
/// that single slot has already been drained, so a stalled consumer still
/// causes the next same-class frame to back up and eventually time out,
/// matching spec.md §4.3's "wait up to 5s, then warn and drop" rule.
pub(crate) struct ResponseRouter {
    senders: RwLock<HashMap<&'static str, mpsc::Sender<RawResponse>>>,
    closed: std::sync::atomic::AtomicBool,
}

impl ResponseRouter {
    pub(crate) fn new() -> (Self, RouterReceivers) {
        let (reply_tx, reply_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (api_tx, api_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (plain_tx, plain_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (json_tx, json_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (xml_tx, xml_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (auth_tx, auth_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (disc_tx, disc_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut senders = HashMap::new();
        senders.insert(content_type::REPLY, reply_tx);
        senders.insert(content_type::API_RESPONSE, api_tx);
        senders.insert(content_type::EVENT_PLAIN, plain_tx);
        senders.insert(content_type::EVENT_JSON, json_tx);
        senders.insert(content_type::EVENT_XML, xml_tx);
        senders.insert(content_type::AUTH_REQUEST, auth_tx);
        senders.insert(content_type::DISCONNECT, disc_tx);

        (
            Self {
                senders: RwLock::new(senders),
                closed: std::sync::atomic::AtomicBool::new(false),
            },
            RouterReceivers {
                reply: reply_rx,
                api_response: api_rx,
                event_plain: plain_rx,
                event_json: json_rx,
                event_xml: xml_rx,
                auth_request: auth_rx,
                disconnect: disc_rx,
            },
        )
    }

    /// Hands `frame` to the channel for its content type. Returns
    /// `Ok(())` whether or not anyone was waiting to receive it (a timed-out
    /// handoff is logged and dropped, not an error); returns
    /// `Err(ResponseChannelsClosed)` only once the connection has closed and
    /// torn down the channel map, or once the matching receiver has been
    /// dropped.
    pub(crate) async fn route(
        &self,
        frame: RawResponse,
        mut running: watch::Receiver<bool>,
    ) -> Result<()> {
        let Some(content_type) = frame.content_type() else {
            tracing::warn!("dropping frame with no Content-Type");
            return Ok(());
        };
        let sender = {
            let guard = self.senders.read().await;
            guard.get(content_type).cloned()
        };
        let Some(sender) = sender else {
            if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::ResponseChannelsClosed);
            }
            tracing::warn!(%content_type, "no channel for content type, dropping frame");
            return Ok(());
        };

        tokio::select! {
            biased;
            changed = running.changed() => {
                if changed.is_err() || !*running.borrow() {
                    return Err(Error::ConnClosed);
                }
                Ok(())
            }
            result = tokio::time::timeout(WAIT_WINDOW, sender.send(frame)) => {
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(Error::ResponseChannelsClosed),
                    Err(_) => {
                        tracing::warn!(%content_type, "no consumer claimed response within 5s, dropping");
                        Ok(())
                    }
                }
            }
        }
    }

    /// Drops every sender, closing all channels so pending/future `recv()`
    /// calls return `None` immediately.
    pub(crate) async fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.senders.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::headers::HeaderMap;

    fn reply_frame() -> RawResponse {
        let mut h = HeaderMap::new();
        h.set("Content-Type", content_type::REPLY.to_string());
        h.set("Reply-Text", "+OK".to_string());
        RawResponse::new(h, Bytes::new())
    }

    #[tokio::test]
    async fn routes_frame_to_matching_receiver() {
        let (router, mut recvs) = ResponseRouter::new();
        let (_tx, running) = watch::channel(true);
        router.route(reply_frame(), running).await.unwrap();
        let got = recvs.reply.recv().await.unwrap();
        assert!(got.is_ok());
    }

    #[tokio::test]
    async fn drops_frame_for_unknown_content_type_after_close() {
        let (router, _recvs) = ResponseRouter::new();
        router.close().await;
        let (_tx, running) = watch::channel(true);
        let err = router.route(reply_frame(), running).await.unwrap_err();
        assert!(matches!(err, Error::ResponseChannelsClosed));
    }
}
