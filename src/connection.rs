//! Connection Supervisor: owns the socket, the write lock, the response
//! channel map, and the filter table for a single ESL connection; drives
//! `send_command` and close-once teardown (spec.md §4.6).
//!
//! Concurrency idioms (shared `watch::Receiver<bool>` running flag,
//! `tokio::select!` cancellation, `Arc<...>`-shared state across tasks) are
//! grounded on `services/receiver/src/session.rs`'s `run_session_loop`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, OnceCell};

use crate::command::Command;
use crate::dispatch::dispatch_event;
use crate::error::{Error, Result};
use crate::event::EventHandler;
use crate::filter::FilterTable;
use crate::frame::{self, content_type, RawResponse};
use crate::router::{ResponseRouter, RouterReceivers};

struct WriteSlot {
    writer: OwnedWriteHalf,
    reply_rx: mpsc::Receiver<RawResponse>,
    api_response_rx: mpsc::Receiver<RawResponse>,
}

/// A live ESL connection, inbound ("Client" dialed FreeSWITCH) or outbound
/// ("Server" accepted a FreeSWITCH-initiated connection).
pub struct Connection {
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    outbound: bool,
    write_slot: Mutex<WriteSlot>,
    auth_request_rx: Mutex<mpsc::Receiver<RawResponse>>,
    disconnect_rx: Mutex<mpsc::Receiver<RawResponse>>,
    router: Arc<ResponseRouter>,
    filters: Arc<FilterTable>,
    running_tx: watch::Sender<bool>,
    running_rx: watch::Receiver<bool>,
    close_once: OnceCell<()>,
}

impl Connection {
    /// Wraps an already-connected `TcpStream`, spawning its receive and
    /// event-dispatch loops. `filters` is shared across reconnects by the
    /// `Client` driver so registered filters survive a redial (spec.md §8
    /// "reconnect continuity"); server-accepted connections get a fresh
    /// table per connection.
    pub(crate) fn wrap(stream: TcpStream, outbound: bool, filters: Arc<FilterTable>) -> Arc<Connection> {
        let peer_addr = stream.peer_addr().ok();
        let local_addr = stream.local_addr().ok();
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (router, receivers) = ResponseRouter::new();
        let router = Arc::new(router);
        let (running_tx, running_rx) = watch::channel(true);

        let RouterReceivers {
            reply,
            api_response,
            event_plain,
            event_json,
            event_xml,
            auth_request,
            disconnect,
        } = receivers;

        let conn = Arc::new(Connection {
            peer_addr,
            local_addr,
            outbound,
            write_slot: Mutex::new(WriteSlot { writer: write_half, reply_rx: reply, api_response_rx: api_response }),
            auth_request_rx: Mutex::new(auth_request),
            disconnect_rx: Mutex::new(disconnect),
            router,
            filters,
            running_tx,
            running_rx,
            close_once: OnceCell::new(),
        });

        let recv_conn = conn.clone();
        let reader = BufReader::new(read_half);
        tokio::spawn(async move { recv_conn.receive_loop(reader).await; });

        let event_conn = conn.clone();
        tokio::spawn(async move { event_conn.event_loop(event_plain, event_json, event_xml).await; });

        conn
    }

    pub fn outbound(&self) -> bool {
        self.outbound
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        *self.running_rx.borrow()
    }

    async fn receive_loop(self: Arc<Self>, mut reader: BufReader<OwnedReadHalf>) {
        loop {
            let frame = match frame::read_frame(&mut reader).await {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::debug!(error = %err, addr = ?self.peer_addr, "frame read error, closing");
                    break;
                }
            };
            let is_disconnect = frame.content_type() == Some(content_type::DISCONNECT);
            if let Err(err) = self.router.route(frame, self.running_rx.clone()).await {
                tracing::debug!(error = %err, "response router unavailable, stopping receive loop");
                break;
            }
            if is_disconnect || !*self.running_rx.borrow() {
                break;
            }
        }
        self.close().await;
    }

    async fn event_loop(
        self: Arc<Self>,
        mut plain: mpsc::Receiver<RawResponse>,
        mut json: mpsc::Receiver<RawResponse>,
        mut xml: mpsc::Receiver<RawResponse>,
    ) {
        let mut running = self.running_rx.clone();
        loop {
            let raw = tokio::select! {
                biased;
                changed = running.changed() => {
                    if changed.is_err() || !*running.borrow() { break; }
                    continue;
                }
                maybe = plain.recv() => match maybe { Some(r) => r, None => break },
                maybe = json.recv() => match maybe { Some(r) => r, None => break },
                maybe = xml.recv() => match maybe { Some(r) => r, None => break },
            };
            match crate::event::decode(&raw) {
                Ok(event) => dispatch_event(event, &self.filters).await,
                Err(err) => tracing::warn!(error = %err, "error decoding event"),
            }
        }
    }

    /// Sends `cmd`, serialized by the write lock across the whole
    /// write-then-await-reply round trip (spec.md §4.4, §5), so concurrent
    /// callers never see each other's replies.
    pub async fn send_command<C: Command + ?Sized>(&self, cmd: &C, callback: Option<EventHandler>) -> Result<RawResponse> {
        self.send_command_deadline(cmd, None, callback).await
    }

    /// As `send_command`, but `deadline` (if given) bounds only the socket
    /// write, per spec.md §4.4 "applied to the socket write as a write
    /// deadline".
    pub async fn send_command_deadline<C: Command + ?Sized>(
        &self,
        cmd: &C,
        deadline: Option<tokio::time::Instant>,
        callback: Option<EventHandler>,
    ) -> Result<RawResponse> {
        let message = cmd.build_message();
        if !cmd.allows_embedded_crlf() && (message.contains('\r') || message.contains('\n')) {
            return Err(Error::InvalidCommand(message));
        }
        if !*self.running_rx.borrow() {
            return Err(Error::ConnClosed);
        }

        let mut slot = self.write_slot.lock().await;

        let write = async {
            slot.writer.write_all(message.as_bytes()).await?;
            slot.writer.write_all(b"\r\n\r\n").await?;
            slot.writer.flush().await
        };
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, write).await.map_err(|_| Error::Timeout)??,
            None => write.await?,
        }

        tracing::debug!(command = %message, "sent command");

        // Closing the connection drops the router's Sender for every
        // content type, which in turn makes these `recv()` calls resolve to
        // `None` — so close-during-wait is covered without a separate
        // cancellation branch here.
        let response: RawResponse = tokio::select! {
            biased;
            maybe = slot.reply_rx.recv() => maybe.ok_or(Error::ConnClosed),
            maybe = slot.api_response_rx.recv() => maybe.ok_or(Error::ConnClosed),
        }?;

        if response.is_ok() && cmd.is_background_api() {
            if let Some(callback) = callback {
                if let Some(job_uuid) = response.get_header("Job-Uuid") {
                    self.filters.register_bgapi(job_uuid.to_string(), callback).await;
                }
            }
        }

        Ok(response)
    }

    /// Subscribes to events: `myevents` when outbound and no explicit names
    /// are given, otherwise `event` (spec.md §6, from `original_source/helper.go`).
    pub async fn enable_event(&self, events: &[String]) -> Result<RawResponse> {
        if self.outbound && events.is_empty() {
            let cmd = crate::command::MyEvents::new("plain");
            self.send_command(&cmd, None).await
        } else {
            let cmd = crate::command::Event::listen("plain", events.iter().cloned());
            self.send_command(&cmd, None).await
        }
    }

    pub async fn filter_event(&self, name: impl Into<String>, callback: EventHandler) {
        self.filters.filter_event(name.into(), callback).await;
    }

    pub async fn filter_header(&self, header: impl Into<String>, value: impl Into<String>, callback: EventHandler) {
        self.filters.filter_header(header.into(), value.into(), callback).await;
    }

    pub(crate) async fn next_auth_request(&self) -> Option<RawResponse> {
        self.auth_request_rx.lock().await.recv().await
    }

    pub(crate) async fn next_disconnect(&self) -> Option<RawResponse> {
        self.disconnect_rx.lock().await.recv().await
    }

    pub(crate) fn running(&self) -> watch::Receiver<bool> {
        self.running_rx.clone()
    }

    /// Idempotent teardown: flips the running flag, closes the response
    /// router, and shuts down the write half. Safe to call more than once
    /// and from multiple tasks concurrently.
    pub async fn close(&self) {
        self.close_once
            .get_or_init(|| async {
                let _ = self.running_tx.send(false);
                self.router.close().await;
                let mut slot = self.write_slot.lock().await;
                let _ = slot.writer.shutdown().await;
            })
            .await;
    }

    /// Best-effort: sends `exit` with a 1-second budget, then closes
    /// regardless of whether a reply arrived (spec.md §4.6).
    pub async fn exit_and_close(&self) {
        let _ = tokio::time::timeout(Duration::from_secs(1), self.send_command(&crate::command::Exit, None)).await;
        self.close().await;
    }
}
