//! Client Driver: dials FreeSWITCH, authenticates, and maintains a
//! reconnect loop plus an optional send-connection pool (spec.md §4.7),
//! grounded on `original_source/client.go`'s `loop`/`sendLoop`/`runningLoop`.
//! Reconnect-with-backoff tracing style grounded on
//! `services/forwarder/src/uplink.rs`'s `UplinkSession::connect`.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::command::{self, Command};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::event::EventHandler;
use crate::filter::FilterTable;
use crate::frame::RawResponse;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

struct SendJob {
    cmd: Box<dyn Command + Send + Sync>,
    callback: Option<EventHandler>,
}

/// Event subscription requested via `Client::start`, reapplied on every
/// redial (spec.md §4.7 step 6).
struct Subscription {
    format: String,
    events: Vec<String>,
}

/// Drives a single logical connection to FreeSWITCH's Event Socket, redialing
/// and re-authenticating on disconnect. Event filters registered via
/// `filter_event`/`filter_header` persist across reconnects (spec.md §8).
pub struct Client {
    host: String,
    port: u16,
    password: String,
    timeout: Duration,
    send_conn_count: usize,
    filters: Arc<FilterTable>,
    running_tx: watch::Sender<bool>,
    running_rx: watch::Receiver<bool>,
    current: Arc<RwLock<Option<Arc<Connection>>>>,
    job_tx: Mutex<Option<mpsc::Sender<SendJob>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    self_ref: OnceLock<Weak<Client>>,
    subscription: OnceLock<Subscription>,
}

impl Client {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
        timeout: Duration,
        send_conn_count: usize,
    ) -> Arc<Client> {
        let (running_tx, running_rx) = watch::channel(true);
        let client = Arc::new(Client {
            host: host.into(),
            port,
            password: password.into(),
            timeout,
            send_conn_count,
            filters: Arc::new(FilterTable::new()),
            running_tx,
            running_rx,
            current: Arc::new(RwLock::new(None)),
            job_tx: Mutex::new(None),
            supervisor: Mutex::new(None),
            self_ref: OnceLock::new(),
            subscription: OnceLock::new(),
        });
        let _ = client.self_ref.set(Arc::downgrade(&client));
        client
    }

    fn arc_self(&self) -> Arc<Client> {
        self.self_ref
            .get()
            .and_then(Weak::upgrade)
            .expect("Client is only ever constructed via Client::new, which sets self_ref")
    }

    /// Dials, authenticates, subscribes to `events` in `format`, and starts
    /// the reconnect supervisor (spec.md §4.7). Resolves once the first
    /// successful authentication completes, or fails the first dial/auth
    /// attempt outright. The subscription is reapplied on every redial.
    ///
    /// Fails after `2 * timeout` seconds (per the `Client::new` `timeout`)
    /// if no connection has completed its auth handshake by then.
    pub async fn start(&self, format: impl Into<String>, events: impl IntoIterator<Item = String>) -> Result<()> {
        let _ = self.subscription.set(Subscription { format: format.into(), events: events.into_iter().collect() });
        let (connected_tx, connected_rx) = oneshot::channel();
        let client = self.arc_self();
        let handle = tokio::spawn(async move { client.supervisor_loop(connected_tx).await; });
        *self.supervisor.lock().await = Some(handle);
        tokio::time::timeout(self.timeout * 2, connected_rx)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::ConnClosed)?
    }

    pub async fn stop(&self) {
        let _ = self.running_tx.send(false);
        if let Some(conn) = self.current.read().await.clone() {
            conn.exit_and_close().await;
        }
        // Dropping the sender closes the job queue (spec.md §4.7 "Stop"),
        // which unblocks every send-pool worker's `recv()` with `None`.
        *self.job_tx.lock().await = None;
        if let Some(handle) = self.supervisor.lock().await.take() {
            let _ = handle.await;
        }
    }

    pub async fn filter_event(&self, name: impl Into<String>, callback: EventHandler) {
        self.filters.filter_event(name.into(), callback).await;
    }

    pub async fn filter_header(&self, header: impl Into<String>, value: impl Into<String>, callback: EventHandler) {
        self.filters.filter_header(header.into(), value.into(), callback).await;
    }

    async fn current_connection(&self) -> Option<Arc<Connection>> {
        self.current.read().await.clone()
    }

    /// Sends `cmd` directly on the primary connection and waits for its
    /// reply, regardless of send-pool configuration (mirrors the original's
    /// `Client.SendCommand`, which always uses the embedded `Connection`).
    pub async fn send_command<C: Command>(&self, cmd: &C, callback: Option<EventHandler>) -> Result<RawResponse> {
        let conn = self.current_connection().await.ok_or(Error::ConnClosed)?;
        conn.send_command(cmd, callback).await
    }

    /// Fire-and-forget send through the send-connection pool. With zero
    /// send connections configured (canonical v2 behavior, see DESIGN.md),
    /// falls back to serving the send directly off the primary connection.
    pub async fn dispatch_command<C: Command + Send + Sync + 'static>(
        &self,
        cmd: C,
        callback: Option<EventHandler>,
    ) -> Result<()> {
        if self.send_conn_count == 0 {
            let conn = self.current_connection().await.ok_or(Error::ConnClosed)?;
            let response = conn.send_command(&cmd, None).await?;
            if let Some(callback) = callback {
                let event = crate::event::from_raw_response(&response);
                callback(&event);
            }
            return Ok(());
        }
        let job_tx = self.job_tx.lock().await.clone().ok_or(Error::ConnClosed)?;
        job_tx
            .send(SendJob { cmd: Box::new(cmd), callback })
            .await
            .map_err(|_| Error::ConnClosed)
    }

    async fn supervisor_loop(self: Arc<Self>, connected_tx: oneshot::Sender<Result<()>>) {
        let mut connected_tx = Some(connected_tx);
        let mut running = self.running_rx.clone();

        while *running.borrow() {
            let dial = TcpStream::connect((self.host.as_str(), self.port));
            let stream = match tokio::time::timeout(self.timeout, dial).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, host = %self.host, port = self.port, "dial failed, retrying");
                    if let Some(tx) = connected_tx.take() {
                        let _ = tx.send(Err(Error::Io(err)));
                        return;
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
                Err(_) => {
                    tracing::warn!(host = %self.host, port = self.port, "dial timed out, retrying");
                    if let Some(tx) = connected_tx.take() {
                        let _ = tx.send(Err(Error::Timeout));
                        return;
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            let conn = Connection::wrap(stream, false, self.filters.clone());

            let Some(_auth_request) = conn.next_auth_request().await else {
                tracing::warn!("connection closed before auth/request arrived");
                if let Some(tx) = connected_tx.take() {
                    let _ = tx.send(Err(Error::ConnClosed));
                    return;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            };

            let auth = command::Auth::password(self.password.clone());
            match conn.send_command(&auth, None).await {
                Ok(resp) if resp.is_ok() => {
                    tracing::info!(host = %self.host, port = self.port, "authenticated");
                }
                Ok(_) => {
                    tracing::error!("authentication rejected by FreeSWITCH");
                    conn.close().await;
                    if let Some(tx) = connected_tx.take() {
                        let _ = tx.send(Err(Error::InvalidPassword));
                    }
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "error sending auth, retrying");
                    conn.close().await;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            }

            if let Some(sub) = self.subscription.get() {
                let cmd = command::Event::listen(sub.format.clone(), sub.events.iter().cloned());
                match conn.send_command(&cmd, None).await {
                    Ok(resp) if resp.is_ok() => {}
                    Ok(resp) => tracing::warn!(reply = ?resp.get_reply(), "event subscription rejected"),
                    Err(err) => tracing::warn!(error = %err, "error sending event subscription"),
                }
            }

            *self.current.write().await = Some(conn.clone());

            if self.send_conn_count > 0 {
                self.start_send_pool().await;
            }

            if let Some(tx) = connected_tx.take() {
                let _ = tx.send(Ok(()));
            }

            self.run_until_disconnect(&conn, &auth).await;

            *self.current.write().await = None;
            conn.close().await;

            if !*running.borrow() {
                break;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// Blocks until the connection disconnects, the client stops, or a
    /// reauthentication request arrives (handled inline, per
    /// `original_source/client.go`'s `runningLoop`).
    async fn run_until_disconnect(&self, conn: &Arc<Connection>, auth: &command::Auth) {
        let mut running = self.running_rx.clone();
        loop {
            tokio::select! {
                biased;
                changed = running.changed() => {
                    if changed.is_err() || !*running.borrow() { return; }
                }
                maybe = conn.next_disconnect() => {
                    if maybe.is_some() {
                        tracing::info!("connection disconnected");
                    }
                    return;
                }
                maybe = conn.next_auth_request() => {
                    let Some(_req) = maybe else { return; };
                    match conn.send_command(auth, None).await {
                        Ok(resp) if resp.is_ok() => tracing::info!("re-authenticated"),
                        _ => {
                            tracing::error!("re-authentication failed");
                            conn.exit_and_close().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn start_send_pool(&self) {
        let (tx, rx) = mpsc::channel::<SendJob>(32);
        *self.job_tx.lock().await = Some(tx);
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..self.send_conn_count {
            let client = self.arc_self();
            let rx = rx.clone();
            tokio::spawn(async move { client.send_worker(worker, rx).await; });
        }
    }

    async fn send_worker(self: Arc<Self>, worker: usize, jobs: Arc<Mutex<mpsc::Receiver<SendJob>>>) {
        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port))).await {
            Ok(Ok(stream)) => stream,
            _ => {
                tracing::warn!(worker, "send-pool worker failed to dial");
                return;
            }
        };
        let conn = Connection::wrap(stream, false, Arc::new(FilterTable::new()));
        let Some(_auth_request) = conn.next_auth_request().await else { return };
        let auth = command::Auth::password(self.password.clone());
        match conn.send_command(&auth, None).await {
            Ok(resp) if resp.is_ok() => {}
            _ => {
                tracing::warn!(worker, "send-pool worker auth failed");
                conn.close().await;
                return;
            }
        }

        loop {
            let job = { jobs.lock().await.recv().await };
            let Some(job) = job else { break };
            match conn.send_command(job.cmd.as_ref(), None).await {
                Ok(response) => {
                    if let Some(callback) = job.callback {
                        let event = crate::event::from_raw_response(&response);
                        callback(&event);
                    }
                }
                Err(err) => tracing::warn!(worker, error = %err, "send-pool command failed"),
            }
            if !*self.running_rx.borrow() {
                break;
            }
        }
        conn.close().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("send_conn_count", &self.send_conn_count)
            .finish_non_exhaustive()
    }
}
