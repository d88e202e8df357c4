//! Outbound Server: accepts FreeSWITCH-initiated ("outbound") connections
//! and runs a per-connection dummy loop that watches for linger/disconnect
//! while a user handler drives the call (spec.md §4.8), grounded on
//! `original_source/server.go`'s `ListenAndServe`/`dummyLoop`/`Shutdown`.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::connection::Connection;
use crate::error::Result;
use crate::filter::FilterTable;

/// Cancellation handle passed to a connection handler. Flips to cancelled
/// when the peer sends a linger disconnect notice, a non-linger disconnect
/// notice, or the server shuts down — whichever comes first.
#[derive(Clone)]
pub struct HandlerContext {
    cancel_rx: watch::Receiver<bool>,
}

impl HandlerContext {
    pub fn is_cancelled(&self) -> bool {
        !*self.cancel_rx.borrow()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Listens on `addr`, handing each accepted connection to `handler` after
/// sending the ESL `connect` command is left to the handler itself (spec.md
/// does not auto-send `connect`; callers decide when to).
pub async fn listen_and_serve<F, Fut>(addr: &str, handler: F) -> Result<OutboundServer>
where
    F: Fn(HandlerContext, Arc<Connection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(true);
    let handler = Arc::new(handler);

    tokio::spawn(accept_loop(listener, handler, shutdown_rx));

    Ok(OutboundServer { shutdown_tx, local_addr })
}

async fn accept_loop<F, Fut>(listener: TcpListener, handler: Arc<F>, mut shutdown: watch::Receiver<bool>)
where
    F: Fn(HandlerContext, Arc<Connection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || !*shutdown.borrow() { return; }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => { tracing::warn!(error = %err, "accept failed"); continue; }
                };
                tracing::debug!(%peer, "accepted outbound connection");
                let conn = Connection::wrap(stream, true, Arc::new(FilterTable::new()));

                let (cancel_tx, cancel_rx) = watch::channel(true);
                let ctx = HandlerContext { cancel_rx };

                let dummy_conn = conn.clone();
                tokio::spawn(async move { dummy_conn.dummy_loop(cancel_tx).await; });

                let handler = handler.clone();
                tokio::spawn(async move { handler(ctx, conn).await; });
            }
        }
    }
}

/// Handle returned by `listen_and_serve`; dropping it does not stop the
/// listener, call `shutdown()` explicitly.
pub struct OutboundServer {
    shutdown_tx: watch::Sender<bool>,
    local_addr: std::net::SocketAddr,
}

impl OutboundServer {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(false);
    }
}

impl Connection {
    /// Watches the outbound connection for disconnect notices, treating a
    /// `Content-Disposition: linger` notice as "cancel the handler but keep
    /// the socket open" and any other disconnect as "tear the connection
    /// down" (spec.md §4.8).
    async fn dummy_loop(self: Arc<Self>, cancel_tx: watch::Sender<bool>) {
        let mut running = self.running();
        loop {
            tokio::select! {
                biased;
                changed = running.changed() => {
                    if changed.is_err() || !*running.borrow() {
                        let _ = cancel_tx.send(false);
                        return;
                    }
                }
                maybe = self.next_disconnect() => {
                    let Some(frame) = maybe else {
                        let _ = cancel_tx.send(false);
                        return;
                    };
                    if frame.get_header("Content-Disposition") == Some("linger") {
                        tracing::info!(addr = ?self.peer_addr(), "linger disconnect, cancelling handler only");
                        let _ = cancel_tx.send(false);
                        continue;
                    }
                    tracing::info!(addr = ?self.peer_addr(), "disconnect notice, closing outbound connection");
                    self.close().await;
                    let _ = cancel_tx.send(false);
                    return;
                }
                maybe = self.next_auth_request() => {
                    if maybe.is_none() {
                        let _ = cancel_tx.send(false);
                        return;
                    }
                    tracing::debug!("ignoring unexpected auth/request on outbound connection");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn accepts_and_invokes_handler() {
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked2 = invoked.clone();
        let server = listen_and_serve("127.0.0.1:0", move |_ctx, _conn| {
            let invoked = invoked2.clone();
            async move {
                invoked.store(true, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();

        let _client = TcpStream::connect(server.local_addr()).await.unwrap();
        for _ in 0..50 {
            if invoked.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(invoked.load(Ordering::SeqCst));
        server.shutdown();
    }
}
