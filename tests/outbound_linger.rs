//! End-to-end: an outbound (server-accepted) connection's dummy loop cancels
//! the handler context on a `linger` disconnect notice without tearing the
//! connection down (spec.md §8 scenario 6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use rusty_esl::listen_and_serve;

mod common;

#[tokio::test]
async fn linger_disconnect_cancels_handler_without_closing_connection() {
    common::init_tracing();
    let handler_saw_cancel = Arc::new(AtomicBool::new(false));
    let handler_saw_cancel2 = handler_saw_cancel.clone();
    let still_running_after_linger = Arc::new(AtomicBool::new(false));
    let still_running_after_linger2 = still_running_after_linger.clone();

    let server = listen_and_serve("127.0.0.1:0", move |ctx, conn| {
        let handler_saw_cancel = handler_saw_cancel2.clone();
        let still_running_after_linger = still_running_after_linger2.clone();
        async move {
            ctx.cancelled().await;
            handler_saw_cancel.store(true, Ordering::SeqCst);
            // The connection itself must still be usable after a linger
            // cancel — only the handler's work is cut short.
            still_running_after_linger.store(conn.is_running(), Ordering::SeqCst);
        }
    })
    .await
    .unwrap();

    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
    client
        .write_all(b"Content-Type: text/disconnect-notice\r\nContent-Disposition: linger\r\n\r\n")
        .await
        .unwrap();

    for _ in 0..100 {
        if handler_saw_cancel.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(handler_saw_cancel.load(Ordering::SeqCst), "handler context was never cancelled");
    assert!(still_running_after_linger.load(Ordering::SeqCst), "linger must not close the connection");

    server.shutdown();
}

#[tokio::test]
async fn non_linger_disconnect_closes_the_connection() {
    common::init_tracing();
    let closed = Arc::new(AtomicBool::new(false));
    let closed2 = closed.clone();

    let server = listen_and_serve("127.0.0.1:0", move |ctx, conn| {
        let closed = closed2.clone();
        async move {
            ctx.cancelled().await;
            // give dummy_loop's self.close().await a moment to finish
            tokio::time::sleep(Duration::from_millis(20)).await;
            closed.store(!conn.is_running(), Ordering::SeqCst);
        }
    })
    .await
    .unwrap();

    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
    client.write_all(b"Content-Type: text/disconnect-notice\r\n\r\n").await.unwrap();

    for _ in 0..100 {
        if closed.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(closed.load(Ordering::SeqCst), "non-linger disconnect must close the connection");

    server.shutdown();
}
