//! End-to-end: a `bgapi` reply carrying `Job-Uuid` registers a one-shot
//! callback that fires when the matching `BACKGROUND_JOB` event arrives
//! (spec.md §8 scenario 2).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use rusty_esl::{Api, Client};

mod common;

#[tokio::test]
async fn bgapi_reply_job_uuid_correlates_with_background_job_event() {
    common::init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"Content-Type: auth/request\r\n\r\n").await.unwrap();
        let mut buf = vec![0u8; 512];
        let _ = sock.read(&mut buf).await.unwrap();
        sock.write_all(b"Content-Type: command/reply\r\nReply-Text: +OK accepted\r\n\r\n")
            .await
            .unwrap();

        let n = sock.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("event plain"));
        sock.write_all(b"Content-Type: command/reply\r\nReply-Text: +OK event types listed\r\n\r\n")
            .await
            .unwrap();

        let n = sock.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("bgapi originate"));
        sock.write_all(
            b"Content-Type: command/reply\r\nReply-Text: +OK Job-UUID: job-42\r\nJob-Uuid: job-42\r\n\r\n",
        )
        .await
        .unwrap();

        let body = b"Event-Name: BACKGROUND_JOB\r\nJob-Uuid: job-42\r\n\r\n+OK\r\n";
        let header = format!("Content-Type: text/event-plain\r\nContent-Length: {}\r\n\r\n", body.len());
        sock.write_all(header.as_bytes()).await.unwrap();
        sock.write_all(body).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = Client::new("127.0.0.1", addr.port(), "ClueCon", Duration::from_secs(2), 0);
    client.start("plain", ["BACKGROUND_JOB".to_string()]).await.unwrap();

    let fired = Arc::new(AtomicBool::new(false));
    let fired2 = fired.clone();
    let callback: rusty_esl::EventHandler = Arc::new(move |event| {
        assert_eq!(event.get_header("Job-Uuid").as_deref(), Some("job-42"));
        fired2.store(true, Ordering::SeqCst);
    });

    let resp = client
        .send_command(&Api::background("originate", "sofia/gw/x 1000"), Some(callback))
        .await
        .unwrap();
    assert!(resp.is_ok());

    for _ in 0..50 {
        if fired.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(fired.load(Ordering::SeqCst), "bgapi callback never fired");

    client.stop().await;
}
