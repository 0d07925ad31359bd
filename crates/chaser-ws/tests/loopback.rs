//! Connection loop against a local WebSocket server.

use chaser_ws::{
    ChannelHandler, ChannelKind, ChannelState, ConnectionConfig, WsConnection, WsWriteHandle,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recorder {
    opens: AtomicUsize,
    closes: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl ChannelHandler for Recorder {
    fn on_open(&self, handle: &WsWriteHandle) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        handle.set_state(ChannelState::Ready);
    }

    fn on_text(&self, text: &str, _handle: &WsWriteHandle) {
        self.texts.lock().push(text.to_string());
    }

    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn config(addr: std::net::SocketAddr) -> ConnectionConfig {
    ConnectionConfig {
        reconnect_delay_ms: 50,
        ..ConnectionConfig::new(ChannelKind::MarketData, format!("ws://{addr}"), "loopback")
    }
}

#[tokio::test]
async fn test_receives_frames_and_reconnects_after_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // First session: one frame then close. Second session: stay open.
        for session in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text(format!("hello-{session}"))).await.unwrap();
            if session == 0 {
                ws.close(None).await.unwrap();
            } else {
                while ws.next().await.is_some() {}
            }
        }
    });

    let recorder = Arc::new(Recorder::default());
    let token = CancellationToken::new();
    let conn = Arc::new(WsConnection::new(config(addr), recorder.clone(), token.clone()));
    let task = tokio::spawn(conn.clone().run());

    wait_for(|| recorder.texts.lock().len() == 2).await;
    assert_eq!(
        *recorder.texts.lock(),
        vec!["hello-0".to_string(), "hello-1".to_string()]
    );
    assert_eq!(recorder.opens.load(Ordering::SeqCst), 2);
    assert!(recorder.closes.load(Ordering::SeqCst) >= 1);
    wait_for(|| conn.state() == ChannelState::Ready).await;

    token.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(conn.state(), ChannelState::Disconnected);
}

#[tokio::test]
async fn test_outbound_text_reaches_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::channel::<String>(4);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = seen_tx.send(text).await;
            }
        }
    });

    let recorder = Arc::new(Recorder::default());
    let token = CancellationToken::new();
    let conn = Arc::new(WsConnection::new(config(addr), recorder, token.clone()));
    let task = tokio::spawn(conn.clone().run());

    let cell = conn.state_cell();
    cell.wait_until(Duration::from_secs(2), |s| s == ChannelState::Ready)
        .await
        .unwrap();
    conn.write_handle()
        .send_text(r#"{"id":"1","method":"ping"}"#.to_string())
        .await
        .unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, r#"{"id":"1","method":"ping"}"#);

    conn.shutdown();
    task.await.unwrap().unwrap();
}
