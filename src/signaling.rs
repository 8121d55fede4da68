//! WebSocket signaling listener
//!
//! Each accepted connection gets a [`ConnectionId`]. Open, close and every
//! text frame are enqueued onto the task loop; replies come back through an
//! unbounded channel drained by the connection's own tokio task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::SignalingError;
use crate::model::session::{ConnectionId, SignalingSink};
use crate::router::Router;
use crate::task_loop::TaskHandle;

/// Reply path of one WebSocket connection.
struct WsSink {
    tx: mpsc::UnboundedSender<String>,
}

impl SignalingSink for WsSink {
    fn send_text(&self, text: String) -> Result<(), SignalingError> {
        self.tx.send(text).map_err(|_| SignalingError::ConnectionClosed)
    }
}

/// Accept connections forever.
pub async fn serve(listener: TcpListener, tasks: TaskHandle<Router>) {
    static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let conn = ConnectionId(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed));
                let tasks = tasks.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, conn, tasks).await,
                        Err(e) => warn!(peer = %addr, "WebSocket handshake failed: {}", e),
                    }
                });
            }
            Err(e) => warn!("TCP accept error: {}", e),
        }
    }
}

async fn handle_connection(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    conn: ConnectionId,
    tasks: TaskHandle<Router>,
) {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    info!(peer = %addr, %conn, "WebSocket connected");
    let signaling: Arc<dyn SignalingSink> = Arc::new(WsSink { tx });
    tasks.enqueue(move |router: &mut Router| router.on_connection_open(conn, signaling));

    loop {
        tokio::select! {
            Some(text) = rx.recv() => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let text = text.as_str().to_owned();
                        tasks.enqueue(move |router: &mut Router| router.on_message(conn, &text));
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(%conn, "Dropping binary signaling frame");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%conn, "WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(peer = %addr, %conn, "WebSocket disconnected");
    tasks.enqueue(move |router: &mut Router| router.on_connection_closed(conn));
}
