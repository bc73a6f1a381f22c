use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::Message;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::chat_engine::ChatEngine;
use crate::engine::events::{ClientEvent, ConnectionId};

use super::app_state::AppState;

/// `GET /ws`: upgrade to a chat connection.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let engine = state.engine.clone();
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| {
        let (ws_tx, ws_rx) = socket.split();
        serve_connection(ws_tx, ws_rx, engine, peer, shutdown)
    })
}

/// Drive one connection from upgrade to close. The engine sees exactly one
/// connect and one disconnect per socket, including when `shutdown` fires
/// while the peer is still connected.
pub async fn serve_connection<S, R>(
    mut ws_tx: S,
    mut ws_rx: R,
    engine: Arc<ChatEngine>,
    peer: SocketAddr,
    shutdown: CancellationToken,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    let (connection_id, mut outbound) = engine.connect(&peer.ip().to_string());

    let mut writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(%connection_id, error = %e, "failed to encode outbound event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch_frame(&engine, connection_id, text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => dispatch_frame(&engine, connection_id, text),
                    Err(_) => debug!(%connection_id, "ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // Ping/Pong handled by axum
                Some(Err(e)) => {
                    debug!(%connection_id, error = %e, "websocket read failed");
                    break;
                }
            },
            // Writer ends when the socket stops accepting frames.
            _ = &mut writer => break,
            _ = shutdown.cancelled() => {
                debug!(%connection_id, "closing connection for shutdown");
                break;
            }
        }
    }

    engine.disconnect(connection_id);
    writer.abort();
}

fn dispatch_frame(engine: &ChatEngine, connection_id: ConnectionId, frame: &str) {
    match ClientEvent::decode(frame) {
        Ok(event) => engine.handle_event(connection_id, event),
        Err(e) => debug!(%connection_id, error = %e, "ignoring undecodable frame"),
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{sink, stream};

    use super::*;
    use crate::log_sink::LogSink;

    fn peer() -> SocketAddr {
        "10.0.0.7:52100".parse().unwrap()
    }

    #[tokio::test]
    async fn test_frames_reach_engine_until_stream_ends() {
        let engine = Arc::new(ChatEngine::new(LogSink::disabled()));
        let frames = stream::iter(vec![
            Ok(Message::Text(r#"{"event":"set nickname","data":"Zoe"}"#.into())),
            Ok(Message::Text("not json".into())),
            Ok(Message::Binary(r#"{"event":"chat message","data":"hey"}"#.as_bytes().to_vec().into())),
        ]);

        serve_connection(sink::drain(), frames, engine.clone(), peer(), CancellationToken::new())
            .await;

        let history = engine.history_snapshot();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].as_str(), "[10.0.0.7] [Zoe]:\nhey");
        assert_eq!(engine.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connection() {
        let engine = Arc::new(ChatEngine::new(LogSink::disabled()));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve_connection(
            sink::drain(),
            stream::pending(),
            engine.clone(),
            peer(),
            shutdown.clone(),
        ));

        while engine.connection_count() == 0 {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(engine.connection_count(), 0);
        assert_eq!(Arc::strong_count(&engine), 1);
    }
}
