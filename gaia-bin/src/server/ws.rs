use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use gaia_lib::tasks::{LineOutcome, Shell, TransportKind};

#[derive(Clone)]
struct WsState {
    shell: Arc<Shell>,
}

/// WebSocket transport: one text frame in = one input line; output lines go
/// out as separate frames.
pub async fn run_ws_listener(listener: TcpListener, shell: Arc<Shell>) -> Result<(), anyhow::Error> {
    info!(addr = %listener.local_addr()?, "websocket listener up");
    let app = Router::new()
        .route("/", get(ws_upgrade))
        .route("/ws", get(ws_upgrade))
        .with_state(WsState { shell });
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.shell))
}

async fn handle_socket(socket: WebSocket, shell: Arc<Shell>) {
    let (mut sender, mut receiver) = socket.split();
    let (sid, mut outbound) = shell.hub.connect(TransportKind::WebSocket);

    let pump = tokio::spawn(async move {
        while let Some(line) = outbound.recv().await {
            if sender.send(Message::Text(line)).await.is_err() {
                break;
            }
        }
    });

    shell.greet(sid).await;

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(line) => {
                if shell.process_line(sid, &line).await == LineOutcome::Disconnect {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    shell.hub.disconnect(sid);
    pump.await.ok();
    debug!(session = %sid, "websocket connection closed");
}
