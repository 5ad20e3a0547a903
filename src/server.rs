// WebSocket front door. Accepts connections on `/ws/{draft_id}`, identifies
// the user from the `x-draft-user` header (authentication happens upstream),
// and pumps frames between the socket and the draft coordinator's channels.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{info, warn};

use crate::draft::controller::OUTBOX_CAPACITY;
use crate::draft::{ClientConn, ConnId, DraftEvent, DraftSupervisor};
use crate::messages::SocketMessage;

/// Accept connections forever, spawning one task per socket.
pub async fn run(listener: TcpListener, supervisor: Arc<DraftSupervisor>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("draft server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, supervisor).await {
                warn!("connection from {addr} ended with error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    supervisor: Arc<DraftSupervisor>,
) -> anyhow::Result<()> {
    // The handshake callback rejects bad requests before the WebSocket is
    // established: unknown paths get a 404, requests without a user a 401.
    let mut draft_id = None;
    let mut user = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| {
            match parse_draft_path(request.uri().path()) {
                Some(id) => draft_id = Some(id),
                None => return Err(error_response(StatusCode::NOT_FOUND)),
            }
            match request
                .headers()
                .get("x-draft-user")
                .and_then(|v| v.to_str().ok())
            {
                Some(u) if !u.is_empty() => user = Some(u.to_string()),
                _ => return Err(error_response(StatusCode::UNAUTHORIZED)),
            }
            Ok(response)
        },
    )
    .await?;
    let (Some(draft_id), Some(user)) = (draft_id, user) else {
        // The handshake only succeeds once the callback filled both.
        return Ok(());
    };

    let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let conn_id = ConnId::next();
    let conn = ClientConn {
        id: conn_id,
        user: user.clone(),
        outbox: outbox_tx,
    };
    let events = match supervisor.register(draft_id, conn).await {
        Ok(events) => events,
        Err(e) => {
            warn!("registration failed for {addr}: {e}");
            return Ok(());
        }
    };
    info!("client {addr} registered as {user} in draft {draft_id}");

    let (write, read) = ws_stream.split();
    let writer = tokio::spawn(write_messages(outbox_rx, write));
    read_messages(read, &events, &user, conn_id, &addr.to_string()).await;
    let _ = events.send(DraftEvent::Disconnect { user, conn_id }).await;
    // The coordinator drops the outbox sender when it processes the
    // disconnect; letting the writer drain until then delivers replies that
    // were queued just before the socket closed.
    let _ = writer.await;
    Ok(())
}

fn parse_draft_path(path: &str) -> Option<i64> {
    path.strip_prefix("/ws/")?.parse().ok()
}

fn error_response(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = status;
    response
}

/// Forward inbound frames to the coordinator as [`DraftEvent::Inbound`].
/// Returns when the socket closes, errors, or the coordinator goes away.
///
/// Generic over the stream type so it can be tested with in-memory streams
/// without opening TCP ports.
pub async fn read_messages<St>(
    mut stream: St,
    events: &mpsc::Sender<DraftEvent>,
    user: &str,
    conn_id: ConnId,
    addr: &str,
) where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let message: SocketMessage = match serde_json::from_str(text.as_str()) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("unparseable frame from {addr}: {e}");
                        continue;
                    }
                };
                let event = DraftEvent::Inbound {
                    user: user.to_string(),
                    conn_id,
                    message,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!("client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("websocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
}

/// Drain the connection's outbox onto the socket as JSON text frames.
/// Returns once the coordinator drops the outbox sender or the sink fails,
/// closing the sink on the way out.
pub async fn write_messages<S>(mut outbox: mpsc::Receiver<SocketMessage>, mut sink: S)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(message) = outbox.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to encode outbound message: {e}");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
