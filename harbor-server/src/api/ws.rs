//! WebSocket bridge
//!
//! Streaming services speak in typed channels; this module carries their
//! frames as JSON text messages. Requests flow through an unbounded channel
//! so a slow service never stalls the socket reader. When the service ends
//! with an error, a final `{"type":"error"}` frame is sent before closing.

use std::future::Future;

use axum::extract::ws::{Message, WebSocket};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::service::{Result, ServiceError};

const RESPONSE_BUFFER: usize = 64;

/// Runs `serve` against the socket until it returns
pub async fn bridge<Req, Resp, F, Fut>(mut socket: WebSocket, serve: F)
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: FnOnce(mpsc::UnboundedReceiver<Req>, mpsc::Sender<Resp>) -> Fut,
    Fut: Future<Output = Result<()>> + Send,
{
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, mut resp_rx) = mpsc::channel::<Resp>(RESPONSE_BUFFER);
    let serve = serve(req_rx, resp_tx);
    tokio::pin!(serve);

    let mut req_tx = Some(req_tx);
    let mut socket_open = true;

    let result = loop {
        tokio::select! {
            result = &mut serve => break result,
            Some(resp) = resp_rx.recv() => {
                if socket_open && !send_json(&mut socket, &resp).await {
                    tracing::debug!("Socket closed while sending, dropping further frames");
                    socket_open = false;
                    req_tx = None;
                }
            }
            msg = socket.recv(), if socket_open => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Req>(text.as_str()) {
                    Ok(req) => {
                        if let Some(tx) = &req_tx {
                            let _ = tx.send(req);
                        }
                    }
                    Err(err) => {
                        break Err(ServiceError::InvalidArgument(format!("malformed frame: {err}")));
                    }
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    socket_open = false;
                    req_tx = None;
                }
                Some(Ok(_)) => {}
            }
        }
    };

    if !socket_open {
        return;
    }

    while let Ok(resp) = resp_rx.try_recv() {
        if !send_json(&mut socket, &resp).await {
            return;
        }
    }

    if let Err(err) = result {
        tracing::debug!(code = %err.code(), "Stream ended with error: {}", err);
        let frame = serde_json::json!({
            "type": "error",
            "code": err.code().to_string(),
            "message": err.to_string(),
        });
        let _ = send_json(&mut socket, &frame).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Returns false once the socket can no longer be written
async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    let text = match serde_json::to_string(value) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode stream frame");
            return true;
        }
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

/// Resolves once the client stops sending. For server-push streams.
pub async fn closed<T>(mut rx: mpsc::UnboundedReceiver<T>) {
    while rx.recv().await.is_some() {}
}
