use axum::extract::ws::{Message, WebSocket};
use futures_util::SinkExt;

use renfield_protocol::frames::ServerFrame;

/// Serialize one outbound frame and send it over the WS connection.
pub async fn frame(
    tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    payload: &ServerFrame,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(payload).unwrap_or_default();
    tx.send(Message::Text(json.into())).await.map_err(axum::Error::new)
}
