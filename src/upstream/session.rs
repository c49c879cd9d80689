use super::UpstreamError;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub(crate) type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relay → client frames as received from an upstream relay
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFrame {
    /// `["EVENT", subId, event]`; the event is still unvalidated
    Event { sub_id: String, event: Value },
    /// `["EOSE", subId]`
    Eose { sub_id: String },
    /// `["OK", id, accepted, message]`
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// `["NOTICE", message]`
    Notice(String),
}

impl UpstreamFrame {
    /// Parse a text frame; anything unrecognized yields `None`
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let items = value.as_array()?;
        let str_at = |i: usize| items.get(i).and_then(Value::as_str).map(str::to_string);

        match items.first()?.as_str()? {
            "EVENT" => {
                let event = items.get(2)?;
                if !event.is_object() {
                    return None;
                }
                Some(UpstreamFrame::Event {
                    sub_id: str_at(1)?,
                    event: event.clone(),
                })
            }
            "EOSE" => Some(UpstreamFrame::Eose { sub_id: str_at(1)? }),
            "OK" => Some(UpstreamFrame::Ok {
                event_id: str_at(1)?,
                accepted: items.get(2)?.as_bool()?,
                message: str_at(3).unwrap_or_default(),
            }),
            "NOTICE" => Some(UpstreamFrame::Notice(str_at(1).unwrap_or_default())),
            _ => None,
        }
    }
}

/// Open a WebSocket session, bounding connect + handshake by `limit`
pub(crate) async fn connect(endpoint: &str, limit: Duration) -> Result<UpstreamSocket, UpstreamError> {
    match timeout(limit, connect_async(endpoint)).await {
        Err(_) => Err(UpstreamError::Timeout(limit)),
        Ok(Err(e)) => Err(UpstreamError::Transport(e.to_string())),
        Ok(Ok((socket, _response))) => Ok(socket),
    }
}

pub(crate) async fn send_json(socket: &mut UpstreamSocket, frame: Value) -> Result<(), UpstreamError> {
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .map_err(|e| UpstreamError::Transport(e.to_string()))
}

/// Next text frame from the socket; `Ok(None)` once the remote closes
pub(crate) async fn next_text(socket: &mut UpstreamSocket) -> Result<Option<String>, UpstreamError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(text)),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(UpstreamError::Transport(e.to_string())),
        }
    }
}

/// One-shot historical query: send REQ, collect EVENT payloads until EOSE,
/// remote close, or `query_limit` elapses.
pub(crate) async fn query(
    endpoint: &str,
    sub_id: &str,
    filters: &[Value],
    connect_limit: Duration,
    query_limit: Duration,
) -> Result<Vec<Value>, UpstreamError> {
    let mut socket = connect(endpoint, connect_limit).await?;

    let mut req = vec![json!("REQ"), json!(sub_id)];
    req.extend(filters.iter().cloned());
    send_json(&mut socket, Value::Array(req)).await?;

    let deadline = Instant::now() + query_limit;
    let mut events = Vec::new();
    loop {
        let text = match tokio::time::timeout_at(deadline, next_text(&mut socket)).await {
            Err(_) => {
                debug!(endpoint = %endpoint, "Upstream query hit deadline before EOSE");
                break;
            }
            Ok(result) => match result? {
                Some(text) => text,
                None => break,
            },
        };
        match UpstreamFrame::parse(&text) {
            Some(UpstreamFrame::Event { sub_id: id, event }) if id == sub_id => events.push(event),
            Some(UpstreamFrame::Eose { sub_id: id }) if id == sub_id => break,
            _ => {}
        }
    }

    let _ = send_json(&mut socket, json!(["CLOSE", sub_id])).await;
    let _ = socket.close(None).await;
    Ok(events)
}

/// Publish one event and wait (bounded) for the matching OK.
///
/// Returns `(accepted, message)`; a missing OK within `ack_limit` is reported
/// as a timeout.
pub(crate) async fn publish(
    endpoint: &str,
    event: &Value,
    event_id: &str,
    connect_limit: Duration,
    ack_limit: Duration,
) -> Result<(bool, String), UpstreamError> {
    let mut socket = connect(endpoint, connect_limit).await?;
    send_json(&mut socket, json!(["EVENT", event])).await?;

    let ack = timeout(ack_limit, await_ok(&mut socket, event_id)).await;

    let _ = socket.close(None).await;
    match ack {
        Err(_) => Err(UpstreamError::Timeout(ack_limit)),
        Ok(result) => result,
    }
}

async fn await_ok(socket: &mut UpstreamSocket, event_id: &str) -> Result<(bool, String), UpstreamError> {
    while let Some(text) = next_text(socket).await? {
        if let Some(UpstreamFrame::Ok {
            event_id: id,
            accepted,
            message,
        }) = UpstreamFrame::parse(&text)
        {
            if id == event_id {
                return Ok((accepted, message));
            }
        }
    }
    Err(UpstreamError::Closed)
}
