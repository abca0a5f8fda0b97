/// JSON-lines bridge between the surfaces' renderer and the control loop.
///
/// Inbound (stdin), one object per line:
///   {"surface": "main", "message": "get-settings", "value": ...}   → command
///   {"line": "8|2024-..."}                                         → log record
///
/// Outbound (stdout): {"surface": "...", "channel": "...", "payload": ...}
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatch::CommandMessage;
use crate::event::AppEvent;
use crate::surface::Outbound;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    Line { line: String },
    Command(CommandMessage),
}

/// Reads inbound lines until EOF, then asks the control loop to shut down.
pub async fn read_inbound<R>(reader: R, events: mpsc::Sender<AppEvent>, lines: mpsc::Sender<String>)
where
    R: AsyncBufRead + Unpin,
{
    let mut input = reader.lines();
    loop {
        let raw = match input.next_line().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(e) => {
                warn!("[bridge] Failed to read input: {e}");
                break;
            }
        };
        if raw.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Inbound>(&raw) {
            Ok(Inbound::Line { line }) => {
                if lines.send(line).await.is_err() {
                    debug!("[bridge] Ingestion session is gone; dropping record");
                }
            }
            Ok(Inbound::Command(command)) => {
                if events.send(AppEvent::Command(command)).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("[bridge] Ignoring malformed input: {e}"),
        }
    }
    info!("[bridge] Input closed");
    let _ = events.send(AppEvent::Shutdown).await;
}

/// Writes every outbound message as one JSON line until all senders are gone.
pub async fn write_outbound<W>(mut rx: mpsc::UnboundedReceiver<Outbound>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut encoded = match serde_json::to_vec(&message) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("[bridge] Failed to encode '{}': {e}", message.channel);
                continue;
            }
        };
        encoded.push(b'\n');
        if let Err(e) = writer.write_all(&encoded).await {
            warn!("[bridge] Output closed: {e}");
            break;
        }
        let _ = writer.flush().await;
    }
}
