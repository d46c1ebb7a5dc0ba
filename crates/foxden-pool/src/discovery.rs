//! Endpoint discovery: scrape a worker's output stream for the WebSocket
//! endpoint it advertises after startup.

use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt as _;
use tracing::{debug, info, warn};

use foxden_core::endpoint::split_endpoint;

use crate::worker::OutputStream;

static ENDPOINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"wss?://\S+").expect("endpoint regex is valid"));

/// Extract the first well-formed `ws://` / `wss://` URI from a line.
///
/// Trailing control and quote characters are trimmed; when a line carries
/// several URIs the first match wins.
pub fn extract_endpoint(line: &str) -> Option<String> {
    let candidate = ENDPOINT_RE.find(line)?.as_str();
    let trimmed = candidate.trim_end_matches(|c: char| c.is_control() || c == '"' || c == '\'');
    split_endpoint(trimmed)?;
    Some(trimmed.to_string())
}

/// Spawn the per-worker output reader.
///
/// The task lives for the worker's whole lifetime: it scans lines until the
/// first endpoint match (delivered through `tx`), then keeps draining and
/// logging output for observability until the stream closes. If the stream
/// closes before a match, `tx` is dropped and the waiting manager observes a
/// closed channel.
pub fn spawn_output_reader(
    slot_id: String,
    mut lines: OutputStream,
    tx: oneshot::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending = Some(tx);

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(slot = %slot_id, %err, "worker output read failed");
                    break;
                }
            };

            if pending.is_some() {
                if let Some(endpoint) = extract_endpoint(&line) {
                    info!(slot = %slot_id, endpoint = %endpoint, "worker advertised endpoint");
                    if let Some(sender) = pending.take() {
                        let _ = sender.send(endpoint);
                    }
                    continue;
                }
            }

            debug!(slot = %slot_id, line = %line, "worker output");
        }

        debug!(slot = %slot_id, "worker output stream closed");
    })
}
