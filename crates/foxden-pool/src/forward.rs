//! Port publisher: republish a worker's dynamic endpoint on a fixed external
//! port through an external TCP forwarding utility.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use foxden_core::endpoint::{endpoint_port, with_port};

/// Owns one forwarding process; lifetime bounded by the owning slot.
pub struct ForwarderHandle {
    child: Child,
    pub source_port: u16,
    pub target_port: u16,
}

impl ForwarderHandle {
    /// Stop the forwarder and reap it.
    pub async fn terminate(&mut self) {
        if let Err(err) = self.child.start_kill() {
            debug!(port = self.source_port, %err, "kill on exited forwarder");
        }
        if let Err(err) = self.child.wait().await {
            warn!(port = self.source_port, %err, "failed to reap forwarder");
        }
    }
}

/// Result of a publish attempt: the endpoint to advertise, plus the
/// forwarder handle when one was started.
pub struct Published {
    pub endpoint: String,
    pub forwarder: Option<ForwarderHandle>,
}

/// Fixed external port for a slot: `base_port + slot_index`.
pub fn external_port(base_port: u16, slot_index: usize) -> u16 {
    base_port + slot_index as u16
}

/// Publish `dynamic_endpoint` on the slot's fixed external port.
///
/// Starts `forwarder_program` (socat-compatible argument form) mapping the
/// fixed port onto the dynamic one. If the forwarder cannot be started the
/// raw dynamic endpoint is advertised unchanged: a working pool is preferred
/// over one that fails outright when the utility is missing.
pub fn publish(
    slot_index: usize,
    base_port: u16,
    dynamic_endpoint: &str,
    forwarder_program: &str,
) -> Published {
    let source_port = external_port(base_port, slot_index);

    let Some(target_port) = endpoint_port(dynamic_endpoint) else {
        warn!(
            slot_index,
            endpoint = %dynamic_endpoint,
            "dynamic endpoint has no port, advertising it unchanged"
        );
        return Published {
            endpoint: dynamic_endpoint.to_string(),
            forwarder: None,
        };
    };

    let mut command = Command::new(forwarder_program);
    command
        .arg(format!("TCP-LISTEN:{source_port},fork,reuseaddr"))
        .arg(format!("TCP:127.0.0.1:{target_port}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match command.spawn() {
        Ok(child) => {
            let endpoint =
                with_port(dynamic_endpoint, source_port).unwrap_or_else(|| {
                    dynamic_endpoint.to_string()
                });
            info!(
                slot_index,
                source_port, target_port, endpoint = %endpoint, "forwarder started"
            );
            Published {
                endpoint,
                forwarder: Some(ForwarderHandle {
                    child,
                    source_port,
                    target_port,
                }),
            }
        }
        Err(err) => {
            warn!(
                slot_index,
                source_port,
                %err,
                "forwarder unavailable, advertising dynamic endpoint directly"
            );
            Published {
                endpoint: dynamic_endpoint.to_string(),
                forwarder: None,
            }
        }
    }
}
