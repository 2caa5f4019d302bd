//! Engine status publishing
//!
//! Pushes a retained JSON snapshot of the engine's status to the broker
//! whenever the engine or the connection changes, giving the dashboard a
//! read-only feed without ever calling into the engine. Publish failures
//! while disconnected are expected and ignored; the retained copy catches
//! observers up after the next reconnect.

use curator_engine::EngineStatus;
use curator_mqtt::{engine_status_topic, ConnectionState, MqttClient};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Serialize one status snapshot for the dashboard
fn snapshot(status: &EngineStatus, connection: &ConnectionState) -> serde_json::Value {
    serde_json::json!({
        "phase": status.phase.to_string(),
        "sceneId": status.scene_id,
        "state": status.state,
        "timeInState": status.time_in_state(),
        "connection": connection.to_string(),
        "lastError": status.last_error,
    })
}

/// Republish the engine status on every change until shutdown
pub async fn publish(
    client_id: String,
    mut status: watch::Receiver<EngineStatus>,
    client: MqttClient,
    shutdown: CancellationToken,
) {
    let topic = engine_status_topic(&client_id);
    let mut connection = client.state_watch();

    loop {
        let payload = snapshot(&status.borrow_and_update(), &connection.borrow_and_update());
        if let Err(e) = client.publish(&topic, payload.to_string(), true) {
            debug!(error = %e, "Status snapshot not published");
        }

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    debug!("Status publisher stopped");
}
