//! Messaging client
//!
//! One supervisor task owns the broker connection for the whole process
//! lifetime. The public [`MqttClient`] handle is cheap to clone and only
//! enqueues: publish requests go through a bounded channel that the
//! supervisor drains, and inbound messages are forwarded to the channel the
//! caller provides. No caller ever touches connection state directly.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::error::{TransportError, TransportResult};
use crate::topics::{device_status_topic, feedback_origin, PRESENCE_OFFLINE, PRESENCE_ONLINE};

/// Capacity of the outbound publish queue; requests beyond this are dropped
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Connection state, observable through a watch channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { host: String },
    Connected { host: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting { host } => write!(f, "connecting to {host}"),
            ConnectionState::Connected { host } => write!(f, "connected to {host}"),
        }
    }
}

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Connection settings for the messaging client
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Client identity; also names the presence topic
    pub client_id: String,
    /// Primary broker address
    pub primary_host: String,
    /// Secondary broker tried after sustained primary failure
    pub fallback_host: Option<String>,
    pub port: u16,
    pub keep_alive: Duration,
    /// Reconnect backoff schedule
    pub reconnect: ReconnectPolicy,
    /// Consecutive failed attempts before alternating to the fallback
    pub fallback_after: u32,
    /// Topic patterns subscribed on every (re)connect
    pub subscriptions: Vec<String>,
}

enum Request {
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
}

/// Handle to the messaging supervisor task
#[derive(Clone)]
pub struct MqttClient {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
}

impl MqttClient {
    /// Spawn the connection supervisor and return a handle
    ///
    /// Inbound messages on subscribed topics are forwarded to `inbound`.
    /// Cancelling `shutdown` publishes a retained offline presence and
    /// closes the connection.
    pub fn spawn(
        settings: MqttSettings,
        inbound: mpsc::Sender<InboundMessage>,
        shutdown: CancellationToken,
    ) -> MqttClient {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        tokio::spawn(supervise(settings, request_rx, inbound, state_tx, shutdown));

        MqttClient {
            requests: request_tx,
            state: state_rx,
        }
    }

    /// Publish a payload to a topic, at-most-once
    ///
    /// While disconnected the message is dropped, never queued: a remote
    /// actuator that cannot be reached right now must not stall the show.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<String>,
        retain: bool,
    ) -> TransportResult<()> {
        let topic = topic.into();

        if !self.state.borrow().is_connected() {
            return Err(TransportError::NotConnected { topic });
        }

        self.requests
            .try_send(Request::Publish {
                topic: topic.clone(),
                payload: payload.into(),
                retain,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull { topic },
                mpsc::error::TrySendError::Closed(_) => TransportError::Shutdown,
            })
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch receiver for connection state changes
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }
}

/// Pick the broker address for an attempt: primary until `fallback_after`
/// consecutive failures, then alternate fallback/primary.
fn broker_for_attempt(settings: &MqttSettings, failures: u32) -> &str {
    match &settings.fallback_host {
        Some(fallback) if failures >= settings.fallback_after => {
            if (failures - settings.fallback_after) % 2 == 0 {
                fallback
            } else {
                &settings.primary_host
            }
        }
        _ => &settings.primary_host,
    }
}

async fn supervise(
    settings: MqttSettings,
    mut requests: mpsc::Receiver<Request>,
    inbound: mpsc::Sender<InboundMessage>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
) {
    let status_topic = device_status_topic(&settings.client_id);
    let mut failures: u32 = 0;

    loop {
        let host = broker_for_attempt(&settings, failures).to_string();
        let _ = state_tx.send(ConnectionState::Connecting { host: host.clone() });
        info!(broker = %host, port = settings.port, "Connecting to broker");

        let mut options = MqttOptions::new(&settings.client_id, &host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_last_will(LastWill::new(
            &status_topic,
            PRESENCE_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let mut connected = false;

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code != ConnectReturnCode::Success {
                            warn!(broker = %host, code = ?ack.code, "Broker refused connection");
                            break;
                        }
                        connected = true;
                        failures = 0;
                        let _ = state_tx.send(ConnectionState::Connected { host: host.clone() });
                        info!(broker = %host, "Connected to broker");

                        on_connected(&client, &settings, &status_topic).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).to_string();
                        handle_inbound(&inbound, publish.topic, payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected {
                            warn!(broker = %host, error = %e, "Connection to broker lost");
                        } else {
                            debug!(broker = %host, error = %e, "Connection attempt failed");
                        }
                        break;
                    }
                },
                Some(request) = requests.recv() => {
                    handle_request(&client, request, connected).await;
                }
                _ = shutdown.cancelled() => {
                    if connected {
                        // Observers should see offline on a clean exit too,
                        // not only via the last will.
                        let _ = client
                            .publish(&status_topic, QoS::AtLeastOnce, true, PRESENCE_OFFLINE)
                            .await;
                        let _ = client.disconnect().await;
                    }
                    let _ = state_tx.send(ConnectionState::Disconnected);
                    info!("Messaging client shut down");
                    return;
                }
            }
        }

        let _ = state_tx.send(ConnectionState::Disconnected);
        failures = failures.saturating_add(1);
        let delay = settings.reconnect.next(failures.saturating_sub(1));
        debug!(attempt = failures, delay_secs = delay.as_secs(), "Backing off before reconnect");

        // Keep draining (and dropping) publish requests during the backoff
        // window so producers never block on a dead connection.
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                Some(Request::Publish { topic, .. }) = requests.recv() => {
                    warn!(topic = %topic, "Dropped publish while disconnected");
                }
                _ = shutdown.cancelled() => {
                    let _ = state_tx.send(ConnectionState::Disconnected);
                    info!("Messaging client shut down");
                    return;
                }
            }
        }
    }
}

async fn on_connected(client: &AsyncClient, settings: &MqttSettings, status_topic: &str) {
    if let Err(e) = client
        .publish(status_topic, QoS::AtLeastOnce, true, PRESENCE_ONLINE)
        .await
    {
        warn!(error = %e, "Failed to announce presence");
    }

    for pattern in &settings.subscriptions {
        if let Err(e) = client.subscribe(pattern, QoS::AtMostOnce).await {
            warn!(pattern = %pattern, error = %e, "Failed to subscribe");
        } else {
            debug!(pattern = %pattern, "Subscribed");
        }
    }
}

fn handle_inbound(inbound: &mpsc::Sender<InboundMessage>, topic: String, payload: String) {
    // Feedback topics are an observability signal only; surface errors in
    // the log and pass everything through for the engine to match.
    if let Some(origin) = feedback_origin(&topic) {
        if payload.eq_ignore_ascii_case("ERROR") {
            warn!(device = %origin, "Actuator reported ERROR");
        } else {
            debug!(device = %origin, feedback = %payload, "Actuator feedback");
        }
    }

    if let Err(e) = inbound.try_send(InboundMessage { topic, payload }) {
        warn!(error = %e, "Inbound message dropped, consumer is behind");
    }
}

async fn handle_request(client: &AsyncClient, request: Request, connected: bool) {
    match request {
        Request::Publish {
            topic,
            payload,
            retain,
        } => {
            if !connected {
                warn!(topic = %topic, "Dropped publish while disconnected");
                return;
            }
            match client.publish(&topic, QoS::AtMostOnce, retain, payload).await {
                Ok(()) => debug!(topic = %topic, "Published"),
                Err(e) => error!(topic = %topic, error = %e, "Publish failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(fallback: Option<&str>) -> MqttSettings {
        MqttSettings {
            client_id: "curator-room1".to_string(),
            primary_host: "broker.local".to_string(),
            fallback_host: fallback.map(String::from),
            port: 1883,
            keep_alive: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            fallback_after: 3,
            subscriptions: vec!["room1/#".to_string()],
        }
    }

    #[test]
    fn primary_until_threshold_then_alternating() {
        let s = settings(Some("localhost"));
        assert_eq!(broker_for_attempt(&s, 0), "broker.local");
        assert_eq!(broker_for_attempt(&s, 2), "broker.local");
        assert_eq!(broker_for_attempt(&s, 3), "localhost");
        assert_eq!(broker_for_attempt(&s, 4), "broker.local");
        assert_eq!(broker_for_attempt(&s, 5), "localhost");
    }

    #[test]
    fn no_fallback_configured_stays_on_primary() {
        let s = settings(None);
        assert_eq!(broker_for_attempt(&s, 100), "broker.local");
    }

    #[tokio::test]
    async fn publish_while_disconnected_is_dropped() {
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let client = MqttClient::spawn(settings(None), inbound_tx, shutdown.clone());

        // The supervisor cannot reach a broker in tests, so the state stays
        // off Connected and the publish is rejected at the handle.
        let err = client.publish("room1/light", "ON", false).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected { topic } if topic == "room1/light"));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn state_starts_unconnected() {
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let client = MqttClient::spawn(settings(None), inbound_tx, shutdown.clone());

        assert!(!client.is_connected());

        shutdown.cancel();
    }
}
