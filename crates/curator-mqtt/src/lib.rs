//! Broker connection management and pub/sub transport
//!
//! The messaging client keeps one connection to an MQTT broker alive for the
//! lifetime of the process, reconnecting with bounded exponential backoff and
//! alternating to a fallback broker address after sustained failures on the
//! primary. Inbound messages on subscribed topics are forwarded as events;
//! outbound publishes are fire-and-forget and are *dropped* (never queued
//! indefinitely) while the connection is down.
//!
//! Liveness is announced through the broker: a retained `online` presence
//! message is republished on every (re)connect, and the broker's last-will
//! mechanism announces a retained `offline` if the process dies uncleanly.

mod backoff;
mod client;
mod error;
mod topics;

pub use backoff::ReconnectPolicy;
pub use client::{ConnectionState, InboundMessage, MqttClient, MqttSettings};
pub use error::{TransportError, TransportResult};
pub use topics::{
    device_status_topic, engine_status_topic, feedback_origin, is_feedback_topic, RoomTopics,
    FEEDBACK_SUFFIX, PRESENCE_OFFLINE, PRESENCE_ONLINE,
};
