#![forbid(unsafe_code)]

mod dedup;
mod session;
mod supervisor;
mod transport;

pub use dedup::{DEFAULT_DEDUP_CAPACITY, DedupBuffer};
pub use session::{DisconnectKind, SessionSignal};
pub use supervisor::{EventSubParams, EventSubSupervisor, SupervisorHandle};
pub use transport::{Transport, TransportConnector, TransportEvent, WebSocketConnector};

use anyhow::Context;
use serde::Deserialize;

/// EventSub metadata (present on all WebSocket messages).
#[derive(Debug, Deserialize)]
pub(crate) struct EventSubMetadata {
	pub(crate) message_id: String,
	pub(crate) message_type: String,
	#[allow(dead_code)]
	pub(crate) message_timestamp: String,

	#[serde(default)]
	pub(crate) subscription_type: Option<String>,
	#[serde(default)]
	#[allow(dead_code)]
	pub(crate) subscription_version: Option<String>,
}

/// A lightweight peek struct to cheaply inspect message_type.
#[derive(Debug, Deserialize)]
pub(crate) struct EventSubMetadataPeek {
	pub(crate) metadata: EventSubMetadataPeekInner,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventSubMetadataPeekInner {
	pub(crate) message_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventSubWelcomeMessage {
	#[allow(dead_code)]
	pub(crate) metadata: EventSubMetadata,
	pub(crate) payload: EventSubWelcomePayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventSubWelcomePayload {
	pub(crate) session: EventSubWelcomeSession,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventSubWelcomeSession {
	pub(crate) id: String,

	#[serde(default)]
	pub(crate) keepalive_timeout_seconds: Option<u64>,

	#[allow(dead_code)]
	#[serde(default)]
	pub(crate) reconnect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventSubReconnectMessage {
	#[allow(dead_code)]
	pub(crate) metadata: EventSubMetadata,
	pub(crate) payload: EventSubReconnectPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventSubReconnectPayload {
	pub(crate) session: EventSubReconnectSession,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventSubReconnectSession {
	#[allow(dead_code)]
	pub(crate) id: String,
	pub(crate) reconnect_url: String,
}

/// A `notification` frame with its event payload left raw; the
/// subscription registry decodes it by type.
#[derive(Debug, Deserialize)]
pub(crate) struct EventSubNotification {
	pub(crate) metadata: EventSubMetadata,
	pub(crate) payload: EventSubNotificationPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventSubNotificationPayload {
	pub(crate) subscription: EventSubSubscription,
	pub(crate) event: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventSubSubscription {
	#[allow(dead_code)]
	pub(crate) id: String,
	#[serde(rename = "type")]
	pub(crate) r#type: String,
	#[allow(dead_code)]
	pub(crate) version: String,
	#[serde(default)]
	pub(crate) condition: serde_json::Value,
}

/// Extract `metadata.message_type` from a raw EventSub WS JSON string.
pub(crate) fn peek_message_type(raw_json: &str) -> anyhow::Result<String> {
	let peek: EventSubMetadataPeek = serde_json::from_str(raw_json).context("parse EventSub metadata peek")?;
	Ok(peek.metadata.message_type)
}

/// Parse a raw WS message as `session_welcome`.
pub(crate) fn parse_welcome(raw_json: &str) -> anyhow::Result<EventSubWelcomeMessage> {
	serde_json::from_str(raw_json).context("parse session_welcome")
}

/// Parse a raw WS message as `session_reconnect`.
pub(crate) fn parse_reconnect(raw_json: &str) -> anyhow::Result<EventSubReconnectMessage> {
	serde_json::from_str(raw_json).context("parse session_reconnect")
}

/// Parse a raw WS message as `notification`.
pub(crate) fn parse_notification(raw_json: &str) -> anyhow::Result<EventSubNotification> {
	serde_json::from_str(raw_json).context("parse notification")
}

/// Convert a `metadata.message_timestamp` RFC3339 timestamp into
/// `SystemTime`. EventSub timestamps carry fractional seconds and Zulu.
pub(crate) fn parse_message_timestamp(ts: &str) -> anyhow::Result<std::time::SystemTime> {
	let dt = chrono::DateTime::parse_from_rfc3339(ts).context("parse EventSub RFC3339 timestamp")?;
	Ok(std::time::SystemTime::from(dt.with_timezone(&chrono::Utc)))
}
