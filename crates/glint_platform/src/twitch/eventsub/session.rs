#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use super::transport::{Transport, TransportConnector, TransportEvent};
use super::{DedupBuffer, parse_notification, parse_reconnect, parse_welcome, peek_message_type};
use crate::twitch::subscriptions::{SubscriptionRegistry, SubscriptionSink};

/// Close code the upstream uses for keepalive failures.
const CLOSE_CODE_KEEPALIVE_FAILURE: u16 = 4002;

/// Keepalive timeout applied when the welcome omits one.
const DEFAULT_KEEPALIVE_SECS: u64 = 10;

/// How a session ended, from the supervisor's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
	/// Deliberate or server-initiated orderly close.
	Ordinary,
	/// Keepalive expiry or a 4002 close; the session must be replaced.
	Unwanted,
}

/// Session-to-supervisor signal. `instance` identifies the emitting
/// session so signals from superseded sessions can be ignored.
#[derive(Debug)]
pub enum SessionSignal {
	Welcomed { instance: u64, session_id: String },
	ReconnectRequested { instance: u64, url: String },
	Closed { instance: u64, kind: DisconnectKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
	Connecting,
	Active { welcomed: bool },
}

pub(crate) struct SessionParams {
	pub(crate) instance: u64,
	pub(crate) url: Url,
	pub(crate) registry: Arc<SubscriptionRegistry>,
	pub(crate) sink: Arc<dyn SubscriptionSink>,
	pub(crate) dedup: Arc<DedupBuffer>,
	pub(crate) signals: mpsc::Sender<SessionSignal>,
	pub(crate) keepalive_check_interval: Duration,
}

/// Owning handle for one spawned session task.
pub(crate) struct SessionHandle {
	pub(crate) instance: u64,
	close_tx: mpsc::Sender<()>,
	task: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
	/// Ask the session to close its transport and wait for it to finish.
	pub(crate) async fn shutdown(self) {
		let _ = self.close_tx.send(()).await;
		let _ = self.task.await;
	}
}

pub(crate) fn spawn_session(connector: Arc<dyn TransportConnector>, params: SessionParams) -> SessionHandle {
	let (close_tx, close_rx) = mpsc::channel(1);
	let instance = params.instance;
	let task = tokio::spawn(run_session(connector, params, close_rx));
	SessionHandle {
		instance,
		close_tx,
		task,
	}
}

async fn run_session(connector: Arc<dyn TransportConnector>, params: SessionParams, mut close_rx: mpsc::Receiver<()>) {
	let instance = params.instance;

	let mut transport: Box<dyn Transport> = match connector.connect(&params.url).await {
		Ok(transport) => transport,
		Err(e) => {
			warn!(instance, url = %params.url, error = %e, "eventsub connect failed");
			let _ = params
				.signals
				.send(SessionSignal::Closed {
					instance,
					kind: DisconnectKind::Unwanted,
				})
				.await;
			return;
		}
	};

	let mut lifecycle = Lifecycle::Connecting;
	let mut keepalive_timeout: Option<Duration> = None;
	let mut last_frame = Instant::now();

	let mut check = tokio::time::interval(params.keepalive_check_interval);
	check.set_missed_tick_behavior(MissedTickBehavior::Skip);

	let kind = loop {
		tokio::select! {
			_ = close_rx.recv() => {
				debug!(instance, "eventsub session close requested");
				transport.force_close().await;
				break DisconnectKind::Ordinary;
			}

			event = transport.next_event() => {
				match event {
					None => break DisconnectKind::Ordinary,
					Some(TransportEvent::Ping) => {
						last_frame = Instant::now();
					}
					Some(TransportEvent::Closed(code)) => {
						if code == Some(CLOSE_CODE_KEEPALIVE_FAILURE) {
							warn!(instance, "eventsub closed with keepalive-failure code");
							break DisconnectKind::Unwanted;
						}
						info!(instance, ?code, "eventsub closed");
						break DisconnectKind::Ordinary;
					}
					Some(TransportEvent::Frame(text)) => {
						// Any traffic proves liveness, not just keepalives.
						last_frame = Instant::now();
						metrics::counter!("eventsub_frames_total").increment(1);
						handle_frame(&params, &text, &mut lifecycle, &mut keepalive_timeout).await;
					}
				}
			}

			_ = check.tick() => {
				if let Some(timeout) = keepalive_timeout
					&& last_frame.elapsed() >= timeout
				{
					warn!(instance, ?timeout, "keepalive expired; force-closing session");
					transport.force_close().await;
					break DisconnectKind::Unwanted;
				}
			}
		}
	};

	let _ = params.signals.send(SessionSignal::Closed { instance, kind }).await;
}

async fn handle_frame(
	params: &SessionParams,
	raw: &str,
	lifecycle: &mut Lifecycle,
	keepalive_timeout: &mut Option<Duration>,
) {
	let message_type = match peek_message_type(raw) {
		Ok(t) => t,
		Err(e) => {
			debug!(instance = params.instance, error = %e, "dropping unparseable eventsub frame");
			return;
		}
	};

	match message_type.as_str() {
		"session_welcome" => {
			let welcome = match parse_welcome(raw) {
				Ok(w) => w,
				Err(e) => {
					warn!(instance = params.instance, error = %e, "bad session_welcome");
					return;
				}
			};

			let session = welcome.payload.session;
			let secs = session.keepalive_timeout_seconds.unwrap_or(DEFAULT_KEEPALIVE_SECS);
			*keepalive_timeout = Some(Duration::from_secs(secs));

			info!(
				instance = params.instance,
				session_id = %session.id,
				keepalive_secs = secs,
				"eventsub welcomed; registering subscriptions"
			);
			params.registry.register_all(params.sink.as_ref(), &session.id).await;

			*lifecycle = Lifecycle::Active { welcomed: true };
			let _ = params
				.signals
				.send(SessionSignal::Welcomed {
					instance: params.instance,
					session_id: session.id,
				})
				.await;
		}

		"notification" => {
			let notification = match parse_notification(raw) {
				Ok(n) => n,
				Err(e) => {
					debug!(instance = params.instance, error = %e, "dropping malformed notification");
					return;
				}
			};

			// Notifications may be redelivered upstream or duplicated
			// during handover; the shared buffer makes delivery
			// idempotent over that window.
			if !params.dedup.insert(&notification.metadata.message_id) {
				debug!(
					instance = params.instance,
					message_id = %notification.metadata.message_id,
					"duplicate notification discarded"
				);
				return;
			}

			params.registry.dispatch(&notification, raw).await;
		}

		"session_reconnect" => {
			let reconnect = match parse_reconnect(raw) {
				Ok(r) => r,
				Err(e) => {
					warn!(instance = params.instance, error = %e, "bad session_reconnect");
					return;
				}
			};
			// No state change here; this session keeps running until it
			// is superseded.
			let _ = params
				.signals
				.send(SessionSignal::ReconnectRequested {
					instance: params.instance,
					url: reconnect.payload.session.reconnect_url,
				})
				.await;
		}

		"session_keepalive" | "revocation" => {}

		_ => {
			params.registry.handler().on_unhandled(raw.trim().to_string()).await;
		}
	}

	if *lifecycle == Lifecycle::Connecting {
		*lifecycle = Lifecycle::Active { welcomed: false };
		debug!(instance = params.instance, "eventsub session active, awaiting welcome");
	}
}
