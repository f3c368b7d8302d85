#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use super::session::{SessionHandle, SessionParams, spawn_session};
use super::transport::TransportConnector;
use super::{DedupBuffer, SessionSignal};
use crate::twitch::backoff_delay;
use crate::twitch::subscriptions::{SubscriptionRegistry, SubscriptionSink};

/// Everything a supervisor needs to run sessions against one endpoint.
pub struct EventSubParams {
	pub url: Url,
	pub connector: Arc<dyn TransportConnector>,
	pub registry: Arc<SubscriptionRegistry>,
	pub sink: Arc<dyn SubscriptionSink>,
	pub dedup: Arc<DedupBuffer>,
	pub keepalive_check_interval: Duration,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
}

/// Owns the primary session and guarantees exactly one logically current
/// session across graceful reconnects and abrupt failures.
///
/// On `session_reconnect` a shadow session runs its own welcome and
/// registration in parallel; once the shadow is welcomed the primary is
/// closed and the shadow promoted. The shared [`DedupBuffer`] absorbs
/// notification duplicates over the overlap window.
pub struct EventSubSupervisor;

impl EventSubSupervisor {
	pub fn spawn(params: EventSubParams) -> SupervisorHandle {
		let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
		let task = tokio::spawn(run_supervisor(params, shutdown_rx));
		SupervisorHandle { shutdown_tx, task }
	}
}

/// Handle for stopping a running supervisor.
pub struct SupervisorHandle {
	shutdown_tx: mpsc::Sender<()>,
	task: tokio::task::JoinHandle<()>,
}

impl SupervisorHandle {
	pub async fn shutdown(self) {
		let _ = self.shutdown_tx.send(()).await;
		let _ = self.task.await;
	}
}

fn next_session(
	params: &EventSubParams,
	signals: &mpsc::Sender<SessionSignal>,
	next_instance: &mut u64,
	url: Url,
) -> SessionHandle {
	*next_instance += 1;
	spawn_session(
		params.connector.clone(),
		SessionParams {
			instance: *next_instance,
			url,
			registry: params.registry.clone(),
			sink: params.sink.clone(),
			dedup: params.dedup.clone(),
			signals: signals.clone(),
			keepalive_check_interval: params.keepalive_check_interval,
		},
	)
}

async fn run_supervisor(params: EventSubParams, mut shutdown_rx: mpsc::Receiver<()>) {
	let (signal_tx, mut signal_rx) = mpsc::channel::<SessionSignal>(64);
	let mut next_instance: u64 = 0;
	let mut reconnect_attempt: u32 = 0;

	let mut primary = next_session(&params, &signal_tx, &mut next_instance, params.url.clone());
	let mut shadow: Option<SessionHandle> = None;

	loop {
		tokio::select! {
			_ = shutdown_rx.recv() => {
				info!("eventsub supervisor shutting down");
				if let Some(shadow) = shadow.take() {
					shadow.shutdown().await;
				}
				primary.shutdown().await;
				break;
			}

			signal = signal_rx.recv() => {
				let Some(signal) = signal else { break };
				match signal {
					SessionSignal::Welcomed { instance, session_id } => {
						if shadow.as_ref().map(|s| s.instance) == Some(instance) {
							let Some(promoted) = shadow.take() else { continue };
							info!(%session_id, "shadow session welcomed; promoting");
							let superseded = std::mem::replace(&mut primary, promoted);
							superseded.shutdown().await;
							reconnect_attempt = 0;
						} else if instance == primary.instance {
							info!(%session_id, "primary session welcomed");
							reconnect_attempt = 0;
						}
					}

					SessionSignal::ReconnectRequested { instance, url } => {
						if instance != primary.instance {
							continue;
						}
						if shadow.is_some() {
							debug!("reconnect requested while already migrating; ignoring");
							continue;
						}

						let target = match Url::parse(&url) {
							Ok(u) => u,
							Err(e) => {
								warn!(%url, error = %e, "invalid reconnect url; using configured endpoint");
								params.url.clone()
							}
						};
						info!(%target, "reconnect requested; opening shadow session");
						shadow = Some(next_session(&params, &signal_tx, &mut next_instance, target));
					}

					SessionSignal::Closed { instance, kind } => {
						if shadow.as_ref().map(|s| s.instance) == Some(instance) {
							warn!(?kind, "shadow session closed before welcome; continuing on primary");
							if let Some(failed) = shadow.take() {
								failed.shutdown().await;
							}
							continue;
						}
						if instance != primary.instance {
							// A superseded session finished closing.
							continue;
						}

						// Context is assumed lost: the replacement runs
						// the full welcome + registration sequence.
						reconnect_attempt = reconnect_attempt.saturating_add(1);
						let delay = backoff_delay(reconnect_attempt, params.reconnect_min_delay, params.reconnect_max_delay);
						warn!(?kind, ?delay, "primary session closed; replacing");
						sleep(delay).await;
						primary = next_session(&params, &signal_tx, &mut next_instance, params.url.clone());
					}
				}
			}
		}
	}
}
