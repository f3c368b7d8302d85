#![forbid(unsafe_code)]

mod config;

use std::sync::Arc;

use anyhow::Context;
use glint_domain::{MessageId, RichText, TwitchUser, UserId};
use glint_platform::twitch::chat::{ChatParams, ChatSession};
use glint_platform::twitch::eventsub::{
	DedupBuffer, EventSubParams, EventSubSupervisor, TransportConnector, WebSocketConnector,
};
use glint_platform::twitch::helix::{HelixClient, catalog_for};
use glint_platform::twitch::subscriptions::SubscriptionRegistry;
use glint_platform::{AuthState, ChatMessageEvent, ChatNotificationEvent, TwitchHandler};
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Logs every callback; the reference handler for running headless.
struct TracingHandler;

#[async_trait::async_trait]
impl TwitchHandler for TracingHandler {
	async fn on_chat_message(&self, message: ChatMessageEvent) {
		info!(
			user = %message.user.display_name,
			color = %message.color,
			highlight = message.highlight,
			badges = message.badges.len(),
			"chat: {}",
			message.text.plain_text()
		);
	}

	async fn on_chat_notification(&self, notice: ChatNotificationEvent) {
		info!(user = %notice.user.display_name, kind = %notice.notice_type, "notice: {}", notice.system_message);
	}

	async fn on_chat_joined(&self) {
		info!("joined chat");
	}

	async fn on_user_join_chat(&self, user: TwitchUser) {
		info!(user = %user.login, "user joined chat");
	}

	async fn on_chat_clear(&self) {
		info!("chat cleared");
	}

	async fn on_chat_user_removed(&self, user_id: UserId) {
		info!(%user_id, "user messages removed");
	}

	async fn on_chat_message_removed(&self, message_id: MessageId) {
		info!(%message_id, "message removed");
	}

	async fn on_bits(&self, user: TwitchUser, bits: u64, _text: RichText) {
		info!(user = %user.display_name, bits, "bits cheered");
	}

	async fn on_follow(&self, user: TwitchUser) {
		info!(user = %user.display_name, "new follower");
	}

	async fn on_sub(&self, user: TwitchUser, tier: u8, is_gift: bool) {
		info!(user = %user.display_name, tier, is_gift, "new subscription");
	}

	async fn on_gift_sub(&self, user: Option<TwitchUser>, tier: u8, count: u64) {
		let gifter = user.map(|u| u.display_name).unwrap_or_else(|| "anonymous".to_string());
		info!(%gifter, tier, count, "gifted subscriptions");
	}

	async fn on_shared_sub(&self, user: TwitchUser, tier: u8, total_months: i64, streak_months: i64, _text: RichText) {
		info!(user = %user.display_name, tier, total_months, streak_months, "sub announcement");
	}

	async fn on_reward_redeemed(&self, user: TwitchUser, reward: String, input: String) {
		info!(user = %user.display_name, %reward, %input, "reward redeemed");
	}

	async fn on_raided(&self, from: TwitchUser, viewers: u64) {
		info!(from = %from.display_name, viewers, "incoming raid");
	}

	async fn on_raiding(&self, to: TwitchUser, viewers: u64) {
		info!(to = %to.display_name, viewers, "raiding out");
	}

	async fn on_stream_start(&self) {
		info!("stream started");
	}

	async fn on_stream_stop(&self) {
		info!("stream stopped");
	}

	async fn on_shoutout(&self, moderator: TwitchUser, to: TwitchUser) {
		info!(moderator = %moderator.display_name, to = %to.display_name, "shoutout given");
	}

	async fn on_being_shoutout(&self, from: TwitchUser) {
		info!(from = %from.display_name, "received a shoutout");
	}

	async fn on_unhandled(&self, raw: String) {
		info!(raw, "unhandled notification");
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let settings = config::load_from_disk()
		.with_context(|| format!("no usable settings; create {}", config::config_path().display()))?;
	let cfg = settings.into_twitch_config()?;

	let auth = AuthState::from_config(&cfg);
	let helix = Arc::new(HelixClient::new(&cfg, auth.clone())?);
	let catalog = Arc::new(catalog_for(&helix, cfg.channel_id.clone()));
	let handler: Arc<dyn TwitchHandler> = Arc::new(TracingHandler);
	let connector: Arc<dyn TransportConnector> = Arc::new(WebSocketConnector);

	let registry = Arc::new(SubscriptionRegistry::new(
		cfg.channel_id.clone(),
		handler.clone(),
		catalog.clone(),
		cfg.theme,
	));

	let supervisor = EventSubSupervisor::spawn(EventSubParams {
		url: Url::parse(&cfg.eventsub_ws_url).context("parse eventsub_ws_url")?,
		connector: connector.clone(),
		registry,
		sink: helix.clone(),
		dedup: Arc::new(DedupBuffer::new(cfg.dedup_capacity)),
		keepalive_check_interval: cfg.keepalive_check_interval,
		reconnect_min_delay: cfg.reconnect_min_delay,
		reconnect_max_delay: cfg.reconnect_max_delay,
	});

	let chat = ChatSession::spawn(ChatParams {
		url: Url::parse(&cfg.chat_ws_url).context("parse chat_ws_url")?,
		connector,
		helix: helix.clone(),
		auth,
		catalog,
		handler,
		channel_login: cfg.channel_login.clone(),
		channel_id: cfg.channel_id.clone(),
		user_login: cfg.user_login.clone(),
		theme: cfg.theme,
		reconnect_min_delay: cfg.reconnect_min_delay,
		reconnect_max_delay: cfg.reconnect_max_delay,
	});

	info!(channel = %cfg.channel_login, "glint running; ctrl-c to stop");
	tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;

	chat.shutdown().await;
	supervisor.shutdown().await;
	Ok(())
}
