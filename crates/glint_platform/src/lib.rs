#![forbid(unsafe_code)]

pub mod assets;
pub mod render;
pub mod twitch;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use glint_domain::{ChannelId, Login, MessageId, RichText, TwitchUser, UserId};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::assets::{BadgeMedia, Theme};

/// Generate an opaque per-connection trace id.
pub fn new_session_id() -> String {
	Uuid::new_v4().to_string()
}

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Client configuration for one broadcaster channel.
#[derive(Clone)]
pub struct TwitchConfig {
	pub client_id: String,
	pub client_secret: Option<SecretString>,
	pub access_token: SecretString,
	pub refresh_token: Option<SecretString>,

	pub channel_id: ChannelId,
	pub channel_login: Login,
	pub user_login: Login,

	pub eventsub_ws_url: String,
	pub chat_ws_url: String,
	pub helix_base_url: String,
	pub auth_base_url: String,

	pub theme: Theme,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
	pub keepalive_check_interval: Duration,
	pub dedup_capacity: usize,
}

impl TwitchConfig {
	pub fn new(
		client_id: impl Into<String>,
		access_token: SecretString,
		channel_id: ChannelId,
		channel_login: Login,
		user_login: Login,
	) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: None,
			access_token,
			refresh_token: None,
			channel_id,
			channel_login,
			user_login,
			eventsub_ws_url: "wss://eventsub.wss.twitch.tv/ws".to_string(),
			chat_ws_url: "wss://irc-ws.chat.twitch.tv:443".to_string(),
			helix_base_url: "https://api.twitch.tv".to_string(),
			auth_base_url: "https://id.twitch.tv".to_string(),
			theme: Theme::Dark,
			reconnect_min_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
			keepalive_check_interval: Duration::from_secs(1),
			dedup_capacity: twitch::eventsub::DEFAULT_DEDUP_CAPACITY,
		}
	}
}

/// Shared credential state. Sessions read the current token; the Helix
/// collaborator swaps it on refresh.
pub struct AuthState {
	client_id: String,
	client_secret: Option<SecretString>,
	access_token: Mutex<SecretString>,
	refresh_token: Mutex<Option<SecretString>>,
}

impl AuthState {
	pub fn from_config(cfg: &TwitchConfig) -> Arc<Self> {
		Arc::new(Self {
			client_id: cfg.client_id.clone(),
			client_secret: cfg.client_secret.clone(),
			access_token: Mutex::new(cfg.access_token.clone()),
			refresh_token: Mutex::new(cfg.refresh_token.clone()),
		})
	}

	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	pub(crate) fn client_secret(&self) -> Option<SecretString> {
		self.client_secret.clone()
	}

	pub fn access_token(&self) -> SecretString {
		self.access_token.lock().clone()
	}

	pub(crate) fn refresh_token(&self) -> Option<SecretString> {
		self.refresh_token.lock().clone()
	}

	pub(crate) fn store_tokens(&self, access: SecretString, refresh: Option<SecretString>) {
		*self.access_token.lock() = access;
		if refresh.is_some() {
			*self.refresh_token.lock() = refresh;
		}
	}
}

/// A rendered inbound chat message.
#[derive(Debug, Clone)]
pub struct ChatMessageEvent {
	pub user: TwitchUser,
	pub color: String,
	pub message_id: String,
	pub highlight: bool,
	pub reply_parent_id: Option<String>,
	pub badges: Vec<BadgeMedia>,
	/// Platform-side send time, when the wire format carries one.
	pub timestamp: Option<SystemTime>,
	pub text: RichText,
}

/// A platform notice rendered into chat (sub announcements, raids, ...).
#[derive(Debug, Clone)]
pub struct ChatNotificationEvent {
	pub user: TwitchUser,
	pub color: String,
	pub message_id: String,
	pub notice_type: String,
	pub system_message: String,
	pub text: RichText,
}

/// A custom channel-points reward definition.
#[derive(Debug, Clone)]
pub struct RewardEvent {
	pub id: String,
	pub title: String,
	pub cost: u64,
	pub enabled: bool,
}

/// A message held for moderator review.
#[derive(Debug, Clone)]
pub struct AutomodHoldEvent {
	pub user: TwitchUser,
	pub message_id: String,
	pub reason: String,
	pub text: RichText,
}

/// Application-facing capability surface. The engine calls into this for
/// every decoded event and never blocks beyond awaiting the call itself.
#[async_trait::async_trait]
pub trait TwitchHandler: Send + Sync {
	async fn on_chat_message(&self, message: ChatMessageEvent) {
		let _ = message;
	}
	async fn on_chat_notification(&self, notice: ChatNotificationEvent) {
		let _ = notice;
	}
	async fn on_chat_joined(&self) {}
	async fn on_user_join_chat(&self, user: TwitchUser) {
		let _ = user;
	}
	async fn on_chat_clear(&self) {}
	async fn on_chat_user_removed(&self, user_id: UserId) {
		let _ = user_id;
	}
	async fn on_chat_message_removed(&self, message_id: MessageId) {
		let _ = message_id;
	}

	async fn on_bits(&self, user: TwitchUser, bits: u64, text: RichText) {
		let _ = (user, bits, text);
	}
	async fn on_follow(&self, user: TwitchUser) {
		let _ = user;
	}
	async fn on_sub(&self, user: TwitchUser, tier: u8, is_gift: bool) {
		let _ = (user, tier, is_gift);
	}
	async fn on_gift_sub(&self, user: Option<TwitchUser>, tier: u8, count: u64) {
		let _ = (user, tier, count);
	}
	async fn on_shared_sub(&self, user: TwitchUser, tier: u8, total_months: i64, streak_months: i64, text: RichText) {
		let _ = (user, tier, total_months, streak_months, text);
	}

	async fn on_reward_redeemed(&self, user: TwitchUser, reward: String, input: String) {
		let _ = (user, reward, input);
	}
	async fn on_reward_created(&self, reward: RewardEvent) {
		let _ = reward;
	}
	async fn on_reward_updated(&self, reward: RewardEvent) {
		let _ = reward;
	}
	async fn on_reward_deleted(&self, reward: RewardEvent) {
		let _ = reward;
	}

	async fn on_raided(&self, from: TwitchUser, viewers: u64) {
		let _ = (from, viewers);
	}
	async fn on_raiding(&self, to: TwitchUser, viewers: u64) {
		let _ = (to, viewers);
	}

	async fn on_stream_start(&self) {}
	async fn on_stream_stop(&self) {}

	async fn on_shoutout(&self, moderator: TwitchUser, to: TwitchUser) {
		let _ = (moderator, to);
	}
	async fn on_being_shoutout(&self, from: TwitchUser) {
		let _ = from;
	}

	async fn on_automod_hold(&self, hold: AutomodHoldEvent) {
		let _ = hold;
	}
	async fn on_automod_update(&self, message_id: MessageId, status: String) {
		let _ = (message_id, status);
	}

	async fn on_shared_chat_begin(&self, session_id: String) {
		let _ = session_id;
	}
	async fn on_shared_chat_end(&self, session_id: String) {
		let _ = session_id;
	}

	/// A well-formed frame nothing else claimed.
	async fn on_unhandled(&self, raw: String) {
		let _ = raw;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn secret_string_redacts_in_debug_and_display() {
		let secret = SecretString::new("supersecret");
		assert!(!format!("{secret:?}").contains("supersecret"));
		assert!(!format!("{secret}").contains("supersecret"));
		assert_eq!(secret.expose(), "supersecret");
	}

	#[test]
	fn auth_state_swaps_tokens() {
		let cfg = TwitchConfig::new(
			"cid",
			SecretString::new("tok-1"),
			ChannelId::new("1").unwrap(),
			Login::new("chan").unwrap(),
			Login::new("me").unwrap(),
		);
		let auth = AuthState::from_config(&cfg);
		assert_eq!(auth.access_token().expose(), "tok-1");

		auth.store_tokens(SecretString::new("tok-2"), None);
		assert_eq!(auth.access_token().expose(), "tok-2");
	}
}
