#![forbid(unsafe_code)]

#[cfg(test)]
mod tests;

use std::sync::Arc;

use glint_domain::{ChannelId, Fragment, Login, MessageId, TwitchUser, UserId, UserKind};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::assets::{AssetCatalog, BadgeMedia, Theme};
use crate::render;
use crate::twitch::eventsub::{EventSubNotification, parse_message_timestamp};
use crate::{AutomodHoldEvent, ChatMessageEvent, ChatNotificationEvent, RewardEvent, TwitchHandler};

/// Where subscription registrations go; implemented by the Helix
/// collaborator and fakeable in tests.
#[async_trait::async_trait]
pub trait SubscriptionSink: Send + Sync {
	async fn register(&self, kind: SubscriptionKind, session_id: &str, condition: Value) -> anyhow::Result<()>;
}

/// The closed set of notification types this client registers for. Each
/// kind knows its wire name, version and condition shape; decode logic
/// dispatches through [`SubscriptionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
	ChannelFollow,
	ChannelSubscribe,
	ChannelSubscriptionGift,
	ChannelRaid,
	ChannelPointsRewardAdd,
	ChannelPointsRewardUpdate,
	ChannelPointsRewardRemove,
	ChannelPointsRedemptionAdd,
	StreamOnline,
	StreamOffline,
	ShoutoutCreate,
	ShoutoutReceive,
	ChatMessage,
	ChatNotification,
	ChatClear,
	ChatClearUserMessages,
	ChatMessageDelete,
	AutomodMessageHold,
	AutomodMessageUpdate,
	SharedChatBegin,
	SharedChatEnd,
}

impl SubscriptionKind {
	pub const ALL: [SubscriptionKind; 21] = [
		SubscriptionKind::ChannelFollow,
		SubscriptionKind::ChannelSubscribe,
		SubscriptionKind::ChannelSubscriptionGift,
		SubscriptionKind::ChannelRaid,
		SubscriptionKind::ChannelPointsRewardAdd,
		SubscriptionKind::ChannelPointsRewardUpdate,
		SubscriptionKind::ChannelPointsRewardRemove,
		SubscriptionKind::ChannelPointsRedemptionAdd,
		SubscriptionKind::StreamOnline,
		SubscriptionKind::StreamOffline,
		SubscriptionKind::ShoutoutCreate,
		SubscriptionKind::ShoutoutReceive,
		SubscriptionKind::ChatMessage,
		SubscriptionKind::ChatNotification,
		SubscriptionKind::ChatClear,
		SubscriptionKind::ChatClearUserMessages,
		SubscriptionKind::ChatMessageDelete,
		SubscriptionKind::AutomodMessageHold,
		SubscriptionKind::AutomodMessageUpdate,
		SubscriptionKind::SharedChatBegin,
		SubscriptionKind::SharedChatEnd,
	];

	pub fn wire_name(self) -> &'static str {
		match self {
			Self::ChannelFollow => "channel.follow",
			Self::ChannelSubscribe => "channel.subscribe",
			Self::ChannelSubscriptionGift => "channel.subscription.gift",
			Self::ChannelRaid => "channel.raid",
			Self::ChannelPointsRewardAdd => "channel.channel_points_custom_reward.add",
			Self::ChannelPointsRewardUpdate => "channel.channel_points_custom_reward.update",
			Self::ChannelPointsRewardRemove => "channel.channel_points_custom_reward.remove",
			Self::ChannelPointsRedemptionAdd => "channel.channel_points_custom_reward_redemption.add",
			Self::StreamOnline => "stream.online",
			Self::StreamOffline => "stream.offline",
			Self::ShoutoutCreate => "channel.shoutout.create",
			Self::ShoutoutReceive => "channel.shoutout.receive",
			Self::ChatMessage => "channel.chat.message",
			Self::ChatNotification => "channel.chat.notification",
			Self::ChatClear => "channel.chat.clear",
			Self::ChatClearUserMessages => "channel.chat.clear_user_messages",
			Self::ChatMessageDelete => "channel.chat.message_delete",
			Self::AutomodMessageHold => "automod.message.hold",
			Self::AutomodMessageUpdate => "automod.message.update",
			Self::SharedChatBegin => "channel.shared_chat.begin",
			Self::SharedChatEnd => "channel.shared_chat.end",
		}
	}

	pub fn version(self) -> &'static str {
		match self {
			Self::ChannelFollow => "2",
			_ => "1",
		}
	}

	pub fn from_wire_name(name: &str) -> Option<SubscriptionKind> {
		Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
	}

	/// Condition maps to register for this kind. Most kinds need one;
	/// raid registers both directions.
	pub fn conditions(self, channel_id: &ChannelId) -> Vec<Value> {
		let id = channel_id.as_str();
		match self {
			Self::ChannelRaid => vec![
				json!({ "to_broadcaster_user_id": id }),
				json!({ "from_broadcaster_user_id": id }),
			],
			Self::ChannelFollow => vec![json!({ "broadcaster_user_id": id, "moderator_user_id": id })],
			Self::ShoutoutCreate | Self::ShoutoutReceive | Self::AutomodMessageHold | Self::AutomodMessageUpdate => {
				vec![json!({ "broadcaster_user_id": id, "moderator_user_id": id })]
			}
			Self::ChatMessage | Self::ChatNotification | Self::ChatMessageDelete => {
				vec![json!({ "broadcaster_user_id": id, "user_id": id })]
			}
			_ => vec![json!({ "broadcaster_user_id": id })],
		}
	}
}

/// Maps wire tier codes to tiers 1..=3; anything else drops the event.
fn tier_from_wire(tier: &str) -> Option<u8> {
	match tier {
		"1000" => Some(1),
		"2000" => Some(2),
		"3000" => Some(3),
		_ => None,
	}
}

fn str_field<'a>(event: &'a Value, key: &str) -> Option<&'a str> {
	event.get(key).and_then(Value::as_str)
}

fn u64_field(event: &Value, key: &str) -> Option<u64> {
	event.get(key).and_then(Value::as_u64)
}

fn bool_field(event: &Value, key: &str) -> Option<bool> {
	event.get(key).and_then(Value::as_bool)
}

/// Pull a `{prefix}user_id/login/name` triple out of an event object.
fn event_user(event: &Value, prefix: &str) -> Option<TwitchUser> {
	let id = str_field(event, &format!("{prefix}user_id"))?;
	let login = str_field(event, &format!("{prefix}user_login"))?;
	let name = str_field(event, &format!("{prefix}user_name"))?;
	Some(TwitchUser::new(
		UserId::new(id).ok()?,
		Login::new(login).ok()?,
		name,
		UserKind::Viewer,
	))
}

/// Decode a `message.fragments` array into typed fragments.
fn fragments_from_event(message: Option<&Value>) -> Vec<Fragment> {
	let Some(items) = message.and_then(|m| m.get("fragments")).and_then(Value::as_array) else {
		return Vec::new();
	};

	let mut fragments = Vec::new();
	for item in items {
		let kind = str_field(item, "type").unwrap_or_default();
		let text = str_field(item, "text").unwrap_or_default().to_string();
		match kind {
			"emote" => {
				let Some(emote) = item.get("emote") else { continue };
				let Some(id) = str_field(emote, "id") else { continue };
				fragments.push(Fragment::Emote {
					id: id.to_string(),
					emote_set_id: str_field(emote, "emote_set_id").map(str::to_string),
					text,
				});
			}
			"cheermote" => {
				let Some(cheermote) = item.get("cheermote") else { continue };
				let Some(prefix) = str_field(cheermote, "prefix") else { continue };
				let bits = u64_field(cheermote, "bits").unwrap_or_default();
				fragments.push(Fragment::Cheermote {
					prefix: prefix.to_string(),
					bits,
					text,
				});
			}
			"mention" => {
				let Some(user_name) = item.get("mention").and_then(|m| str_field(m, "user_name")) else {
					continue;
				};
				fragments.push(Fragment::Mention {
					user_name: user_name.to_string(),
					text,
				});
			}
			_ => fragments.push(Fragment::Text { text }),
		}
	}
	fragments
}

/// Ordered collection of per-type handlers: builds registration
/// payloads and routes decoded notifications to the application.
pub struct SubscriptionRegistry {
	kinds: Vec<SubscriptionKind>,
	channel_id: ChannelId,
	handler: Arc<dyn TwitchHandler>,
	catalog: Arc<AssetCatalog>,
	theme: Theme,
}

impl SubscriptionRegistry {
	pub fn new(channel_id: ChannelId, handler: Arc<dyn TwitchHandler>, catalog: Arc<AssetCatalog>, theme: Theme) -> Self {
		Self::with_kinds(SubscriptionKind::ALL.to_vec(), channel_id, handler, catalog, theme)
	}

	pub fn with_kinds(
		kinds: Vec<SubscriptionKind>,
		channel_id: ChannelId,
		handler: Arc<dyn TwitchHandler>,
		catalog: Arc<AssetCatalog>,
		theme: Theme,
	) -> Self {
		Self {
			kinds,
			channel_id,
			handler,
			catalog,
			theme,
		}
	}

	pub fn kinds(&self) -> &[SubscriptionKind] {
		&self.kinds
	}

	pub fn channel_id(&self) -> &ChannelId {
		&self.channel_id
	}

	pub(crate) fn handler(&self) -> &Arc<dyn TwitchHandler> {
		&self.handler
	}

	/// Register every kind against a welcomed session. Each condition
	/// variant is an independent call; failures are logged and skipped so
	/// remaining handlers still register.
	pub async fn register_all(&self, sink: &dyn SubscriptionSink, session_id: &str) {
		for kind in &self.kinds {
			for condition in kind.conditions(&self.channel_id) {
				if let Err(e) = sink.register(*kind, session_id, condition).await {
					metrics::counter!("eventsub_registration_failures_total").increment(1);
					warn!(kind = kind.wire_name(), error = %e, "subscription registration failed");
				}
			}
		}
	}

	/// Decode and dispatch one notification. Unregistered types surface
	/// through `on_unhandled` instead of being dropped silently.
	pub(crate) async fn dispatch(&self, notification: &EventSubNotification, raw: &str) {
		let type_name = notification
			.metadata
			.subscription_type
			.as_deref()
			.unwrap_or(notification.payload.subscription.r#type.as_str());

		let Some(kind) = SubscriptionKind::from_wire_name(type_name) else {
			self.handler.on_unhandled(raw.to_string()).await;
			return;
		};
		if !self.kinds.contains(&kind) {
			self.handler.on_unhandled(raw.to_string()).await;
			return;
		}

		let event = &notification.payload.event;
		let timestamp = parse_message_timestamp(&notification.metadata.message_timestamp).ok();
		match kind {
			SubscriptionKind::ChannelFollow => {
				if let Some(user) = event_user(event, "") {
					self.handler.on_follow(user).await;
				}
			}
			SubscriptionKind::ChannelSubscribe => {
				let Some(user) = event_user(event, "") else { return };
				let Some(tier) = str_field(event, "tier").and_then(tier_from_wire) else {
					debug!(event = %event, "ignoring subscribe with unrecognized tier");
					return;
				};
				let is_gift = bool_field(event, "is_gift").unwrap_or(false);
				self.handler.on_sub(user, tier, is_gift).await;
			}
			SubscriptionKind::ChannelSubscriptionGift => {
				let is_anonymous = bool_field(event, "is_anonymous").unwrap_or(false);
				let user = event_user(event, "");
				if !is_anonymous && user.is_none() {
					return;
				}
				let Some(tier) = str_field(event, "tier").and_then(tier_from_wire) else {
					debug!(event = %event, "ignoring gift sub with unrecognized tier");
					return;
				};
				let Some(total) = u64_field(event, "total") else { return };
				self.handler.on_gift_sub(user, tier, total).await;
			}
			SubscriptionKind::ChannelRaid => {
				let Some(from) = event_user(event, "from_broadcaster_") else { return };
				let Some(to) = event_user(event, "to_broadcaster_") else { return };
				let Some(viewers) = u64_field(event, "viewers") else { return };
				if from.id.as_str() == self.channel_id.as_str() {
					self.handler.on_raiding(to, viewers).await;
				} else {
					self.handler.on_raided(from, viewers).await;
				}
			}
			SubscriptionKind::ChannelPointsRedemptionAdd => {
				let Some(user) = event_user(event, "") else { return };
				let Some(title) = event.get("reward").and_then(|r| str_field(r, "title")) else {
					return;
				};
				let input = str_field(event, "user_input").unwrap_or_default();
				self.handler
					.on_reward_redeemed(user, title.to_string(), input.to_string())
					.await;
			}
			SubscriptionKind::ChannelPointsRewardAdd
			| SubscriptionKind::ChannelPointsRewardUpdate
			| SubscriptionKind::ChannelPointsRewardRemove => {
				let Some(reward) = decode_reward(event) else { return };
				match kind {
					SubscriptionKind::ChannelPointsRewardAdd => self.handler.on_reward_created(reward).await,
					SubscriptionKind::ChannelPointsRewardUpdate => self.handler.on_reward_updated(reward).await,
					_ => self.handler.on_reward_deleted(reward).await,
				}
			}
			SubscriptionKind::StreamOnline => self.handler.on_stream_start().await,
			SubscriptionKind::StreamOffline => self.handler.on_stream_stop().await,
			SubscriptionKind::ShoutoutCreate => {
				let Some(moderator) = event_user(event, "moderator_") else { return };
				let Some(to) = event_user(event, "to_broadcaster_") else { return };
				self.handler.on_shoutout(moderator, to).await;
			}
			SubscriptionKind::ShoutoutReceive => {
				if let Some(from) = event_user(event, "from_broadcaster_") {
					self.handler.on_being_shoutout(from).await;
				}
			}
			SubscriptionKind::ChatMessage => self.dispatch_chat_message(event, timestamp).await,
			SubscriptionKind::ChatNotification => self.dispatch_chat_notification(event).await,
			SubscriptionKind::ChatClear => self.handler.on_chat_clear().await,
			SubscriptionKind::ChatClearUserMessages => {
				if let Some(user_id) = str_field(event, "target_user_id").and_then(|id| UserId::new(id).ok()) {
					self.handler.on_chat_user_removed(user_id).await;
				}
			}
			SubscriptionKind::ChatMessageDelete => {
				if let Some(message_id) = str_field(event, "message_id").and_then(|id| MessageId::new(id).ok()) {
					self.handler.on_chat_message_removed(message_id).await;
				}
			}
			SubscriptionKind::AutomodMessageHold => self.dispatch_automod_hold(event).await,
			SubscriptionKind::AutomodMessageUpdate => {
				let Some(message_id) = str_field(event, "message_id").and_then(|id| MessageId::new(id).ok()) else {
					return;
				};
				let status = str_field(event, "status").unwrap_or_default();
				self.handler.on_automod_update(message_id, status.to_string()).await;
			}
			SubscriptionKind::SharedChatBegin => {
				if let Some(session_id) = str_field(event, "session_id") {
					self.handler.on_shared_chat_begin(session_id.to_string()).await;
				}
			}
			SubscriptionKind::SharedChatEnd => {
				if let Some(session_id) = str_field(event, "session_id") {
					self.handler.on_shared_chat_end(session_id.to_string()).await;
				}
			}
		}
	}

	async fn resolve_badges(&self, event: &Value) -> Vec<BadgeMedia> {
		let Some(items) = event.get("badges").and_then(Value::as_array) else {
			return Vec::new();
		};

		let mut badges = Vec::new();
		for item in items {
			let (Some(set_id), Some(version)) = (str_field(item, "set_id"), str_field(item, "id")) else {
				continue;
			};
			if let Some(asset) = self.catalog.badge(set_id, version).await {
				badges.push(asset);
			}
		}
		badges
	}

	async fn dispatch_chat_message(&self, event: &Value, timestamp: Option<std::time::SystemTime>) {
		let Some(user) = event_user(event, "chatter_") else { return };
		let Some(message_id) = str_field(event, "message_id") else { return };

		let fragments = fragments_from_event(event.get("message"));
		let text = render::render(&fragments, self.theme, &self.catalog).await;
		let color = render::user_color(&user.display_name, str_field(event, "color"));
		let highlight = str_field(event, "message_type") == Some("channel_points_highlighted");
		let reply_parent_id = event
			.get("reply")
			.and_then(|r| str_field(r, "parent_message_id"))
			.map(str::to_string);
		let badges = self.resolve_badges(event).await;

		let bits = event.get("cheer").and_then(|c| u64_field(c, "bits")).unwrap_or(0);

		self.handler
			.on_chat_message(ChatMessageEvent {
				user: user.clone(),
				color,
				message_id: message_id.to_string(),
				highlight,
				reply_parent_id,
				badges,
				timestamp,
				text: text.clone(),
			})
			.await;

		if bits > 0 {
			self.handler.on_bits(user, bits, text).await;
		}
	}

	async fn dispatch_chat_notification(&self, event: &Value) {
		let Some(user) = event_user(event, "chatter_") else { return };
		let message_id = str_field(event, "message_id").unwrap_or_default();
		let notice_type = str_field(event, "notice_type").unwrap_or_default();
		let system_message = str_field(event, "system_message").unwrap_or_default();

		let fragments = fragments_from_event(event.get("message"));
		let text = render::render(&fragments, self.theme, &self.catalog).await;
		let color = render::user_color(&user.display_name, str_field(event, "color"));

		self.handler
			.on_chat_notification(ChatNotificationEvent {
				user,
				color,
				message_id: message_id.to_string(),
				notice_type: notice_type.to_string(),
				system_message: system_message.to_string(),
				text,
			})
			.await;
	}

	async fn dispatch_automod_hold(&self, event: &Value) {
		let Some(user) = event_user(event, "") else { return };
		let Some(message_id) = str_field(event, "message_id") else { return };

		let fragments = fragments_from_event(event.get("message"));
		let text = render::render(&fragments, self.theme, &self.catalog).await;
		let reason = event
			.get("automod")
			.and_then(|a| str_field(a, "category"))
			.or_else(|| str_field(event, "category"))
			.unwrap_or_default();

		self.handler
			.on_automod_hold(AutomodHoldEvent {
				user,
				message_id: message_id.to_string(),
				reason: reason.to_string(),
				text,
			})
			.await;
	}
}

fn decode_reward(event: &Value) -> Option<RewardEvent> {
	Some(RewardEvent {
		id: str_field(event, "id")?.to_string(),
		title: str_field(event, "title")?.to_string(),
		cost: u64_field(event, "cost").unwrap_or(0),
		enabled: bool_field(event, "is_enabled").unwrap_or(true),
	})
}
