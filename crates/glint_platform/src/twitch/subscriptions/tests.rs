#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use glint_domain::{ChannelId, MessageId, RichText, TwitchUser, UserId};
use parking_lot::Mutex;

use super::{SubscriptionKind, SubscriptionRegistry};
use crate::assets::{AssetCatalog, CatalogFetcher, Cheermote, CheermoteTier, ImageFormat, MediaAsset, Scale, Theme};
use crate::twitch::eventsub::parse_notification;
use crate::{ChatMessageEvent, TwitchHandler};

struct FixtureFetcher;

#[async_trait::async_trait]
impl CatalogFetcher for FixtureFetcher {
	async fn fetch_emote_set(&self, _set_id: &str) -> anyhow::Result<Vec<(String, MediaAsset)>> {
		let mut kappa = MediaAsset::new("Kappa");
		kappa.set_url(Theme::Dark, ImageFormat::Static, Scale::Three, "https://cdn/kappa/3");
		Ok(vec![("25".to_string(), kappa)])
	}

	async fn fetch_badges(&self, _channel_id: &ChannelId) -> anyhow::Result<Vec<((String, String), MediaAsset)>> {
		Ok(vec![(
			("moderator".to_string(), "1".to_string()),
			MediaAsset::new("Moderator"),
		)])
	}

	async fn fetch_cheermotes(&self, _channel_id: &ChannelId) -> anyhow::Result<Vec<Cheermote>> {
		let mut cheer = Cheermote::new("Cheer");
		let mut image = MediaAsset::new("Cheer100");
		image.set_url(Theme::Dark, ImageFormat::Animated, Scale::Two, "https://cdn/cheer/100/2");
		cheer.add_tier(CheermoteTier {
			threshold: 100,
			can_cheer: true,
			image,
		});
		Ok(vec![cheer])
	}
}

#[derive(Default)]
struct RecordingHandler {
	chat_messages: Mutex<Vec<ChatMessageEvent>>,
	bits: AtomicU64,
	subs: Mutex<Vec<(TwitchUser, u8, bool)>>,
	raided_from: Mutex<Option<TwitchUser>>,
	raiding_to: Mutex<Option<TwitchUser>>,
	viewers: AtomicU64,
	removed_users: Mutex<Vec<UserId>>,
	removed_messages: Mutex<Vec<MessageId>>,
	rewards_redeemed: Mutex<Vec<(String, String)>>,
	unhandled: AtomicUsize,
}

#[async_trait::async_trait]
impl TwitchHandler for RecordingHandler {
	async fn on_chat_message(&self, message: ChatMessageEvent) {
		self.chat_messages.lock().push(message);
	}
	async fn on_bits(&self, _user: TwitchUser, bits: u64, _text: RichText) {
		self.bits.fetch_add(bits, Ordering::SeqCst);
	}
	async fn on_sub(&self, user: TwitchUser, tier: u8, is_gift: bool) {
		self.subs.lock().push((user, tier, is_gift));
	}
	async fn on_raided(&self, from: TwitchUser, viewers: u64) {
		*self.raided_from.lock() = Some(from);
		self.viewers.store(viewers, Ordering::SeqCst);
	}
	async fn on_raiding(&self, to: TwitchUser, viewers: u64) {
		*self.raiding_to.lock() = Some(to);
		self.viewers.store(viewers, Ordering::SeqCst);
	}
	async fn on_chat_user_removed(&self, user_id: UserId) {
		self.removed_users.lock().push(user_id);
	}
	async fn on_chat_message_removed(&self, message_id: MessageId) {
		self.removed_messages.lock().push(message_id);
	}
	async fn on_reward_redeemed(&self, _user: TwitchUser, reward: String, input: String) {
		self.rewards_redeemed.lock().push((reward, input));
	}
	async fn on_unhandled(&self, _raw: String) {
		self.unhandled.fetch_add(1, Ordering::SeqCst);
	}
}

fn registry() -> (SubscriptionRegistry, Arc<RecordingHandler>) {
	let handler = Arc::new(RecordingHandler::default());
	let catalog = Arc::new(AssetCatalog::new(Arc::new(FixtureFetcher), ChannelId::new("123").unwrap()));
	let registry = SubscriptionRegistry::new(ChannelId::new("123").unwrap(), handler.clone(), catalog, Theme::Dark);
	(registry, handler)
}

fn notification(subscription_type: &str, event: serde_json::Value) -> String {
	serde_json::json!({
		"metadata": {
			"message_id": "m1",
			"message_type": "notification",
			"message_timestamp": "2024-01-01T00:00:00Z",
			"subscription_type": subscription_type,
			"subscription_version": "1",
		},
		"payload": {
			"subscription": {
				"id": "sub-1",
				"status": "enabled",
				"type": subscription_type,
				"version": "1",
				"condition": {},
			},
			"event": event,
		},
	})
	.to_string()
}

async fn dispatch(registry: &SubscriptionRegistry, subscription_type: &str, event: serde_json::Value) {
	let raw = notification(subscription_type, event);
	let parsed = parse_notification(&raw).expect("well-formed notification");
	registry.dispatch(&parsed, &raw).await;
}

#[test]
fn raid_registers_both_directions() {
	let channel = ChannelId::new("123").unwrap();
	let conditions = SubscriptionKind::ChannelRaid.conditions(&channel);
	assert_eq!(conditions.len(), 2);
	assert_eq!(conditions[0]["to_broadcaster_user_id"], "123");
	assert_eq!(conditions[1]["from_broadcaster_user_id"], "123");
}

#[test]
fn follow_condition_carries_moderator_id() {
	let channel = ChannelId::new("123").unwrap();
	let conditions = SubscriptionKind::ChannelFollow.conditions(&channel);
	assert_eq!(conditions.len(), 1);
	assert_eq!(conditions[0]["broadcaster_user_id"], "123");
	assert_eq!(conditions[0]["moderator_user_id"], "123");
	assert_eq!(SubscriptionKind::ChannelFollow.version(), "2");
}

#[test]
fn every_kind_resolves_its_own_wire_name() {
	for kind in SubscriptionKind::ALL {
		assert_eq!(SubscriptionKind::from_wire_name(kind.wire_name()), Some(kind));
	}
	assert_eq!(SubscriptionKind::from_wire_name("channel.mystery"), None);
}

#[tokio::test]
async fn subscribe_maps_tier_codes_and_drops_unknown_tiers() {
	let (registry, handler) = registry();

	dispatch(
		&registry,
		"channel.subscribe",
		serde_json::json!({
			"user_id": "7", "user_login": "sub", "user_name": "Sub",
			"broadcaster_user_id": "123", "broadcaster_user_login": "chan", "broadcaster_user_name": "Chan",
			"tier": "2000", "is_gift": false,
		}),
	)
	.await;

	dispatch(
		&registry,
		"channel.subscribe",
		serde_json::json!({
			"user_id": "8", "user_login": "odd", "user_name": "Odd",
			"tier": "9000", "is_gift": true,
		}),
	)
	.await;

	let subs = handler.subs.lock();
	assert_eq!(subs.len(), 1, "unrecognized tier must be silently ignored");
	assert_eq!(subs[0].1, 2);
	assert!(!subs[0].2);
}

#[tokio::test]
async fn raid_direction_compares_from_id_with_channel_id() {
	let (registry, handler) = registry();

	// Someone raids us: from != channel id.
	dispatch(
		&registry,
		"channel.raid",
		serde_json::json!({
			"from_broadcaster_user_id": "777", "from_broadcaster_user_login": "raider", "from_broadcaster_user_name": "Raider",
			"to_broadcaster_user_id": "123", "to_broadcaster_user_login": "chan", "to_broadcaster_user_name": "Chan",
			"viewers": 42,
		}),
	)
	.await;

	assert_eq!(
		handler.raided_from.lock().as_ref().map(|u| u.id.as_str().to_string()),
		Some("777".to_string())
	);
	assert_eq!(handler.viewers.load(Ordering::SeqCst), 42);

	// We raid out: from == channel id.
	dispatch(
		&registry,
		"channel.raid",
		serde_json::json!({
			"from_broadcaster_user_id": "123", "from_broadcaster_user_login": "chan", "from_broadcaster_user_name": "Chan",
			"to_broadcaster_user_id": "900", "to_broadcaster_user_login": "target", "to_broadcaster_user_name": "Target",
			"viewers": 7,
		}),
	)
	.await;

	assert_eq!(
		handler.raiding_to.lock().as_ref().map(|u| u.id.as_str().to_string()),
		Some("900".to_string())
	);
}

#[tokio::test]
async fn chat_message_renders_fragments_badges_color_and_bits() {
	let (registry, handler) = registry();

	dispatch(
		&registry,
		"channel.chat.message",
		serde_json::json!({
			"chatter_user_id": "42", "chatter_user_login": "bob", "chatter_user_name": "Bob",
			"message_id": "msg-1",
			"message_type": "text",
			"color": "",
			"badges": [{"set_id": "moderator", "id": "1"}],
			"message": {
				"text": "hello Kappa",
				"fragments": [
					{"type": "text", "text": "hello "},
					{"type": "emote", "text": "Kappa", "emote": {"id": "25", "emote_set_id": "0"}},
				],
			},
			"cheer": {"bits": 50},
		}),
	)
	.await;

	let messages = handler.chat_messages.lock();
	assert_eq!(messages.len(), 1);
	let message = &messages[0];

	assert_eq!(message.message_id, "msg-1");
	assert!(!message.highlight);
	assert_eq!(message.badges.len(), 1);
	assert_eq!(message.badges[0].alt(), "Moderator");
	// No explicit color: deterministic palette assignment.
	assert_eq!(message.color, crate::render::user_color("Bob", None));
	assert_eq!(message.text.plain_text(), "hello Kappa");
	assert_eq!(message.text.segments().len(), 2, "text run plus emote image");

	assert_eq!(handler.bits.load(Ordering::SeqCst), 50);
}

#[tokio::test]
async fn highlighted_message_type_sets_highlight() {
	let (registry, handler) = registry();

	dispatch(
		&registry,
		"channel.chat.message",
		serde_json::json!({
			"chatter_user_id": "42", "chatter_user_login": "bob", "chatter_user_name": "Bob",
			"message_id": "msg-2",
			"message_type": "channel_points_highlighted",
			"message": {"text": "hi", "fragments": [{"type": "text", "text": "hi"}]},
		}),
	)
	.await;

	assert!(handler.chat_messages.lock()[0].highlight);
}

#[tokio::test]
async fn reward_redemption_extracts_title_and_input() {
	let (registry, handler) = registry();

	dispatch(
		&registry,
		"channel.channel_points_custom_reward_redemption.add",
		serde_json::json!({
			"user_id": "5", "user_login": "fan", "user_name": "Fan",
			"reward": {"id": "r1", "title": "Hydrate", "cost": 100},
			"user_input": "glug",
		}),
	)
	.await;

	assert_eq!(
		handler.rewards_redeemed.lock().as_slice(),
		&[("Hydrate".to_string(), "glug".to_string())]
	);
}

#[tokio::test]
async fn clear_user_messages_and_message_delete_map_to_removals() {
	let (registry, handler) = registry();

	dispatch(
		&registry,
		"channel.chat.clear_user_messages",
		serde_json::json!({"target_user_id": "55", "target_user_login": "loud", "target_user_name": "Loud"}),
	)
	.await;
	dispatch(
		&registry,
		"channel.chat.message_delete",
		serde_json::json!({"message_id": "gone-1"}),
	)
	.await;

	assert_eq!(handler.removed_users.lock()[0].as_str(), "55");
	assert_eq!(handler.removed_messages.lock()[0].as_str(), "gone-1");
}

#[tokio::test]
async fn unregistered_type_surfaces_as_unhandled() {
	let (registry, handler) = registry();

	dispatch(&registry, "channel.mystery.event", serde_json::json!({})).await;

	assert_eq!(handler.unhandled.load(Ordering::SeqCst), 1);
}
