#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use glint_domain::{ChannelId, Login, MessageId, TwitchUser, UserId, UserKind};
use glint_protocol::framing::LineBuffer;
use glint_protocol::message::{ChatLine, parse_line};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::assets::{AssetCatalog, BadgeMedia, Theme};
use crate::render;
use crate::twitch::eventsub::{Transport, TransportConnector, TransportEvent};
use crate::twitch::helix::{HelixClient, HelixUser};
use crate::{AuthState, ChatMessageEvent, TwitchHandler};

/// Everything the chat session needs for one channel.
pub struct ChatParams {
	pub url: Url,
	pub connector: Arc<dyn TransportConnector>,
	pub helix: Arc<HelixClient>,
	pub auth: Arc<AuthState>,
	pub catalog: Arc<AssetCatalog>,
	pub handler: Arc<dyn TwitchHandler>,
	pub channel_login: Login,
	pub channel_id: ChannelId,
	pub user_login: Login,
	pub theme: Theme,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
}

/// The chat-side realtime session. Same reconnect/keepalive shape as the
/// event session, without handover: on RECONNECT or a dropped socket the
/// loop dials again with backoff and re-authenticates.
pub struct ChatSession;

impl ChatSession {
	pub fn spawn(params: ChatParams) -> ChatHandle {
		let (outbound_tx, outbound_rx) = mpsc::channel(64);
		let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
		let task = tokio::spawn(run_chat(params, outbound_rx, shutdown_rx));
		ChatHandle {
			outbound_tx,
			shutdown_tx,
			task,
		}
	}
}

/// Handle for sending messages and stopping the chat session.
pub struct ChatHandle {
	outbound_tx: mpsc::Sender<String>,
	shutdown_tx: mpsc::Sender<()>,
	task: tokio::task::JoinHandle<()>,
}

impl ChatHandle {
	pub async fn send_message(&self, text: impl Into<String>) -> anyhow::Result<()> {
		self.outbound_tx
			.send(text.into())
			.await
			.map_err(|_| anyhow::anyhow!("chat session is gone"))
	}

	pub async fn shutdown(self) {
		let _ = self.shutdown_tx.send(()).await;
		let _ = self.task.await;
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOutcome {
	Continue,
	/// Authentication acknowledged; the join was sent.
	Logged,
	/// Server asked us to reconnect.
	Reconnect,
}

struct ChatState {
	params: ChatParams,
	self_user: Option<HelixUser>,
	chat_color: String,
	users_by_login: HashMap<String, TwitchUser>,
}

async fn run_chat(params: ChatParams, mut outbound_rx: mpsc::Receiver<String>, mut shutdown_rx: mpsc::Receiver<()>) {
	let mut state = ChatState {
		params,
		self_user: None,
		chat_color: String::new(),
		users_by_login: HashMap::new(),
	};
	let mut reconnect_attempt: u32 = 0;

	'outer: loop {
		if reconnect_attempt > 0 {
			let delay = super::backoff_delay(
				reconnect_attempt,
				state.params.reconnect_min_delay,
				state.params.reconnect_max_delay,
			);
			info!(?delay, attempt = reconnect_attempt, "chat reconnecting");
			sleep(delay).await;
		}

		let connection_id = crate::new_session_id();
		let mut transport = match state.params.connector.connect(&state.params.url).await {
			Ok(transport) => transport,
			Err(e) => {
				warn!(url = %state.params.url, error = %e, "chat connect failed");
				reconnect_attempt = reconnect_attempt.saturating_add(1);
				continue;
			}
		};
		info!(%connection_id, channel = %state.params.channel_login, "chat connected");

		if state.self_user.is_none() {
			match state.params.helix.get_token_user().await {
				Ok(user) => state.self_user = Some(user),
				Err(e) => debug!(error = %e, "token user lookup failed; continuing without self info"),
			}
		}

		state.send_auth(transport.as_mut()).await;

		let mut lines = LineBuffer::new();
		let mut want_reconnect = false;

		loop {
			tokio::select! {
				_ = shutdown_rx.recv() => {
					transport.force_close().await;
					break 'outer;
				}

				outbound = outbound_rx.recv() => {
					let Some(text) = outbound else {
						transport.force_close().await;
						break 'outer;
					};
					state.send_chat(transport.as_mut(), text).await;
				}

				event = transport.next_event() => {
					match event {
						None | Some(TransportEvent::Closed(_)) => {
							info!("chat socket closed");
							break;
						}
						Some(TransportEvent::Ping) => {}
						Some(TransportEvent::Frame(chunk)) => {
							lines.push(&chunk);
							while let Some(line) = lines.next_line() {
								match state.handle_line(transport.as_mut(), &line).await {
									LineOutcome::Continue => {}
									LineOutcome::Logged => reconnect_attempt = 0,
									LineOutcome::Reconnect => {
										want_reconnect = true;
										break;
									}
								}
							}
							if want_reconnect {
								transport.force_close().await;
								break;
							}
						}
					}
				}
			}
		}

		reconnect_attempt = reconnect_attempt.saturating_add(1);
	}
}

impl ChatState {
	async fn send_auth(&self, transport: &mut dyn Transport) {
		let token = self.params.auth.access_token();
		let nick = self
			.self_user
			.as_ref()
			.and_then(|u| u.display_name.clone())
			.unwrap_or_else(|| self.params.user_login.as_str().to_string());

		self.send_line(
			transport,
			ChatLine::outbound("CAP REQ", "", "twitch.tv/membership twitch.tv/tags twitch.tv/commands"),
		)
		.await;
		self.send_line(transport, ChatLine::outbound("PASS", format!("oauth:{}", token.expose()), ""))
			.await;
		self.send_line(transport, ChatLine::outbound("NICK", nick, "")).await;
	}

	async fn send_line(&self, transport: &mut dyn Transport, line: ChatLine) {
		if line.command != "PONG" {
			debug!(line = %line.serialize_for_log(), "chat =>");
		}
		if let Err(e) = transport.send(line.serialize()).await {
			warn!(error = %e, "chat send failed");
		}
	}

	async fn handle_line(&mut self, transport: &mut dyn Transport, raw: &str) -> LineOutcome {
		let Some(line) = parse_line(raw) else {
			debug!(raw, "dropping unparseable chat line");
			return LineOutcome::Continue;
		};
		metrics::counter!("chat_lines_total").increment(1);

		match line.command.as_str() {
			"PING" => {
				self.send_line(transport, ChatLine::outbound("PONG", "", line.parameters.clone()))
					.await;
			}

			"LOGGED" => {
				debug!("chat <= logged in");
				self.send_line(
					transport,
					ChatLine::outbound("JOIN", format!("#{}", self.params.channel_login), ""),
				)
				.await;
				return LineOutcome::Logged;
			}

			"GLOBALUSERSTATE" => {
				self.chat_color = line.tag("color").unwrap_or_default().to_string();
				self.warm_emote_sets(&line).await;
			}

			"USERSTATE" => {
				self.warm_emote_sets(&line).await;
			}

			"JOIN" => {
				if self.is_self(&line.nick) {
					self.params.handler.on_chat_joined().await;
				} else if let Some(user) = self.lookup_user(&line.nick).await {
					self.params.handler.on_user_join_chat(user).await;
				}
			}

			"USERLIST" => {
				let logins: Vec<String> = line
					.parameters
					.split(' ')
					.filter(|l| !l.is_empty())
					.map(str::to_string)
					.collect();
				for login in logins {
					if self.is_self(&login) {
						continue;
					}
					if let Some(user) = self.lookup_user(&login).await {
						self.params.handler.on_user_join_chat(user).await;
					}
				}
			}

			"PRIVMSG" => {
				self.user_message(&line, false, false).await;
			}

			"USERNOTICE" => {
				self.user_notice(&line).await;
			}

			"CLEARCHAT" => match line.tag("target-user-id").and_then(|id| UserId::new(id).ok()) {
				Some(user_id) => self.params.handler.on_chat_user_removed(user_id).await,
				None => self.params.handler.on_chat_clear().await,
			},

			"CLEARMSG" => {
				if let Some(message_id) = line.tag("target-msg-id").and_then(|id| MessageId::new(id).ok()) {
					self.params.handler.on_chat_message_removed(message_id).await;
				}
			}

			"RECONNECT" => {
				info!("chat server requested reconnect");
				return LineOutcome::Reconnect;
			}

			_ => {
				debug!(raw, "chat <= unhandled command");
			}
		}

		LineOutcome::Continue
	}

	fn is_self(&self, login: &str) -> bool {
		let self_login = self
			.self_user
			.as_ref()
			.map(|u| u.login.as_str())
			.unwrap_or(self.params.user_login.as_str());
		login.eq_ignore_ascii_case(self_login)
	}

	async fn warm_emote_sets(&self, line: &ChatLine) {
		for set_id in &line.emote_sets {
			self.params.catalog.warm_emote_set(set_id).await;
		}
	}

	async fn lookup_user(&mut self, login: &str) -> Option<TwitchUser> {
		if let Some(user) = self.users_by_login.get(login) {
			return Some(user.clone());
		}

		let fetched = match self.params.helix.get_user_by_login(login).await {
			Ok(user) => user?,
			Err(e) => {
				debug!(login, error = %e, "user lookup failed");
				return None;
			}
		};

		let user = TwitchUser::new(
			UserId::new(fetched.id).ok()?,
			Login::new(fetched.login).ok()?,
			fetched.display_name.unwrap_or_else(|| login.to_string()),
			UserKind::Viewer,
		);
		self.users_by_login.insert(login.to_string(), user.clone());
		Some(user)
	}

	fn user_from_tags(&self, line: &ChatLine, self_sent: bool) -> Option<TwitchUser> {
		let (id, login, fallback_display) = if self_sent {
			let me = self.self_user.as_ref()?;
			(me.id.clone(), me.login.clone(), me.display_name.clone())
		} else {
			(
				line.tag("user-id").unwrap_or_default().to_string(),
				line.nick.clone(),
				None,
			)
		};

		let display = match line.tag("display-name") {
			Some(name) if !name.is_empty() => name.to_string(),
			_ => fallback_display.unwrap_or_else(|| login.clone()),
		};

		let kind = if self_sent {
			UserKind::SelfUser
		} else if id == self.params.channel_id.as_str() {
			UserKind::Broadcaster
		} else if line.tag("mod") == Some("1") {
			UserKind::Moderator
		} else {
			match line.tag("user-type") {
				Some("admin") => UserKind::Admin,
				Some("global_mod") => UserKind::GlobalModerator,
				Some("staff") => UserKind::Staff,
				_ => UserKind::Viewer,
			}
		};

		Some(TwitchUser::new(UserId::new(id).ok()?, Login::new(login).ok()?, display, kind))
	}

	async fn resolve_badges(&self, line: &ChatLine) -> Vec<BadgeMedia> {
		let mut badges = Vec::new();
		for (set_id, version) in &line.badges {
			if let Some(asset) = self.params.catalog.badge(set_id, version).await {
				badges.push(asset);
			}
		}
		badges
	}

	async fn user_message(&mut self, line: &ChatLine, highlight: bool, self_sent: bool) {
		let Some(user) = self.user_from_tags(line, self_sent) else {
			debug!("dropping chat message without usable user tags");
			return;
		};

		let bits: u64 = line.tag("bits").and_then(|b| b.parse().ok()).unwrap_or(0);
		let cheermotes = if bits > 0 {
			Some(self.params.catalog.cheermotes().await)
		} else {
			None
		};

		let fragments = render::chat_line_fragments(
			&line.parameters,
			&line.emote_spans,
			cheermotes.as_ref().map(|list| list.as_slice()),
		);
		let text = render::render(&fragments, self.params.theme, &self.params.catalog).await;

		let explicit_color = if self_sent {
			Some(self.chat_color.as_str())
		} else {
			line.tag("color")
		};
		let color = render::user_color(&user.display_name, explicit_color);
		let badges = self.resolve_badges(line).await;
		let timestamp = line
			.tag("tmi-sent-ts")
			.and_then(|ms| ms.parse::<u64>().ok())
			.map(|ms| std::time::UNIX_EPOCH + Duration::from_millis(ms));

		self.params
			.handler
			.on_chat_message(ChatMessageEvent {
				user: user.clone(),
				color,
				message_id: line.tag("id").unwrap_or_default().to_string(),
				highlight,
				reply_parent_id: line.tag("reply-parent-msg-id").map(str::to_string),
				badges,
				timestamp,
				text: text.clone(),
			})
			.await;

		if bits > 0 {
			self.params.handler.on_bits(user, bits, text).await;
		}
	}

	async fn user_notice(&mut self, line: &ChatLine) {
		self.user_message(line, true, false).await;

		let notice_type = line.tag("msg-id").unwrap_or_default();
		if notice_type != "sub" && notice_type != "resub" {
			return;
		}
		let Some(plan) = line.tag("msg-param-sub-plan") else { return };
		let Some(tier) = sub_plan_tier(plan) else {
			debug!(plan, "ignoring sub notice with unrecognized plan");
			return;
		};
		let Some(total_months) = line.tag("msg-param-cumulative-months").and_then(|m| m.parse::<i64>().ok()) else {
			return;
		};

		let share_streak = line.tag("msg-param-should-share-streak") == Some("1");
		let streak_months = if share_streak {
			line.tag("msg-param-streak-months")
				.and_then(|m| m.parse::<i64>().ok())
				.unwrap_or(-1)
		} else {
			-1
		};

		let Some(user) = self.user_from_tags(line, false) else { return };
		let fragments = render::chat_line_fragments(&line.parameters, &line.emote_spans, None);
		let text = render::render(&fragments, self.params.theme, &self.params.catalog).await;

		self.params
			.handler
			.on_shared_sub(user, tier, total_months, streak_months, text)
			.await;
	}

	async fn send_chat(&mut self, transport: &mut dyn Transport, text: String) {
		let mut line = ChatLine::outbound("PRIVMSG", format!("#{}", self.params.channel_login), text);
		if let Some(me) = &self.self_user {
			line.tags.insert("user-id".to_string(), me.id.clone());
			line.tags.insert(
				"display-name".to_string(),
				me.display_name.clone().unwrap_or_else(|| me.login.clone()),
			);
		}

		self.send_line(transport, line.clone()).await;
		// Local echo: the server does not reflect our own PRIVMSG.
		self.user_message(&line, false, true).await;
	}
}

/// IRC sub-plan codes, including Prime as its own tier.
fn sub_plan_tier(plan: &str) -> Option<u8> {
	match plan {
		"1000" => Some(1),
		"2000" => Some(2),
		"3000" => Some(3),
		"Prime" => Some(4),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sub_plan_codes_map_to_tiers() {
		assert_eq!(sub_plan_tier("1000"), Some(1));
		assert_eq!(sub_plan_tier("2000"), Some(2));
		assert_eq!(sub_plan_tier("3000"), Some(3));
		assert_eq!(sub_plan_tier("Prime"), Some(4));
		assert_eq!(sub_plan_tier("4000"), None);
	}
}
