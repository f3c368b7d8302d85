#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use glint_domain::ChannelId;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::assets::{AssetCatalog, CatalogFetcher, Cheermote, CheermoteTier, ImageFormat, MediaAsset, Scale, Theme};
use crate::twitch::subscriptions::{SubscriptionKind, SubscriptionSink};
use crate::{AuthState, SecretString, TwitchConfig};

const EVENTSUB_SUBSCRIPTIONS_PATH: &str = "/helix/eventsub/subscriptions";
const USERS_PATH: &str = "/helix/users";
const EMOTE_SET_PATH: &str = "/helix/chat/emotes/set";
const GLOBAL_BADGES_PATH: &str = "/helix/chat/badges/global";
const CHANNEL_BADGES_PATH: &str = "/helix/chat/badges";
const CHEERMOTES_PATH: &str = "/helix/bits/cheermotes";
const TOKEN_REFRESH_PATH: &str = "/oauth2/token";

fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
	if let Some(v) = headers.get(RETRY_AFTER)
		&& let Ok(s) = v.to_str()
		&& let Ok(secs) = s.trim().parse::<u64>()
	{
		return Some(Duration::from_secs(secs));
	}

	if let Some(v) = headers.get("Ratelimit-Reset")
		&& let Ok(s) = v.to_str()
		&& let Ok(reset_unix) = s.trim().parse::<u64>()
	{
		let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
		if reset_unix > now {
			return Some(Duration::from_secs(reset_unix - now));
		}
	}

	None
}

async fn send_with_retry(req: reqwest::RequestBuilder, label: &'static str) -> anyhow::Result<reqwest::Response> {
	let retry_builder = req.try_clone();
	let resp = req.send().await.with_context(|| format!("helix {label} send"))?;
	let status = resp.status();

	if status == StatusCode::TOO_MANY_REQUESTS
		&& let Some(delay) = retry_delay_from_headers(resp.headers())
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(delay).await;
		let retry_resp = retry.send().await.with_context(|| format!("helix {label} retry send"))?;
		return Ok(retry_resp);
	}

	if status.is_server_error()
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(Duration::from_millis(250)).await;
		let retry_resp = retry.send().await.with_context(|| format!("helix {label} retry send"))?;
		return Ok(retry_resp);
	}

	Ok(resp)
}

/// The REST collaborator: subscription registration, catalog population
/// and user lookups. A 401 triggers one token refresh and one retry.
#[derive(Clone)]
pub struct HelixClient {
	http: reqwest::Client,
	base_url: Url,
	auth_base_url: Url,
	auth: Arc<AuthState>,
}

impl HelixClient {
	pub fn new(cfg: &TwitchConfig, auth: Arc<AuthState>) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent("glint/0.x (eventsub-ws)")
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			http,
			base_url: Url::parse(&cfg.helix_base_url).context("parse helix_base_url")?,
			auth_base_url: Url::parse(&cfg.auth_base_url).context("parse auth_base_url")?,
			auth,
		})
	}

	fn url(&self, path_and_query: &str) -> anyhow::Result<Url> {
		self.base_url.join(path_and_query).context("join helix url")
	}

	fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		req.header("Client-Id", self.auth.client_id().to_string())
			.header("Authorization", format!("Bearer {}", self.auth.access_token().expose()))
	}

	/// Send an authenticated request; on 401, refresh the user token
	/// once and retry with the new credentials.
	async fn send_authed<F>(&self, build: F, label: &'static str) -> anyhow::Result<reqwest::Response>
	where
		F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
	{
		let resp = send_with_retry(self.authed(build(&self.http)), label).await?;
		if resp.status() != StatusCode::UNAUTHORIZED {
			return Ok(resp);
		}

		info!(label, "helix returned 401; refreshing user token");
		self.refresh_user_token()
			.await
			.with_context(|| format!("helix {label} token refresh"))?;

		send_with_retry(self.authed(build(&self.http)), label).await
	}

	/// Exchange the refresh token for a fresh access token and store it.
	pub async fn refresh_user_token(&self) -> anyhow::Result<()> {
		let client_secret = self.auth.client_secret().context("token refresh requires client_secret")?;
		let refresh_token = self.auth.refresh_token().context("token refresh requires refresh_token")?;

		let url = self
			.auth_base_url
			.join(TOKEN_REFRESH_PATH)
			.context("join token refresh url")?;

		let resp = self
			.http
			.post(url)
			.form(&[
				("grant_type", "refresh_token"),
				("client_id", self.auth.client_id()),
				("client_secret", client_secret.expose()),
				("refresh_token", refresh_token.expose()),
			])
			.send()
			.await
			.context("token refresh request")?;

		let status = resp.status();
		let body = resp.text().await.context("token refresh read body")?;
		if !status.is_success() {
			anyhow::bail!("token refresh failed: status={status} body={body}");
		}

		let parsed: TokenRefreshResponse = serde_json::from_str(&body).context("token refresh parse json")?;
		self.auth.store_tokens(
			SecretString::new(parsed.access_token),
			parsed.refresh_token.map(SecretString::new),
		);
		info!("refreshed user OAuth token");
		Ok(())
	}

	pub async fn get_user_by_login(&self, login: &str) -> anyhow::Result<Option<HelixUser>> {
		let path = format!("{USERS_PATH}?login={}", urlencoding::encode(login));
		let url = self.url(&path)?;

		let resp = self
			.send_authed(move |http| http.get(url.clone()), "GET /helix/users")
			.await?;

		let status = resp.status();
		let body = resp.text().await.context("helix GET /helix/users read body")?;
		if !status.is_success() {
			anyhow::bail!("helix GET /helix/users failed: status={status} body={body}");
		}

		let parsed: HelixUsersResponse = serde_json::from_str(&body).context("helix users parse json")?;
		Ok(parsed.data.into_iter().next())
	}

	/// The user the access token belongs to.
	pub async fn get_token_user(&self) -> anyhow::Result<HelixUser> {
		let url = self.url(USERS_PATH)?;

		let resp = self
			.send_authed(move |http| http.get(url.clone()), "GET /helix/users (whoami)")
			.await?;

		let status = resp.status();
		let body = resp.text().await.context("helix GET /helix/users (whoami) read body")?;
		if !status.is_success() {
			anyhow::bail!("helix GET /helix/users (whoami) failed: status={status} body={body}");
		}

		let parsed: HelixUsersResponse = serde_json::from_str(&body).context("helix users (whoami) parse json")?;
		parsed.data.into_iter().next().context("helix whoami returned empty data")
	}

	async fn get_json(&self, path_and_query: String, label: &'static str) -> anyhow::Result<String> {
		let url = self.url(&path_and_query)?;
		let resp = self.send_authed(move |http| http.get(url.clone()), label).await?;

		let status = resp.status();
		let body = resp.text().await.with_context(|| format!("helix {label} read body"))?;
		if !status.is_success() {
			anyhow::bail!("helix {label} failed: status={status} body={body}");
		}
		Ok(body)
	}
}

#[async_trait::async_trait]
impl SubscriptionSink for HelixClient {
	async fn register(&self, kind: SubscriptionKind, session_id: &str, condition: serde_json::Value) -> anyhow::Result<()> {
		let url = self.url(EVENTSUB_SUBSCRIPTIONS_PATH)?;
		let payload = HelixCreateSubscriptionRequest {
			r#type: kind.wire_name(),
			version: kind.version(),
			condition,
			transport: HelixWebsocketTransport {
				method: "websocket",
				session_id,
			},
		};

		let resp = self
			.send_authed(
				move |http| http.post(url.clone()).json(&payload),
				"POST /helix/eventsub/subscriptions",
			)
			.await?;

		let status = resp.status();
		if status == StatusCode::ACCEPTED {
			debug!(kind = kind.wire_name(), "subscription registered");
			return Ok(());
		}
		// Re-subscribing an identical condition is idempotent upstream.
		if status == StatusCode::CONFLICT {
			debug!(kind = kind.wire_name(), "subscription already exists");
			return Ok(());
		}

		let body = resp.text().await.unwrap_or_default();
		anyhow::bail!(
			"helix create subscription failed (type={}): status={status} body={body}",
			kind.wire_name()
		);
	}
}

#[async_trait::async_trait]
impl CatalogFetcher for HelixClient {
	async fn fetch_emote_set(&self, set_id: &str) -> anyhow::Result<Vec<(String, MediaAsset)>> {
		let path = format!("{EMOTE_SET_PATH}?emote_set_id={}", urlencoding::encode(set_id));
		let body = self.get_json(path, "GET /helix/chat/emotes/set").await?;
		let parsed: HelixEmoteSetResponse = serde_json::from_str(&body).context("helix emote set parse json")?;

		let mut out = Vec::with_capacity(parsed.data.len());
		for emote in parsed.data {
			out.push((emote.id.clone(), emote_asset(&parsed.template, &emote)));
		}
		Ok(out)
	}

	async fn fetch_badges(&self, channel_id: &ChannelId) -> anyhow::Result<Vec<((String, String), MediaAsset)>> {
		let mut out = Vec::new();

		let global = self
			.get_json(GLOBAL_BADGES_PATH.to_string(), "GET /helix/chat/badges/global")
			.await?;
		let parsed: HelixBadgesResponse = serde_json::from_str(&global).context("helix global badges parse json")?;
		collect_badges(&mut out, parsed);

		// Channel badges override global ones with the same set/version.
		let path = format!(
			"{CHANNEL_BADGES_PATH}?broadcaster_id={}",
			urlencoding::encode(channel_id.as_str())
		);
		match self.get_json(path, "GET /helix/chat/badges").await {
			Ok(body) => {
				let parsed: HelixBadgesResponse = serde_json::from_str(&body).context("helix channel badges parse json")?;
				collect_badges(&mut out, parsed);
			}
			Err(e) => warn!(error = %e, "channel badge fetch failed; keeping global set"),
		}

		Ok(out)
	}

	async fn fetch_cheermotes(&self, channel_id: &ChannelId) -> anyhow::Result<Vec<Cheermote>> {
		let path = format!(
			"{CHEERMOTES_PATH}?broadcaster_id={}",
			urlencoding::encode(channel_id.as_str())
		);
		let body = self.get_json(path, "GET /helix/bits/cheermotes").await?;
		let parsed: HelixCheermotesResponse = serde_json::from_str(&body).context("helix cheermotes parse json")?;

		let mut out = Vec::with_capacity(parsed.data.len());
		for entry in parsed.data {
			let mut cheermote = Cheermote::new(entry.prefix.clone());
			for tier in entry.tiers {
				let mut image = MediaAsset::new(format!("{}{}", entry.prefix, tier.min_bits));
				fill_cheermote_urls(&mut image, Theme::Dark, &tier.images.dark);
				fill_cheermote_urls(&mut image, Theme::Light, &tier.images.light);
				cheermote.add_tier(CheermoteTier {
					threshold: tier.min_bits,
					can_cheer: tier.can_cheer,
					image,
				});
			}
			out.push(cheermote);
		}
		Ok(out)
	}
}

/// Build a catalog backed by this client.
pub fn catalog_for(client: &HelixClient, channel_id: ChannelId) -> AssetCatalog {
	AssetCatalog::new(Arc::new(client.clone()), channel_id)
}

fn emote_asset(template: &str, emote: &HelixEmote) -> MediaAsset {
	let mut asset = MediaAsset::new(emote.name.clone());
	for theme_label in &emote.theme_mode {
		let theme = match theme_label.as_str() {
			"dark" => Theme::Dark,
			"light" => Theme::Light,
			_ => continue,
		};
		for format_label in &emote.format {
			let format = match format_label.as_str() {
				"static" => ImageFormat::Static,
				"animated" => ImageFormat::Animated,
				_ => continue,
			};
			for scale_label in &emote.scale {
				let Some(scale) = Scale::from_label(scale_label) else { continue };
				let url = template
					.replace("{{id}}", &emote.id)
					.replace("{{format}}", format_label)
					.replace("{{theme_mode}}", theme_label)
					.replace("{{scale}}", scale_label);
				asset.set_url(theme, format, scale, url);
			}
		}
	}
	asset
}

fn collect_badges(out: &mut Vec<((String, String), MediaAsset)>, parsed: HelixBadgesResponse) {
	for set in parsed.data {
		for version in set.versions {
			let alt = version
				.title
				.clone()
				.unwrap_or_else(|| format!("{}/{}", set.set_id, version.id));
			let mut asset = MediaAsset::new(alt);
			for theme in [Theme::Dark, Theme::Light] {
				asset.set_url(theme, ImageFormat::Static, Scale::One, version.image_url_1x.clone());
				asset.set_url(theme, ImageFormat::Static, Scale::Two, version.image_url_2x.clone());
				asset.set_url(theme, ImageFormat::Static, Scale::Four, version.image_url_4x.clone());
			}
			out.push(((set.set_id.clone(), version.id), asset));
		}
	}
}

fn fill_cheermote_urls(image: &mut MediaAsset, theme: Theme, urls: &HelixCheermoteThemeImages) {
	for (label, url) in &urls.animated {
		if let Some(scale) = Scale::from_label(label) {
			image.set_url(theme, ImageFormat::Animated, scale, url.clone());
		}
	}
	for (label, url) in &urls.r#static {
		if let Some(scale) = Scale::from_label(label) {
			image.set_url(theme, ImageFormat::Static, scale, url.clone());
		}
	}
}

#[derive(Debug, Serialize)]
struct HelixCreateSubscriptionRequest<'a> {
	#[serde(rename = "type")]
	r#type: &'static str,
	version: &'static str,
	condition: serde_json::Value,
	transport: HelixWebsocketTransport<'a>,
}

#[derive(Debug, Serialize)]
struct HelixWebsocketTransport<'a> {
	method: &'static str,
	session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[allow(dead_code)]
	#[serde(default)]
	expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HelixUsersResponse {
	data: Vec<HelixUser>,
}

/// A user row from `/helix/users`.
#[derive(Debug, Clone, Deserialize)]
pub struct HelixUser {
	pub id: String,
	pub login: String,
	#[serde(default)]
	pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelixEmoteSetResponse {
	data: Vec<HelixEmote>,
	template: String,
}

#[derive(Debug, Deserialize)]
struct HelixEmote {
	id: String,
	name: String,
	#[serde(default)]
	format: Vec<String>,
	#[serde(default)]
	scale: Vec<String>,
	#[serde(default)]
	theme_mode: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HelixBadgesResponse {
	data: Vec<HelixBadgeSet>,
}

#[derive(Debug, Deserialize)]
struct HelixBadgeSet {
	set_id: String,
	versions: Vec<HelixBadgeVersion>,
}

#[derive(Debug, Deserialize)]
struct HelixBadgeVersion {
	id: String,
	image_url_1x: String,
	image_url_2x: String,
	image_url_4x: String,
	#[serde(default)]
	title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelixCheermotesResponse {
	data: Vec<HelixCheermote>,
}

#[derive(Debug, Deserialize)]
struct HelixCheermote {
	prefix: String,
	tiers: Vec<HelixCheermoteTier>,
}

#[derive(Debug, Deserialize)]
struct HelixCheermoteTier {
	min_bits: u64,
	can_cheer: bool,
	images: HelixCheermoteImages,
}

#[derive(Debug, Default, Deserialize)]
struct HelixCheermoteImages {
	#[serde(default)]
	dark: HelixCheermoteThemeImages,
	#[serde(default)]
	light: HelixCheermoteThemeImages,
}

#[derive(Debug, Default, Deserialize)]
struct HelixCheermoteThemeImages {
	#[serde(default)]
	animated: HashMap<String, String>,
	#[serde(default)]
	r#static: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn emote_asset_expands_template_across_variants() {
		let emote = HelixEmote {
			id: "25".to_string(),
			name: "Kappa".to_string(),
			format: vec!["static".to_string(), "animated".to_string()],
			scale: vec!["1.0".to_string(), "2.0".to_string(), "3.0".to_string()],
			theme_mode: vec!["light".to_string(), "dark".to_string()],
		};
		let template = "https://cdn/emoticons/v2/{{id}}/{{format}}/{{theme_mode}}/{{scale}}";

		let asset = emote_asset(template, &emote);
		assert_eq!(
			asset.url(Theme::Dark, ImageFormat::Animated, Scale::Three),
			Some("https://cdn/emoticons/v2/25/animated/dark/3.0")
		);
		assert_eq!(
			asset.url(Theme::Light, ImageFormat::Static, Scale::One),
			Some("https://cdn/emoticons/v2/25/static/light/1.0")
		);
		assert_eq!(asset.alt(), "Kappa");
	}

	#[test]
	fn static_only_emote_has_no_animated_urls() {
		let emote = HelixEmote {
			id: "1".to_string(),
			name: "One".to_string(),
			format: vec!["static".to_string()],
			scale: vec!["1.0".to_string()],
			theme_mode: vec!["dark".to_string()],
		};

		let asset = emote_asset("https://cdn/{{id}}/{{format}}/{{theme_mode}}/{{scale}}", &emote);
		assert!(asset.best_url(Theme::Dark, ImageFormat::Animated).is_none());
		assert!(asset.best_url(Theme::Dark, ImageFormat::Static).is_some());
	}

	#[test]
	fn channel_badges_override_global_versions() {
		let global = HelixBadgesResponse {
			data: vec![HelixBadgeSet {
				set_id: "subscriber".to_string(),
				versions: vec![HelixBadgeVersion {
					id: "0".to_string(),
					image_url_1x: "global-1x".to_string(),
					image_url_2x: "global-2x".to_string(),
					image_url_4x: "global-4x".to_string(),
					title: None,
				}],
			}],
		};
		let channel = HelixBadgesResponse {
			data: vec![HelixBadgeSet {
				set_id: "subscriber".to_string(),
				versions: vec![HelixBadgeVersion {
					id: "0".to_string(),
					image_url_1x: "channel-1x".to_string(),
					image_url_2x: "channel-2x".to_string(),
					image_url_4x: "channel-4x".to_string(),
					title: Some("Subscriber".to_string()),
				}],
			}],
		};

		let mut out = Vec::new();
		collect_badges(&mut out, global);
		collect_badges(&mut out, channel);

		// Later entries win when inserted into the catalog map.
		let last = out
			.iter()
			.rev()
			.find(|((set, version), _)| set == "subscriber" && version == "0")
			.map(|(_, asset)| asset)
			.expect("badge present");
		assert_eq!(last.url(Theme::Dark, ImageFormat::Static, Scale::One), Some("channel-1x"));
	}
}
