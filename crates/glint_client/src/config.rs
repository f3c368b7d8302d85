#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use glint_domain::{ChannelId, Login};
use glint_platform::assets::Theme;
use glint_platform::{SecretString, TwitchConfig};
use serde::Deserialize;
use tracing::info;

pub fn config_dir() -> PathBuf {
	if let Some(cfg) = dirs::config_dir() {
		return cfg.join("glint");
	}
	if let Some(home) = dirs::home_dir() {
		return home.join(".config").join("glint");
	}
	PathBuf::from(".").join("glint")
}

pub fn config_path() -> PathBuf {
	config_dir().join("config.toml")
}

/// On-disk settings; everything the engine needs for one channel.
#[derive(Debug, Deserialize)]
pub struct Settings {
	pub client_id: String,
	#[serde(default)]
	pub client_secret: Option<String>,
	pub access_token: String,
	#[serde(default)]
	pub refresh_token: Option<String>,

	pub channel_id: String,
	pub channel_login: String,
	pub user_login: String,

	#[serde(default)]
	pub theme: Option<String>,
}

pub fn load_from_disk() -> anyhow::Result<Settings> {
	let path = config_path();
	info!("loading settings from {}", path.display());

	let data = fs::read_to_string(&path).with_context(|| format!("read settings at {}", path.display()))?;
	toml::from_str(&data).with_context(|| format!("parse settings at {}", path.display()))
}

impl Settings {
	pub fn into_twitch_config(self) -> anyhow::Result<TwitchConfig> {
		let mut cfg = TwitchConfig::new(
			self.client_id,
			SecretString::new(self.access_token),
			ChannelId::new(self.channel_id).context("channel_id must be non-empty")?,
			Login::new(self.channel_login).context("channel_login must be non-empty")?,
			Login::new(self.user_login).context("user_login must be non-empty")?,
		);

		cfg.client_secret = self.client_secret.map(SecretString::new);
		cfg.refresh_token = self.refresh_token.map(SecretString::new);
		cfg.theme = match self.theme.as_deref() {
			Some("light") => Theme::Light,
			_ => Theme::Dark,
		};

		Ok(cfg)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn minimal_settings_parse_and_convert() {
		let settings: Settings = toml::from_str(
			r#"
				client_id = "abc"
				access_token = "tok"
				channel_id = "123"
				channel_login = "somechannel"
				user_login = "someuser"
				theme = "light"
			"#,
		)
		.expect("valid settings");

		let cfg = settings.into_twitch_config().expect("valid config");
		assert_eq!(cfg.client_id, "abc");
		assert_eq!(cfg.channel_login.as_str(), "somechannel");
		assert_eq!(cfg.theme, Theme::Light);
	}

	#[test]
	fn empty_channel_id_is_rejected() {
		let settings: Settings = toml::from_str(
			r#"
				client_id = "abc"
				access_token = "tok"
				channel_id = ""
				channel_login = "somechannel"
				user_login = "someuser"
			"#,
		)
		.expect("parses");

		assert!(settings.into_twitch_config().is_err());
	}
}
