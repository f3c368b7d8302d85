#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
}

macro_rules! id_newtype {
	($(#[$doc:meta])* $name:ident) => {
		$(#[$doc])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			/// Create a non-empty identifier.
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				if id.trim().is_empty() {
					return Err(ParseIdError::Empty);
				}
				Ok(Self(id))
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				$name::new(s.to_string())
			}
		}
	};
}

id_newtype!(
	/// Platform-assigned numeric user identifier (kept as a string).
	UserId
);
id_newtype!(
	/// Lowercase account login name.
	Login
);
id_newtype!(
	/// Broadcaster (channel) identifier.
	ChannelId
);
id_newtype!(
	/// Platform-native chat message identifier.
	MessageId
);

/// Privilege class of a chat user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
	Viewer,
	Moderator,
	GlobalModerator,
	Admin,
	Staff,
	Broadcaster,
	SelfUser,
}

impl Default for UserKind {
	fn default() -> Self {
		UserKind::Viewer
	}
}

/// A resolved chat user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitchUser {
	pub id: UserId,
	pub login: Login,
	pub display_name: String,
	pub kind: UserKind,
}

impl TwitchUser {
	pub fn new(id: UserId, login: Login, display_name: impl Into<String>, kind: UserKind) -> Self {
		Self {
			id,
			login,
			display_name: display_name.into(),
			kind,
		}
	}
}

/// A typed slice of a chat message before rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fragment {
	Text {
		text: String,
	},
	Mention {
		user_name: String,
		text: String,
	},
	Emote {
		id: String,
		#[serde(default)]
		emote_set_id: Option<String>,
		text: String,
	},
	Cheermote {
		prefix: String,
		bits: u64,
		text: String,
	},
}

/// One renderable piece of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
	Text {
		text: String,
	},
	Image {
		url: String,
		animated: bool,
		alt: String,
	},
}

/// Ordered sequence of text/image segments produced by the renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RichText {
	segments: Vec<Segment>,
}

impl RichText {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a literal text run. Adjacent text runs are merged; empty
	/// runs are ignored.
	pub fn push_text(&mut self, text: impl AsRef<str>) {
		let text = text.as_ref();
		if text.is_empty() {
			return;
		}
		if let Some(Segment::Text { text: last }) = self.segments.last_mut() {
			last.push_str(text);
			return;
		}
		self.segments.push(Segment::Text { text: text.to_string() });
	}

	pub fn push_image(&mut self, url: impl Into<String>, animated: bool, alt: impl Into<String>) {
		self.segments.push(Segment::Image {
			url: url.into(),
			animated,
			alt: alt.into(),
		});
	}

	pub fn segments(&self) -> &[Segment] {
		&self.segments
	}

	pub fn is_empty(&self) -> bool {
		self.segments.is_empty()
	}

	/// Flatten to plain text, substituting image alt text.
	pub fn plain_text(&self) -> String {
		let mut out = String::new();
		for segment in &self.segments {
			match segment {
				Segment::Text { text } => out.push_str(text),
				Segment::Image { alt, .. } => out.push_str(alt),
			}
		}
		out
	}
}

impl FromIterator<Segment> for RichText {
	fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
		let mut text = RichText::new();
		for segment in iter {
			match segment {
				Segment::Text { text: t } => text.push_text(t),
				Segment::Image { url, animated, alt } => text.push_image(url, animated, alt),
			}
		}
		text
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn id_newtypes_reject_empty() {
		assert_eq!(UserId::new(""), Err(ParseIdError::Empty));
		assert_eq!(Login::new("   "), Err(ParseIdError::Empty));
		assert!(ChannelId::new("123").is_ok());
	}

	#[test]
	fn rich_text_merges_adjacent_text_runs() {
		let mut text = RichText::new();
		text.push_text("hello ");
		text.push_text("world");
		assert_eq!(
			text.segments(),
			&[Segment::Text {
				text: "hello world".to_string()
			}]
		);
	}

	#[test]
	fn rich_text_keeps_images_separate() {
		let mut text = RichText::new();
		text.push_text("a");
		text.push_image("https://example/1.png", false, "Kappa");
		text.push_text("b");
		assert_eq!(text.segments().len(), 3);
		assert_eq!(text.plain_text(), "aKappab");
	}

	#[test]
	fn rich_text_ignores_empty_text_runs() {
		let mut text = RichText::new();
		text.push_text("");
		assert!(text.is_empty());
	}
}
