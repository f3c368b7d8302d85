#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Tag keys that are protocol noise and never stored.
const IGNORED_TAGS: [&str; 2] = ["client-nonce", "flags"];

/// A single emote occurrence inside the trailing parameter, as character
/// offsets (inclusive start..=end).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmoteSpan {
	pub id: String,
	pub start: usize,
	pub end: usize,
}

/// One parsed line of the tag-annotated chat protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatLine {
	/// Semantic command name after legacy-code mapping (`001` -> `LOGGED`).
	pub command: String,
	pub channel: String,
	pub tags: BTreeMap<String, String>,
	/// `badges` tag: badge set -> version.
	pub badges: BTreeMap<String, String>,
	/// `badge-info` tag: badge set -> detail (e.g. subscriber months).
	pub badge_info: BTreeMap<String, String>,
	/// Sorted by start offset, non-overlapping.
	pub emote_spans: Vec<EmoteSpan>,
	/// `emote-sets` tag; the caller warms the emote cache out of band.
	pub emote_sets: Vec<String>,
	pub nick: String,
	pub host: String,
	/// Trailing parameter (message body, PONG token, user list, ...).
	pub parameters: String,
}

impl ChatLine {
	/// Build an outbound line.
	pub fn outbound(command: impl Into<String>, channel: impl Into<String>, parameters: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			channel: channel.into(),
			parameters: parameters.into(),
			..Self::default()
		}
	}

	pub fn tag(&self, key: &str) -> Option<&str> {
		self.tags.get(key).map(String::as_str)
	}

	pub fn has_tag(&self, key: &str) -> bool {
		self.tags.contains_key(key)
	}

	/// Insert an emote span keeping the list sorted by start offset.
	/// Spans overlapping an existing entry are dropped.
	pub fn insert_emote_span(&mut self, span: EmoteSpan) {
		let idx = self.emote_spans.partition_point(|s| s.start < span.start);
		if let Some(prev) = idx.checked_sub(1).and_then(|i| self.emote_spans.get(i))
			&& prev.end >= span.start
		{
			return;
		}
		if let Some(next) = self.emote_spans.get(idx)
			&& span.end >= next.start
		{
			return;
		}
		self.emote_spans.insert(idx, span);
	}

	/// Serialize to the wire format, CRLF terminated.
	pub fn serialize(&self) -> String {
		let mut out = String::new();
		let tag_block = self.tag_block();
		if !tag_block.is_empty() {
			out.push('@');
			out.push_str(&tag_block);
			out.push(' ');
		}
		out.push_str(&self.command);
		if !self.channel.trim().is_empty() {
			out.push(' ');
			out.push_str(&self.channel);
		}
		if !self.parameters.is_empty() {
			out.push_str(" :");
			out.push_str(&self.parameters);
		}
		out.push_str("\r\n");
		out
	}

	/// Serialize for logging: credentials after `oauth:` are masked.
	pub fn serialize_for_log(&self) -> String {
		let line = self.serialize();
		let trimmed = line.trim_end();
		match trimmed.find("oauth:") {
			Some(idx) => format!("{}oauth:*****", &trimmed[..idx]),
			None => trimmed.to_string(),
		}
	}

	fn tag_block(&self) -> String {
		let mut parts: Vec<String> = Vec::new();

		if !self.badge_info.is_empty() {
			parts.push(format!("badge-info={}", join_slash_pairs(&self.badge_info)));
		}
		if !self.badges.is_empty() {
			parts.push(format!("badges={}", join_slash_pairs(&self.badges)));
		}
		for (key, value) in &self.tags {
			parts.push(format!("{key}={value}"));
		}
		if !self.emote_spans.is_empty() {
			parts.push(format!("emotes={}", emotes_tag(&self.emote_spans)));
		}
		if !self.emote_sets.is_empty() {
			parts.push(format!("emote-sets={}", self.emote_sets.join(",")));
		}

		parts.join(";")
	}
}

fn join_slash_pairs(map: &BTreeMap<String, String>) -> String {
	let mut out = String::new();
	for (i, (key, value)) in map.iter().enumerate() {
		if i != 0 {
			out.push(',');
		}
		let _ = write!(out, "{key}/{value}");
	}
	out
}

/// Group spans back into the `id:start-end,start-end/...` tag form.
fn emotes_tag(spans: &[EmoteSpan]) -> String {
	let mut groups: Vec<(String, Vec<(usize, usize)>)> = Vec::new();
	for span in spans {
		match groups.iter_mut().find(|(id, _)| *id == span.id) {
			Some((_, locations)) => locations.push((span.start, span.end)),
			None => groups.push((span.id.clone(), vec![(span.start, span.end)])),
		}
	}

	let mut out = String::new();
	for (i, (id, locations)) in groups.iter().enumerate() {
		if i != 0 {
			out.push('/');
		}
		let _ = write!(out, "{id}:");
		for (j, (start, end)) in locations.iter().enumerate() {
			if j != 0 {
				out.push(',');
			}
			let _ = write!(out, "{start}-{end}");
		}
	}
	out
}

/// Parse one raw line. Malformed lines yield `None` and are dropped;
/// nothing here is fatal to the stream.
pub fn parse_line(raw: &str) -> Option<ChatLine> {
	let mut rest = raw;
	if rest.is_empty() {
		return None;
	}

	let mut raw_tags = "";
	if let Some(stripped) = rest.strip_prefix('@') {
		let space = stripped.find(' ')?;
		raw_tags = &stripped[..space];
		rest = &stripped[space + 1..];
	}

	let mut raw_source = "";
	if let Some(stripped) = rest.strip_prefix(':') {
		let space = stripped.find(' ')?;
		raw_source = &stripped[..space];
		rest = &stripped[space + 1..];
	}

	let (raw_command, parameters) = match rest.find(':') {
		Some(idx) => (rest[..idx].trim(), &rest[idx + 1..]),
		None => (rest.trim(), ""),
	};

	let command_parts: Vec<&str> = raw_command.split(' ').filter(|p| !p.is_empty()).collect();
	let first = *command_parts.first()?;

	let (command, channel) = match first {
		"PING" | "GLOBALUSERSTATE" | "RECONNECT" | "CAP" => (first.to_string(), String::new()),
		"001" => ("LOGGED".to_string(), String::new()),
		"353" => ("USERLIST".to_string(), String::new()),
		"421" => (
			"UNSUPPORTED".to_string(),
			command_parts.get(2).copied().unwrap_or_default().to_string(),
		),
		other => (
			other.to_string(),
			command_parts.get(1).copied().unwrap_or_default().to_string(),
		),
	};

	let mut line = ChatLine {
		command,
		channel,
		parameters: parameters.to_string(),
		..ChatLine::default()
	};

	if !raw_tags.trim().is_empty() {
		parse_tags(raw_tags, &mut line);
	}

	if !raw_source.trim().is_empty() {
		match raw_source.split_once('!') {
			Some((nick, host)) => {
				line.nick = nick.to_string();
				line.host = host.to_string();
			}
			None => line.host = raw_source.to_string(),
		}
	}

	Some(line)
}

fn parse_tags(raw_tags: &str, line: &mut ChatLine) {
	for tag in raw_tags.split(';') {
		let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
		match key {
			"badges" | "badge-info" => {
				if value.trim().is_empty() {
					continue;
				}
				for pair in value.split(',') {
					let Some((badge, version)) = pair.split_once('/') else {
						continue;
					};
					if key == "badges" {
						line.badges.insert(badge.to_string(), version.to_string());
					} else {
						line.badge_info.insert(badge.to_string(), version.to_string());
					}
				}
			}
			"emotes" => {
				if value.trim().is_empty() {
					continue;
				}
				for group in value.split('/') {
					let Some((id, positions)) = group.split_once(':') else {
						continue;
					};
					for position in positions.split(',') {
						let Some((start, end)) = position.split_once('-') else {
							continue;
						};
						let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) else {
							continue;
						};
						line.insert_emote_span(EmoteSpan {
							id: id.to_string(),
							start,
							end,
						});
					}
				}
			}
			"emote-sets" => {
				line.emote_sets
					.extend(value.split(',').filter(|s| !s.is_empty()).map(str::to_string));
			}
			_ => {
				if !IGNORED_TAGS.contains(&key) {
					line.tags.insert(key.to_string(), value.to_string());
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sorted_insert_drops_overlapping_spans() {
		let mut line = ChatLine::default();
		line.insert_emote_span(EmoteSpan {
			id: "a".into(),
			start: 10,
			end: 14,
		});
		line.insert_emote_span(EmoteSpan {
			id: "b".into(),
			start: 0,
			end: 4,
		});
		line.insert_emote_span(EmoteSpan {
			id: "c".into(),
			start: 3,
			end: 11,
		});

		assert_eq!(line.emote_spans.len(), 2);
		assert_eq!(line.emote_spans[0].start, 0);
		assert_eq!(line.emote_spans[1].start, 10);
	}

	#[test]
	fn redacts_oauth_credentials_in_log_form() {
		let pass = ChatLine::outbound("PASS", "oauth:supersecrettoken", "");
		let logged = pass.serialize_for_log();
		assert!(!logged.contains("supersecrettoken"));
		assert!(logged.contains("oauth:*****"));
	}
}
