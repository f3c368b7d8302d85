#![forbid(unsafe_code)]

use glint_domain::{Fragment, RichText};
use glint_protocol::message::EmoteSpan;

use crate::assets::{AssetCatalog, Cheermote, MediaAsset, Theme};

/// Colors assigned to users without an explicit color tag.
pub const CHAT_COLOR_PALETTE: [&str; 15] = [
	"#ff0000", "#00ff00", "#0000ff", "#b22222", "#ff7f50", "#9acd32", "#ff4500", "#2e8b57", "#daa520", "#d2691e",
	"#5f9ea0", "#1e90ff", "#ff69b4", "#8a2be2", "#00ff7f",
];

/// The display color for a user: the explicit tag when present,
/// otherwise a deterministic pick from the fixed palette.
pub fn user_color(username: &str, explicit: Option<&str>) -> String {
	if let Some(color) = explicit
		&& !color.is_empty()
	{
		return color.to_string();
	}

	let sum: usize = username.chars().map(|c| c as usize).sum();
	CHAT_COLOR_PALETTE[sum % CHAT_COLOR_PALETTE.len()].to_string()
}

/// Convert typed fragments into an ordered text/image sequence,
/// resolving emotes and cheermote tiers through the catalog.
pub async fn render(fragments: &[Fragment], theme: Theme, catalog: &AssetCatalog) -> RichText {
	let mut out = RichText::new();

	for fragment in fragments {
		match fragment {
			Fragment::Text { text } => out.push_text(text),
			Fragment::Mention { user_name, .. } => out.push_text(format!("@{user_name}")),
			Fragment::Emote { id, emote_set_id, text } => match catalog.emote(id, emote_set_id.as_deref()).await {
				Some(asset) => push_asset(&mut out, &asset, theme),
				None => out.push_text(text),
			},
			Fragment::Cheermote { prefix, bits, text } => {
				let cheermotes = catalog.cheermotes().await;
				let tier = cheermotes
					.iter()
					.find(|c| c.prefix().eq_ignore_ascii_case(prefix))
					.and_then(|c| c.tier_for(*bits));
				match tier {
					Some(tier) => push_asset(&mut out, &tier.image, theme),
					None => out.push_text(text),
				}
			}
		}
	}

	out
}

/// Append an asset through the image fallback search, or its alt text
/// when no variant exists.
fn push_asset(out: &mut RichText, asset: &MediaAsset, theme: Theme) {
	match asset.resolve(theme) {
		Some(image) => out.push_image(image.url, image.animated, asset.alt()),
		None => out.push_text(asset.alt()),
	}
}

/// Slice a chat line's trailing text into fragments around its emote
/// spans (character offsets). When `cheermotes` is given, text runs are
/// additionally scanned for word-initial `Prefix<amount>` cheers.
pub fn chat_line_fragments(text: &str, spans: &[EmoteSpan], cheermotes: Option<&[Cheermote]>) -> Vec<Fragment> {
	let chars: Vec<char> = text.chars().collect();
	let mut fragments = Vec::new();
	let mut last = 0usize;

	for span in spans {
		if span.start >= chars.len() || span.end >= chars.len() || span.start < last {
			continue;
		}
		push_text_fragments(&mut fragments, &chars[last..span.start], cheermotes);
		fragments.push(Fragment::Emote {
			id: span.id.clone(),
			emote_set_id: None,
			text: chars[span.start..=span.end].iter().collect(),
		});
		last = span.end + 1;
	}

	if last < chars.len() {
		push_text_fragments(&mut fragments, &chars[last..], cheermotes);
	}

	fragments
}

fn push_text_fragments(fragments: &mut Vec<Fragment>, chars: &[char], cheermotes: Option<&[Cheermote]>) {
	if chars.is_empty() {
		return;
	}

	let Some(cheermotes) = cheermotes else {
		fragments.push(Fragment::Text {
			text: chars.iter().collect(),
		});
		return;
	};

	let mut run = String::new();
	let mut i = 0usize;
	while i < chars.len() {
		let at_word_start = i == 0 || chars[i - 1].is_whitespace();
		if at_word_start
			&& let Some((next, prefix, bits, matched)) = match_cheermote(chars, i, cheermotes)
		{
			if !run.is_empty() {
				fragments.push(Fragment::Text { text: std::mem::take(&mut run) });
			}
			fragments.push(Fragment::Cheermote {
				prefix,
				bits,
				text: matched,
			});
			i = next;
			continue;
		}
		run.push(chars[i]);
		i += 1;
	}

	if !run.is_empty() {
		fragments.push(Fragment::Text { text: run });
	}
}

/// Match `Prefix<digits>` at `idx` followed by whitespace or end of
/// text, for any known cheermote prefix (case-insensitive). Returns the
/// index past the match, the canonical prefix, the amount and the
/// matched literal.
fn match_cheermote(chars: &[char], idx: usize, cheermotes: &[Cheermote]) -> Option<(usize, String, u64, String)> {
	for cheermote in cheermotes {
		let prefix: Vec<char> = cheermote.prefix().chars().collect();
		let end = idx + prefix.len();
		if end > chars.len() {
			continue;
		}
		let matches = chars[idx..end]
			.iter()
			.zip(&prefix)
			.all(|(a, b)| a.eq_ignore_ascii_case(b));
		if !matches {
			continue;
		}

		let mut i = end;
		let mut bits: u64 = 0;
		while i < chars.len() && chars[i].is_ascii_digit() {
			bits = bits * 10 + (chars[i] as u64 - '0' as u64);
			i += 1;
		}

		if i == end || bits == 0 {
			continue;
		}
		if i != chars.len() && !chars[i].is_whitespace() {
			continue;
		}

		return Some((i, cheermote.prefix().to_string(), bits, chars[idx..i].iter().collect()));
	}
	None
}
