#![forbid(unsafe_code)]

mod catalog;

pub use catalog::{AssetCatalog, CatalogFetcher};

use std::collections::BTreeMap;
use std::sync::Arc;

/// Resolved badge media handed to the application.
pub type BadgeMedia = Arc<MediaAsset>;

/// UI theme a media variant targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
	Dark,
	Light,
}

impl Theme {
	pub fn opposite(self) -> Theme {
		match self {
			Theme::Dark => Theme::Light,
			Theme::Light => Theme::Dark,
		}
	}

	fn index(self) -> usize {
		match self {
			Theme::Dark => 0,
			Theme::Light => 1,
		}
	}
}

/// Still or animated image variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
	Static,
	Animated,
}

impl ImageFormat {
	fn index(self) -> usize {
		match self {
			ImageFormat::Static => 0,
			ImageFormat::Animated => 1,
		}
	}
}

/// Pixel-density scale of an image URL. Cheermotes additionally ship a
/// 1.5x variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scale {
	One,
	OneHalf,
	Two,
	Three,
	Four,
}

impl Scale {
	/// Highest scale first; the fallback search walks this order.
	pub const DESCENDING: [Scale; 5] = [Scale::Four, Scale::Three, Scale::Two, Scale::OneHalf, Scale::One];

	pub fn as_label(self) -> &'static str {
		match self {
			Scale::One => "1",
			Scale::OneHalf => "1.5",
			Scale::Two => "2",
			Scale::Three => "3",
			Scale::Four => "4",
		}
	}

	/// Parse the scale labels used across catalog responses
	/// (`"1"`, `"1.0"`, `"1.5"`, ...).
	pub fn from_label(label: &str) -> Option<Scale> {
		match label {
			"1" | "1.0" => Some(Scale::One),
			"1.5" => Some(Scale::OneHalf),
			"2" | "2.0" => Some(Scale::Two),
			"3" | "3.0" => Some(Scale::Three),
			"4" | "4.0" => Some(Scale::Four),
			_ => None,
		}
	}
}

/// One image chosen by the fallback search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage<'a> {
	pub url: &'a str,
	pub animated: bool,
}

/// Image URLs for one emote, badge or cheermote tier, indexed by
/// theme x format x scale. Sparse; populated from catalog responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaAsset {
	alt: String,
	urls: [[BTreeMap<Scale, String>; 2]; 2],
}

impl MediaAsset {
	pub fn new(alt: impl Into<String>) -> Self {
		Self {
			alt: alt.into(),
			urls: Default::default(),
		}
	}

	/// Alt text shown when no image variant exists.
	pub fn alt(&self) -> &str {
		&self.alt
	}

	pub fn set_url(&mut self, theme: Theme, format: ImageFormat, scale: Scale, url: impl Into<String>) {
		self.urls[theme.index()][format.index()].insert(scale, url.into());
	}

	pub fn url(&self, theme: Theme, format: ImageFormat, scale: Scale) -> Option<&str> {
		self.urls[theme.index()][format.index()].get(&scale).map(String::as_str)
	}

	/// Highest-scale URL available for a theme/format pair.
	pub fn best_url(&self, theme: Theme, format: ImageFormat) -> Option<&str> {
		let table = &self.urls[theme.index()][format.index()];
		Scale::DESCENDING.iter().find_map(|scale| table.get(scale)).map(String::as_str)
	}

	/// The ordered fallback search: primary theme animated, primary theme
	/// static, opposite theme animated, opposite theme static, each at
	/// descending scale. `None` means the caller falls back to alt text.
	pub fn resolve(&self, primary: Theme) -> Option<ResolvedImage<'_>> {
		for theme in [primary, primary.opposite()] {
			for format in [ImageFormat::Animated, ImageFormat::Static] {
				if let Some(url) = self.best_url(theme, format) {
					return Some(ResolvedImage {
						url,
						animated: format == ImageFormat::Animated,
					});
				}
			}
		}
		None
	}

	pub fn has_any_url(&self) -> bool {
		self.urls.iter().flatten().any(|table| !table.is_empty())
	}
}

/// One bit-threshold bracket of a cheermote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheermoteTier {
	pub threshold: u64,
	pub can_cheer: bool,
	pub image: MediaAsset,
}

/// A cheermote prefix with its tiers kept sorted ascending by threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cheermote {
	prefix: String,
	tiers: Vec<CheermoteTier>,
}

impl Cheermote {
	pub fn new(prefix: impl Into<String>) -> Self {
		Self {
			prefix: prefix.into(),
			tiers: Vec::new(),
		}
	}

	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	pub fn tiers(&self) -> &[CheermoteTier] {
		&self.tiers
	}

	/// Sorted insert by threshold.
	pub fn add_tier(&mut self, tier: CheermoteTier) {
		let idx = self.tiers.partition_point(|t| t.threshold <= tier.threshold);
		self.tiers.insert(idx, tier);
	}

	/// The highest-threshold cheer-enabled tier whose threshold does not
	/// exceed `bits`.
	pub fn tier_for(&self, bits: u64) -> Option<&CheermoteTier> {
		self.tiers
			.iter()
			.filter(|tier| tier.can_cheer && tier.threshold <= bits)
			.next_back()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn asset_with(urls: &[(Theme, ImageFormat, Scale, &str)]) -> MediaAsset {
		let mut asset = MediaAsset::new("Kappa");
		for (theme, format, scale, url) in urls {
			asset.set_url(*theme, *format, *scale, *url);
		}
		asset
	}

	#[test]
	fn resolve_prefers_primary_theme_animated_at_highest_scale() {
		let asset = asset_with(&[
			(Theme::Dark, ImageFormat::Animated, Scale::One, "dark-anim-1"),
			(Theme::Dark, ImageFormat::Animated, Scale::Three, "dark-anim-3"),
			(Theme::Dark, ImageFormat::Static, Scale::Four, "dark-static-4"),
			(Theme::Light, ImageFormat::Animated, Scale::Four, "light-anim-4"),
		]);

		let resolved = asset.resolve(Theme::Dark).expect("has urls");
		assert_eq!(resolved.url, "dark-anim-3");
		assert!(resolved.animated);
	}

	#[test]
	fn resolve_falls_through_format_then_theme() {
		// Only a light/static/2x URL exists; a dark-primary search must
		// traverse the full order and still land on it.
		let asset = asset_with(&[(Theme::Light, ImageFormat::Static, Scale::Two, "light-static-2")]);

		let resolved = asset.resolve(Theme::Dark).expect("has urls");
		assert_eq!(resolved.url, "light-static-2");
		assert!(!resolved.animated);
	}

	#[test]
	fn resolve_empty_asset_yields_none() {
		let asset = MediaAsset::new("FrankerZ");
		assert!(asset.resolve(Theme::Dark).is_none());
		assert_eq!(asset.alt(), "FrankerZ");
	}

	#[test]
	fn cheermote_tiers_stay_sorted_under_out_of_order_insert() {
		let mut cheermote = Cheermote::new("cheer");
		for threshold in [1000, 1, 100] {
			cheermote.add_tier(CheermoteTier {
				threshold,
				can_cheer: true,
				image: MediaAsset::new(format!("cheer{threshold}")),
			});
		}

		let thresholds: Vec<u64> = cheermote.tiers().iter().map(|t| t.threshold).collect();
		assert_eq!(thresholds, vec![1, 100, 1000]);
	}

	#[test]
	fn tier_selection_picks_highest_threshold_not_exceeding_amount() {
		let mut cheermote = Cheermote::new("cheer");
		for threshold in [1, 100, 1000] {
			cheermote.add_tier(CheermoteTier {
				threshold,
				can_cheer: true,
				image: MediaAsset::new(format!("t{threshold}")),
			});
		}

		assert_eq!(cheermote.tier_for(250).map(|t| t.image.alt()), Some("t100"));
		assert_eq!(cheermote.tier_for(1).map(|t| t.image.alt()), Some("t1"));
		assert!(cheermote.tier_for(0).is_none());
	}

	#[test]
	fn tier_selection_skips_cheer_disabled_tiers() {
		let mut cheermote = Cheermote::new("cheer");
		cheermote.add_tier(CheermoteTier {
			threshold: 1,
			can_cheer: true,
			image: MediaAsset::new("t1"),
		});
		cheermote.add_tier(CheermoteTier {
			threshold: 100,
			can_cheer: false,
			image: MediaAsset::new("t100"),
		});

		assert_eq!(cheermote.tier_for(500).map(|t| t.image.alt()), Some("t1"));
	}
}
