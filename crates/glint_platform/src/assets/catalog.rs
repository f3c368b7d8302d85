#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glint_domain::ChannelId;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Cheermote, MediaAsset};

/// Source of catalog data, implemented by the Helix collaborator.
#[async_trait::async_trait]
pub trait CatalogFetcher: Send + Sync {
	/// All emotes of one emote set: `(emote_id, asset)`.
	async fn fetch_emote_set(&self, set_id: &str) -> anyhow::Result<Vec<(String, MediaAsset)>>;

	/// Global plus channel badges: `((set_id, version), asset)`.
	async fn fetch_badges(&self, channel_id: &ChannelId) -> anyhow::Result<Vec<((String, String), MediaAsset)>>;

	/// Cheermotes available in the channel.
	async fn fetch_cheermotes(&self, channel_id: &ChannelId) -> anyhow::Result<Vec<Cheermote>>;
}

/// Process-lifetime cache of emote/badge/cheermote media, populated
/// lazily from catalog responses. Lookup misses fetch, populate, then
/// retry the lookup; nothing is evicted except through [`reset`].
///
/// [`reset`]: AssetCatalog::reset
pub struct AssetCatalog {
	fetcher: Arc<dyn CatalogFetcher>,
	channel_id: ChannelId,
	emotes: Mutex<HashMap<String, Arc<MediaAsset>>>,
	badges: Mutex<HashMap<(String, String), Arc<MediaAsset>>>,
	badges_loaded: Mutex<bool>,
	cheermotes: Mutex<Option<Arc<Vec<Cheermote>>>>,
	warmed_sets: Mutex<HashSet<String>>,
}

impl AssetCatalog {
	pub fn new(fetcher: Arc<dyn CatalogFetcher>, channel_id: ChannelId) -> Self {
		Self {
			fetcher,
			channel_id,
			emotes: Mutex::new(HashMap::new()),
			badges: Mutex::new(HashMap::new()),
			badges_loaded: Mutex::new(false),
			cheermotes: Mutex::new(None),
			warmed_sets: Mutex::new(HashSet::new()),
		}
	}

	/// Look up an emote. A miss with a known set id warms that set and
	/// retries; emotes outside any warmed set stay unresolved.
	pub async fn emote(&self, id: &str, set_id: Option<&str>) -> Option<Arc<MediaAsset>> {
		if let Some(asset) = self.emotes.lock().get(id) {
			return Some(asset.clone());
		}

		let set_id = set_id?;
		self.warm_emote_set(set_id).await;
		self.emotes.lock().get(id).cloned()
	}

	/// Fetch and cache one emote set; repeated warms of the same set are
	/// no-ops for the catalog's lifetime.
	pub async fn warm_emote_set(&self, set_id: &str) {
		if !self.warmed_sets.lock().insert(set_id.to_string()) {
			return;
		}

		match self.fetcher.fetch_emote_set(set_id).await {
			Ok(entries) => {
				debug!(set_id, count = entries.len(), "warmed emote set");
				let mut emotes = self.emotes.lock();
				for (id, asset) in entries {
					emotes.insert(id, Arc::new(asset));
				}
			}
			Err(e) => {
				// Allow a later retry instead of pinning the failure.
				self.warmed_sets.lock().remove(set_id);
				warn!(set_id, error = %e, "emote set fetch failed");
			}
		}
	}

	/// Look up a badge by set and version, loading the channel's badge
	/// catalog on first miss.
	pub async fn badge(&self, set_id: &str, version: &str) -> Option<Arc<MediaAsset>> {
		let key = (set_id.to_string(), version.to_string());
		if let Some(asset) = self.badges.lock().get(&key) {
			return Some(asset.clone());
		}

		if *self.badges_loaded.lock() {
			return None;
		}

		match self.fetcher.fetch_badges(&self.channel_id).await {
			Ok(entries) => {
				let mut badges = self.badges.lock();
				for (entry_key, asset) in entries {
					badges.insert(entry_key, Arc::new(asset));
				}
				*self.badges_loaded.lock() = true;
				badges.get(&key).cloned()
			}
			Err(e) => {
				warn!(error = %e, "badge catalog fetch failed");
				None
			}
		}
	}

	/// The channel's cheermotes, fetched once.
	pub async fn cheermotes(&self) -> Arc<Vec<Cheermote>> {
		if let Some(list) = self.cheermotes.lock().as_ref() {
			return list.clone();
		}

		match self.fetcher.fetch_cheermotes(&self.channel_id).await {
			Ok(list) => {
				let list = Arc::new(list);
				*self.cheermotes.lock() = Some(list.clone());
				list
			}
			Err(e) => {
				warn!(error = %e, "cheermote catalog fetch failed");
				Arc::new(Vec::new())
			}
		}
	}

	/// Drop every cached entry; the next lookups re-fetch.
	pub fn reset(&self) {
		self.emotes.lock().clear();
		self.badges.lock().clear();
		*self.badges_loaded.lock() = false;
		*self.cheermotes.lock() = None;
		self.warmed_sets.lock().clear();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::assets::{ImageFormat, Scale, Theme};

	struct CountingFetcher {
		emote_set_calls: AtomicUsize,
		badge_calls: AtomicUsize,
		cheermote_calls: AtomicUsize,
	}

	impl CountingFetcher {
		fn new() -> Arc<Self> {
			Arc::new(Self {
				emote_set_calls: AtomicUsize::new(0),
				badge_calls: AtomicUsize::new(0),
				cheermote_calls: AtomicUsize::new(0),
			})
		}
	}

	#[async_trait::async_trait]
	impl CatalogFetcher for CountingFetcher {
		async fn fetch_emote_set(&self, set_id: &str) -> anyhow::Result<Vec<(String, MediaAsset)>> {
			self.emote_set_calls.fetch_add(1, Ordering::SeqCst);
			let mut asset = MediaAsset::new("Kappa");
			asset.set_url(Theme::Dark, ImageFormat::Static, Scale::One, format!("https://cdn/{set_id}/25/1"));
			Ok(vec![("25".to_string(), asset)])
		}

		async fn fetch_badges(&self, _channel_id: &ChannelId) -> anyhow::Result<Vec<((String, String), MediaAsset)>> {
			self.badge_calls.fetch_add(1, Ordering::SeqCst);
			Ok(vec![(
				("moderator".to_string(), "1".to_string()),
				MediaAsset::new("Moderator"),
			)])
		}

		async fn fetch_cheermotes(&self, _channel_id: &ChannelId) -> anyhow::Result<Vec<Cheermote>> {
			self.cheermote_calls.fetch_add(1, Ordering::SeqCst);
			Ok(vec![Cheermote::new("cheer")])
		}
	}

	fn catalog(fetcher: Arc<CountingFetcher>) -> AssetCatalog {
		AssetCatalog::new(fetcher, ChannelId::new("123").unwrap())
	}

	#[tokio::test]
	async fn emote_miss_warms_set_then_retries_lookup() {
		let fetcher = CountingFetcher::new();
		let catalog = catalog(fetcher.clone());

		let asset = catalog.emote("25", Some("0")).await.expect("resolved after warm");
		assert_eq!(asset.alt(), "Kappa");
		assert_eq!(fetcher.emote_set_calls.load(Ordering::SeqCst), 1);

		// Second lookup is a pure cache hit.
		let _ = catalog.emote("25", Some("0")).await.expect("cached");
		assert_eq!(fetcher.emote_set_calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn emote_miss_without_set_id_stays_unresolved() {
		let fetcher = CountingFetcher::new();
		let catalog = catalog(fetcher.clone());

		assert!(catalog.emote("999", None).await.is_none());
		assert_eq!(fetcher.emote_set_calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn badge_catalog_is_fetched_once_even_for_unknown_versions() {
		let fetcher = CountingFetcher::new();
		let catalog = catalog(fetcher.clone());

		assert!(catalog.badge("moderator", "1").await.is_some());
		assert!(catalog.badge("subscriber", "12").await.is_none());
		assert!(catalog.badge("subscriber", "24").await.is_none());
		assert_eq!(fetcher.badge_calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn reset_forces_refetch() {
		let fetcher = CountingFetcher::new();
		let catalog = catalog(fetcher.clone());

		let _ = catalog.cheermotes().await;
		let _ = catalog.cheermotes().await;
		assert_eq!(fetcher.cheermote_calls.load(Ordering::SeqCst), 1);

		catalog.reset();
		let _ = catalog.cheermotes().await;
		assert_eq!(fetcher.cheermote_calls.load(Ordering::SeqCst), 2);
	}
}
