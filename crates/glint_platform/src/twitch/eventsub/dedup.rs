#![forbid(unsafe_code)]

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Observed upstream redelivery window; ten ids cover a handover overlap
/// comfortably.
pub const DEFAULT_DEDUP_CAPACITY: usize = 10;

/// Bounded FIFO set of recently seen event ids, shared by every session
/// under one supervisor. One lock; this is what makes handover safe
/// against double-delivery.
pub struct DedupBuffer {
	capacity: usize,
	seen: Mutex<VecDeque<String>>,
}

impl DedupBuffer {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			seen: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
		}
	}

	/// Record an id. Returns `true` when this is its first sighting
	/// within the capacity window.
	pub fn insert(&self, id: &str) -> bool {
		let mut seen = self.seen.lock();
		if seen.iter().any(|s| s == id) {
			metrics::counter!("eventsub_duplicates_dropped_total").increment(1);
			return false;
		}
		seen.push_back(id.to_string());
		while seen.len() > self.capacity {
			seen.pop_front();
		}
		true
	}

	pub fn len(&self) -> usize {
		self.seen.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.seen.lock().is_empty()
	}
}

impl Default for DedupBuffer {
	fn default() -> Self {
		Self::new(DEFAULT_DEDUP_CAPACITY)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_sighting_is_new_repeat_is_not() {
		let buffer = DedupBuffer::new(10);
		assert!(buffer.insert("E1"));
		assert!(!buffer.insert("E1"));
		assert!(buffer.insert("E2"));
		assert!(!buffer.insert("E1"));
	}

	#[test]
	fn never_holds_more_than_capacity() {
		let buffer = DedupBuffer::new(3);
		for i in 0..10 {
			assert!(buffer.insert(&format!("id-{i}")));
			assert!(buffer.len() <= 3);
		}
	}

	#[test]
	fn oldest_entry_is_evicted_first() {
		let buffer = DedupBuffer::new(2);
		assert!(buffer.insert("a"));
		assert!(buffer.insert("b"));
		assert!(buffer.insert("c"));
		// "a" fell out of the window and counts as new again.
		assert!(buffer.insert("a"));
		// "c" is still inside the window.
		assert!(!buffer.insert("c"));
	}
}
