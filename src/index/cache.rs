use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// blake3 digest of a unit's full text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(blake3::Hash);

impl ContentHash {
	pub fn of(text: &str) -> Self {
		Self(blake3::hash(text.as_bytes()))
	}
}

#[derive(Debug)]
struct CacheEntry {
	hash: ContentHash,
	cached_at: Instant,
	/// Entities the unit contributed when it was cached.
	entities: Vec<String>,
}

/// Remembers which content each unit was last analyzed with.
///
/// An entry only answers "is this exactly what the graph already holds?";
/// a hash mismatch or an expired entry means the unit must be extracted again.
#[derive(Debug)]
pub struct FileCache {
	entries: HashMap<String, CacheEntry>,
	order: VecDeque<String>,
	capacity: usize,
	ttl: Duration,
}

impl FileCache {
	pub fn new(capacity: usize, ttl: Duration) -> Self {
		Self {
			entries: Default::default(),
			order: Default::default(),
			capacity: capacity.max(1),
			ttl,
		}
	}

	pub fn configure(&mut self, capacity: usize, ttl: Duration) {
		self.capacity = capacity.max(1);
		self.ttl = ttl;
		while self.entries.len() > self.capacity {
			self.evict_oldest();
		}
	}

	pub fn is_fresh(&self, path: &str, hash: &ContentHash) -> bool {
		self.entries
			.get(path)
			.is_some_and(|entry| entry.hash == *hash && entry.cached_at.elapsed() < self.ttl)
	}

	pub fn put(&mut self, path: String, hash: ContentHash, entities: Vec<String>) {
		if self.entries.contains_key(&path) {
			self.order.retain(|key| key != &path);
		} else if self.entries.len() >= self.capacity {
			self.evict_oldest();
		}
		self.order.push_back(path.clone());
		self.entries.insert(
			path,
			CacheEntry {
				hash,
				cached_at: Instant::now(),
				entities,
			},
		);
	}

	/// Returns whether an entry was present.
	pub fn evict(&mut self, path: &str) -> bool {
		if self.entries.remove(path).is_none() {
			return false;
		}
		self.order.retain(|key| key != path);
		true
	}

	pub fn entities(&self, path: &str) -> Option<&[String]> {
		self.entries.get(path).map(|entry| entry.entities.as_slice())
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn evict_oldest(&mut self) {
		if let Some(oldest) = self.order.pop_front() {
			self.entries.remove(&oldest);
		}
	}
}
