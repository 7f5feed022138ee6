//! Fixed-capacity, thread-safe LRU store with opportunistic zstd compression.
//!
//! The lock only guards the recency structure. Compression runs before the lock is taken and
//! decompression after it is released, so codec work never serializes unrelated cache traffic.

// std
use std::num::NonZeroUsize;
// crates.io
use lru::LruCache;
use parking_lot::Mutex;
// self
use crate::_prelude::*;

/// Value accepted and returned by a [`CacheStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheValue {
	/// UTF-8 text.
	Text(String),
	/// Raw bytes.
	Bytes(Vec<u8>),
}
impl CacheValue {
	/// Logical kind of the value.
	pub fn kind(&self) -> ValueKind {
		match self {
			Self::Text(_) => ValueKind::Text,
			Self::Bytes(_) => ValueKind::Bytes,
		}
	}

	/// Borrow the value as bytes regardless of kind.
	pub fn as_bytes(&self) -> &[u8] {
		match self {
			Self::Text(text) => text.as_bytes(),
			Self::Bytes(bytes) => bytes,
		}
	}

	/// Consume the value, returning bytes when it was stored as bytes.
	pub fn into_bytes(self) -> Option<Vec<u8>> {
		match self {
			Self::Bytes(bytes) => Some(bytes),
			Self::Text(_) => None,
		}
	}
}
impl From<String> for CacheValue {
	fn from(value: String) -> Self {
		Self::Text(value)
	}
}
impl From<&str> for CacheValue {
	fn from(value: &str) -> Self {
		Self::Text(value.to_owned())
	}
}
impl From<Vec<u8>> for CacheValue {
	fn from(value: Vec<u8>) -> Self {
		Self::Bytes(value)
	}
}

/// Identity of one stored value, as handed out by [`CacheStore::get_tagged`].
#[derive(Clone, Debug)]
pub struct EntryTag(Arc<[u8]>);

/// Logical kind remembered next to each stored value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
	/// Reconstructed as [`CacheValue::Text`].
	Text,
	/// Reconstructed as [`CacheValue::Bytes`].
	Bytes,
}

/// Storage details of one entry, read without touching recency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryInfo {
	/// Logical kind of the stored value.
	pub kind: ValueKind,
	/// Whether the value is held compressed.
	pub compressed: bool,
	/// Bytes held for the value.
	pub stored_len: usize,
}

/// Fixed-capacity least-recently-used store keyed by opaque strings.
#[derive(Debug)]
pub struct CacheStore {
	entries: Mutex<LruCache<String, StoredValue>>,
	capacity: NonZeroUsize,
	compression: Option<i32>,
}
impl CacheStore {
	/// Create a store holding at most `capacity` entries, without compression.
	pub fn new(capacity: usize) -> Result<Self> {
		Self::build(capacity, None)
	}

	/// Create a store that compresses values at the given zstd level when that saves space.
	pub fn with_compression(capacity: usize, level: i32) -> Result<Self> {
		if !zstd::compression_level_range().contains(&level) {
			return Err(Error::Validation {
				field: "cache.compression_level",
				reason: format!("Must be within {:?}.", zstd::compression_level_range()),
			});
		}

		Self::build(capacity, Some(level))
	}

	fn build(capacity: usize, compression: Option<i32>) -> Result<Self> {
		let capacity = NonZeroUsize::new(capacity).ok_or_else(|| Error::Validation {
			field: "cache.capacity",
			reason: "Must provide a positive size.".into(),
		})?;

		Ok(Self { entries: Mutex::new(LruCache::new(capacity)), capacity, compression })
	}

	/// Maximum number of entries.
	pub fn capacity(&self) -> usize {
		self.capacity.get()
	}

	/// Whether values are compressed opportunistically.
	pub fn compression_enabled(&self) -> bool {
		self.compression.is_some()
	}

	/// Current number of entries.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Whether the store is empty.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Insert or overwrite `key`, promoting it to most recently used.
	///
	/// Returns whether another entry was evicted to make room.
	pub fn add(&self, key: impl Into<String>, value: impl Into<CacheValue>) -> bool {
		let stored = self.prepare(value.into());
		let key = key.into();
		let mut entries = self.entries.lock();

		if let Some(existing) = entries.get_mut(&key) {
			*existing = stored;

			return false;
		}

		entries.push(key, stored).is_some()
	}

	/// Fetch `key`, promoting it to most recently used.
	///
	/// An entry that fails to decode is evicted and reported as a miss.
	pub fn get(&self, key: &str) -> Option<CacheValue> {
		self.get_tagged(key).map(|(value, _)| value)
	}

	/// Like [`Self::get`], also returning a tag for the exact stored value that was read.
	///
	/// Pass the tag to [`Self::remove_if_same`] to drop the entry only if nobody replaced it
	/// in the meantime.
	pub fn get_tagged(&self, key: &str) -> Option<(CacheValue, EntryTag)> {
		let stored = self.entries.lock().get(key).cloned()?;

		match self.realize(&stored) {
			Some(value) => Some((value, EntryTag(stored.data))),
			None => {
				tracing::warn!(key, "evicting undecodable cache entry");

				self.remove_if_same(key, &EntryTag(stored.data));

				None
			},
		}
	}

	/// Remove `key` only while it still holds the value `tag` was taken from.
	pub fn remove_if_same(&self, key: &str, tag: &EntryTag) -> bool {
		let mut entries = self.entries.lock();

		if entries.peek(key).is_some_and(|current| Arc::ptr_eq(&current.data, &tag.0)) {
			entries.pop(key);

			true
		} else {
			false
		}
	}

	/// Fetch `key` without changing its recency.
	pub fn peek(&self, key: &str) -> Option<CacheValue> {
		let stored = self.entries.lock().peek(key).cloned()?;

		self.realize(&stored)
	}

	/// Delete `key`, reporting whether it was present.
	pub fn remove(&self, key: &str) -> bool {
		self.entries.lock().pop(key).is_some()
	}

	/// All keys ordered from least to most recently used.
	pub fn keys(&self) -> Vec<String> {
		self.entries.lock().iter().rev().map(|(key, _)| key.clone()).collect()
	}

	/// Storage details for `key` without changing its recency.
	pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
		self.entries.lock().peek(key).map(|stored| EntryInfo {
			kind: stored.kind,
			compressed: stored.compressed,
			stored_len: stored.data.len(),
		})
	}

	/// Drop every entry.
	pub fn clear(&self) {
		self.entries.lock().clear();
	}

	fn prepare(&self, value: CacheValue) -> StoredValue {
		let kind = value.kind();
		let raw = match value {
			CacheValue::Text(text) => text.into_bytes(),
			CacheValue::Bytes(bytes) => bytes,
		};

		if let Some(level) = self.compression
			&& !raw.is_empty()
		{
			match zstd::encode_all(raw.as_slice(), level) {
				Ok(compressed) if compressed.len() < raw.len() =>
					return StoredValue { data: compressed.into(), kind, compressed: true },
				Ok(_) => {},
				Err(err) => tracing::debug!(error = %err, "compression failed; storing verbatim"),
			}
		}

		StoredValue { data: raw.into(), kind, compressed: false }
	}

	fn realize(&self, stored: &StoredValue) -> Option<CacheValue> {
		let raw = if stored.compressed {
			zstd::decode_all(&*stored.data).ok()?
		} else {
			stored.data.to_vec()
		};

		match stored.kind {
			ValueKind::Text => String::from_utf8(raw).ok().map(CacheValue::Text),
			ValueKind::Bytes => Some(CacheValue::Bytes(raw)),
		}
	}
}

#[derive(Clone, Debug)]
struct StoredValue {
	data: Arc<[u8]>,
	kind: ValueKind,
	compressed: bool,
}
