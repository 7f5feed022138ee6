//! Response cache: LRU store, key derivation, entry encoding, and request policy.

pub mod entry;
pub mod key;
pub mod manager;
pub mod policy;
pub mod store;
