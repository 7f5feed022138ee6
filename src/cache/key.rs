//! Cache key derivation.
//!
//! Keys bind the request URL to the *entire* credential secret, never to the user id embedded in
//! it: anyone who knows an id could otherwise forge a secret with that prefix and read another
//! user's cached responses.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Separator placed between the URL and the secret before hashing.
pub const KEY_SEPARATOR: char = ':';

/// 32-bit FNV-1 hash.
pub fn fnv1_32(data: &[u8]) -> u32 {
	data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| hash.wrapping_mul(FNV_PRIME) ^ u32::from(*byte))
}

/// Derive the cache key for `url` requested with `secret`, rendered as lowercase hex.
pub fn cache_key(url: &str, secret: &str) -> String {
	let mut material = String::with_capacity(url.len() + secret.len() + 1);

	material.push_str(url);
	material.push(KEY_SEPARATOR);
	material.push_str(secret);

	format!("{:x}", fnv1_32(material.as_bytes()))
}
