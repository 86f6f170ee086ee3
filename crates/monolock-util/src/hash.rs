/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Short, filesystem-safe digest of a string key.
///
/// Returns the first `len` hex characters of the BLAKE3 digest (at most 64).
#[must_use]
pub fn short_digest(key: &str, len: usize) -> String {
    let mut hex = blake3_bytes(key.as_bytes());
    hex.truncate(len.min(64));
    hex
}
