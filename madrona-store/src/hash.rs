use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use blake2::{Blake2b, Digest, digest::consts::U32};

/// Blake2b with a 256-bit output, the digest behind every content hash.
type Blake2b256 = Blake2b<U32>;

/// Computes the content hash that names a blob: base64url (without padding)
/// of blake2b-256 over the bytes.
///
/// The resulting string contains only `[A-Za-z0-9_-]`, so it is safe to use
/// directly as a file name or object key.
pub fn content_hash(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Blake2b256::digest(bytes))
}
