//! Cellsync Digest
//!
//! A self-contained SHA-1 implementation used to derive stable identifiers
//! for notebook cells. The kernel keys every cell by the digest of its
//! registration text, so this crate must agree bit-for-bit with the digests
//! the kernel already holds.
//!
//! # Text vs bytes
//!
//! [`digest_bytes`] is plain SHA-1 over the given bytes. [`digest_text`]
//! first runs the text through [`encode_text`], which folds CRLF to LF and
//! encodes characters outside the BMP as surrogate triples. For CR-free text
//! inside the BMP both functions agree.
//!
//! # Example
//!
//! ```
//! use cellsync_digest::{digest, digest_prefixed};
//!
//! assert_eq!(digest(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
//! assert_eq!(
//!     digest_prefixed("code", "print(1)").to_hex(),
//!     digest("codeprint(1)"),
//! );
//! ```

mod digest;
mod sha1;
mod text;

pub use digest::{Digest, DIGEST_LEN};
pub use sha1::Sha1;
pub use text::encode_text;

/// Hash raw bytes.
pub fn digest_bytes(data: &[u8]) -> Digest {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize()
}

/// Hash text after identity encoding (see [`encode_text`]).
pub fn digest_text(text: &str) -> Digest {
    digest_bytes(&encode_text(text))
}

/// Hash a prefixed text (e.g., `"code" + source`).
///
/// Same as hashing the concatenation, so a CR ending the prefix still
/// folds with an LF starting the text.
pub fn digest_prefixed(prefix: &str, text: &str) -> Digest {
    let mut joined = String::with_capacity(prefix.len() + text.len());
    joined.push_str(prefix);
    joined.push_str(text);
    digest_text(&joined)
}

/// Hash text and render it as 40 lowercase hex characters.
pub fn digest(text: &str) -> String {
    digest_text(text).to_hex()
}
