// src/assets/mod.rs

//! Asset copying and content hashing.
//!
//! - [`sync`] mirrors declared source files into the output tree.
//! - [`hash`] publishes hash-named aliases of output files and rewrites
//!   declared text files to reference them.

pub mod hash;
pub mod sync;

/// First 8 hex digits of the blake3 digest of `bytes`.
pub fn short_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().as_str()[..8].to_string()
}

/// `dir/name.ext` -> `name.<hash>.ext`.
///
/// Only the final path component is kept, and the hash goes before the
/// first dot, so `a.min.js` becomes `a.<hash>.min.js`.
pub fn as_hashed(path: &str, hash: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.find('.') {
        Some(dot) => format!("{}.{hash}{}", &name[..dot], &name[dot..]),
        None => format!("{name}.{hash}"),
    }
}

/// Round `ms` to the nearest multiple of `factor`.
pub fn quantize(ms: u64, factor: u64) -> u64 {
    if factor == 0 {
        return ms;
    }
    ((ms + factor / 2) / factor) * factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hash_is_stable_hex() {
        let h = short_hash(b"hello");
        assert_eq!(h.len(), 8);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, short_hash(b"hello"));
        assert_ne!(h, short_hash(b"hello!"));
    }

    #[test]
    fn as_hashed_inserts_before_first_dot() {
        assert_eq!(as_hashed("fonts/a.woff2", "1234abcd"), "a.1234abcd.woff2");
        assert_eq!(as_hashed("lib/x.min.js", "1234abcd"), "x.1234abcd.min.js");
        assert_eq!(as_hashed("LICENSE", "1234abcd"), "LICENSE.1234abcd");
    }

    #[test]
    fn quantize_tolerates_jitter() {
        assert_eq!(quantize(1_000_149, 300), quantize(1_000_100, 300));
        assert_eq!(quantize(449, 300), 300);
        assert_eq!(quantize(450, 300), 600);
        assert_eq!(quantize(0, 300), 0);
    }
}
