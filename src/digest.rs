//! Content digest used for responses.

use md5::{Digest, Md5};

/// Compute the lowercase hex MD5 digest of `data`.
pub fn digest(data: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(data.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST_HEX_LEN: usize = 32;

    #[test]
    fn test_known_values() {
        assert_eq!(digest("hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(digest(""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_fixed_length_and_deterministic() {
        let a = digest("some longer payload with spaces removed");
        assert_eq!(a.len(), DIGEST_HEX_LEN);
        assert_eq!(a, digest("some longer payload with spaces removed"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_digests_raw_bytes() {
        // MD5 over the bytes as given, no re-encoding.
        assert_eq!(digest(b"caf\xe9"), digest([0x63u8, 0x61, 0x66, 0xe9]));
        assert_ne!(digest(b"caf\xe9"), digest("caf\u{e9}"));
        assert_eq!(digest(b"hello".to_vec()), digest("hello"));
    }
}
