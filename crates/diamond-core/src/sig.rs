//! 128-bit content signatures.
//!
//! A [`Sig128`] is the sole identity for filters and attribute values in the
//! core: two signatures compare equal iff their underlying bytes are equal.
//! Signatures are computed either over an arbitrary byte buffer, or over the
//! tuple `(library name, filter name, ordered args, optional blob)` that
//! identifies a compiled filter.

use std::fmt;

/// Opaque 16-byte content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Sig128([u8; 16]);

impl Sig128 {
    /// The all-zero signature, used as a sentinel for "no input attributes".
    pub const ZERO: Self = Self([0u8; 16]);

    /// Digest an arbitrary byte buffer.
    #[must_use]
    pub fn of_bytes(buf: &[u8]) -> Self {
        let hash = blake3::hash(buf);
        let mut out = [0u8; 16];
        out.copy_from_slice(&hash.as_bytes()[..16]);
        Self(out)
    }

    /// Digest the `(library, filter, args, blob)` tuple that identifies a
    /// compiled filter. Argument order is significant; `blob` is optional
    /// (filters with no attached binary blob hash as if it were absent,
    /// not as an empty slice, so `None` and `Some(&[])` differ).
    #[must_use]
    pub fn of_tuple<A: AsRef<[u8]>>(
        library: &str,
        filter: &str,
        args: &[A],
        blob: Option<&[u8]>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(library.len() as u64).to_le_bytes());
        hasher.update(library.as_bytes());
        hasher.update(&(filter.len() as u64).to_le_bytes());
        hasher.update(filter.as_bytes());
        hasher.update(&(args.len() as u64).to_le_bytes());
        for arg in args {
            let bytes = arg.as_ref();
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        match blob {
            Some(b) => {
                hasher.update(&[1u8]);
                hasher.update(&(b.len() as u64).to_le_bytes());
                hasher.update(b);
            }
            None => hasher.update(&[0u8]),
        };
        let hash = hasher.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&hash.as_bytes()[..16]);
        Self(out)
    }

    /// Raw bytes, e.g. for directory-name encoding (`hex(fsig)`).
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex encoding, used for on-disk directory/file names.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex-encoded signature, e.g. when rebuilding `fsig` from a
    /// directory name on reload.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for Sig128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig128({})", self.to_hex())
    }
}

impl fmt::Display for Sig128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_bytes_equal_signature() {
        let a = Sig128::of_bytes(b"hello world");
        let b = Sig128::of_bytes(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn differing_bytes_differ() {
        let a = Sig128::of_bytes(b"hello world");
        let b = Sig128::of_bytes(b"hello worlds");
        assert_ne!(a, b);
    }

    #[test]
    fn tuple_arg_order_significant() {
        let a = Sig128::of_tuple("lib", "f", &["a", "b"], None);
        let b = Sig128::of_tuple("lib", "f", &["b", "a"], None);
        assert_ne!(a, b);
    }

    #[test]
    fn tuple_blob_presence_significant() {
        let a: Sig128 = Sig128::of_tuple("lib", "f", &["a"] as &[&str], None);
        let b = Sig128::of_tuple("lib", "f", &["a"], Some(&[]));
        assert_ne!(a, b);
    }

    #[test]
    fn hex_round_trip() {
        let sig = Sig128::of_bytes(b"round trip me");
        let hex = sig.to_hex();
        assert_eq!(Sig128::from_hex(&hex), Some(sig));
    }

    proptest::proptest! {
        #[test]
        fn sig_cal_round_trip_law(a: Vec<u8>, b: Vec<u8>) {
            let sig_a = Sig128::of_bytes(&a);
            let sig_b = Sig128::of_bytes(&b);
            proptest::prop_assert_eq!(sig_a == sig_b, a == b);
        }
    }
}
