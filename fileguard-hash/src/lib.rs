//! Named, streaming cryptographic hashes.
//!
//! The core never hard-codes a single hash function; it depends on the
//! [`HashAlgorithm`] capability so the algorithm name can be persisted
//! alongside the digest and checked again on every verification.

#![warn(missing_docs)]

pub use self::sha256::Sha256;

pub mod testing;

mod sha256;

use std::io::{self, Read};

/// A streaming hash algorithm, named so its identity can be
/// persisted alongside the digest it produces.
///
/// Implementations must be deterministic and must not depend on anything
/// other than the bytes read from `reader`.
pub trait HashAlgorithm
{
    /// Lowercase ASCII name of the algorithm, e.g. `"sha256"`.
    ///
    /// This name is persisted as the prefix of every digest this
    /// algorithm produces (see [`prefixed`][`Self::prefixed`]), and is
    /// compared against on every verification to catch an algorithm
    /// mismatch before comparing digests.
    fn name(&self) -> &'static str;

    /// Compute the digest of an entire byte stream.
    ///
    /// Returns the digest as lowercase hexadecimal.
    fn sum(&self, reader: &mut dyn Read) -> io::Result<String>;

    /// Compute the digest of an in-memory buffer.
    fn sum_bytes(&self, bytes: &[u8]) -> String
    {
        // A buffer already in memory cannot fail to "read".
        self.sum(&mut &*bytes).expect("reading from a slice cannot fail")
    }

    /// Format a digest as the prefixed string persisted in a record,
    /// e.g. `"sha256:<hex>"`.
    fn prefixed(&self, digest: &str) -> String
    {
        format!("{}:{}", self.name(), digest)
    }
}

/// Render a byte slice as lowercase hexadecimal.
pub(crate) fn to_hex(bytes: &[u8]) -> String
{
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // write! to a String never fails.
        write!(out, "{:02x}", byte).unwrap();
    }
    out
}

/// Split a prefixed digest (`"<algo>:<hex>"`) into its two parts.
///
/// Returns [`None`] if there is no `:` separator.
pub fn split_prefixed(prefixed: &str) -> Option<(&str, &str)>
{
    prefixed.split_once(':')
}
