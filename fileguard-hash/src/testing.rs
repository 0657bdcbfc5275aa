//! Test doubles for [`HashAlgorithm`][`crate::HashAlgorithm`].
//!
//! These live next to the production implementation, not behind a
//! `#[cfg(test)]` wall, so that `fileguard-core`'s own test suite can
//! depend on this crate as a normal (dev-)dependency and exercise
//! collision handling and algorithm-mismatch detection without having
//! to find two real inputs that collide under SHA-256.

use {
    crate::HashAlgorithm,
    std::io::{self, Read},
};

/// A hash algorithm that returns the same digest for every input.
///
/// Useful for deliberately forcing a [`HashCollision`]-style code path:
/// two distinct files hashed with `ConstantHash` always compare equal.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConstantHash;

impl HashAlgorithm for ConstantHash
{
    fn name(&self) -> &'static str
    {
        "constant-test-hash"
    }

    fn sum(&self, reader: &mut dyn Read) -> io::Result<String>
    {
        // Still drain the reader so callers that pass a real descriptor
        // behave as if a genuine hash had been computed.
        io::copy(reader, &mut io::sink())?;
        Ok("0".repeat(64))
    }
}

/// A hash algorithm that reports one name but computes digests with
/// another.
///
/// Used to exercise algorithm-mismatch detection: a record stored under
/// `outer.name()` whose digest was actually produced by `inner` should
/// still be rejected if re-verified with a plain `inner`, since the
/// persisted algorithm name no longer matches what actually ran.
pub struct Renamed<H>
{
    inner: H,
    name: &'static str,
}

impl<H> Renamed<H>
{
    /// Wrap `inner`, reporting `name` instead of `inner.name()`.
    pub fn new(inner: H, name: &'static str) -> Self
    {
        Self { inner, name }
    }
}

impl<H: HashAlgorithm> HashAlgorithm for Renamed<H>
{
    fn name(&self) -> &'static str
    {
        self.name
    }

    fn sum(&self, reader: &mut dyn Read) -> io::Result<String>
    {
        self.inner.sum(reader)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn constant_hash_collides_by_construction()
    {
        let a = ConstantHash.sum_bytes(b"alpha");
        let b = ConstantHash.sum_bytes(b"completely different content");
        assert_eq!(a, b);
    }

    #[test]
    fn renamed_reports_the_overridden_name()
    {
        let renamed = Renamed::new(crate::Sha256, "sha256-but-not-really");
        assert_eq!(renamed.name(), "sha256-but-not-really");
        assert_eq!(renamed.sum_bytes(b"x"), crate::Sha256.sum_bytes(b"x"));
    }
}
