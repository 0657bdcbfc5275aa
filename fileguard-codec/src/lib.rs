//! Reversible encoding of absolute file paths into filenames.
//!
//! A record for a target path is addressed by a single filesystem-safe
//! path segment, never by a nested directory mirroring the target's own
//! directory structure — the whole point is to never let a (possibly
//! attacker-controlled) path dictate where we write under the hash
//! directory. [`encode`] is reversible for the overwhelming majority of
//! real paths; pathological inputs that would overflow the filename
//! length limit fall back to a content hash of the path itself
//! ([`is_fallback`]).

#![warn(missing_docs)]

use {
    base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD},
    sha2::{Digest, Sha256},
    thiserror::Error,
};

/// Encoded names longer than this switch to the fallback scheme.
///
/// 250 leaves headroom under the POSIX `NAME_MAX` of 255 (see
/// [`POSIX_NAME_MAX`]) for filesystems that append their own suffixes.
pub const MAX_FILENAME_LENGTH: usize = 250;

/// The POSIX filename length limit this codec stays under.
pub const POSIX_NAME_MAX: usize = 255;

/// Number of base64 characters kept from `SHA256(path)` in a fallback name.
const FALLBACK_PREFIX_LEN: usize = 12;

/// Suffix appended to every fallback-encoded name.
const FALLBACK_SUFFIX: &str = ".json";

/// Failures from encoding or decoding a path.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error
{
    /// The input was not an absolute, cleaned path.
    ///
    /// This covers empty strings, relative paths, and paths containing
    /// a `.`, `..`, or empty (`//`) segment.
    #[error("path is not absolute and clean: {0:?}")]
    InvalidPath(String),

    /// [`decode`] was called on a name produced by the fallback scheme.
    ///
    /// Fallback names are a one-way hash of the original path; there is
    /// no path to recover.
    #[error("fallback-encoded name cannot be decoded back to a path")]
    FallbackNotReversible,

    /// [`decode`] was called on a name that is not valid codec output.
    #[error("name is not a valid normal encoding: {0:?}")]
    Malformed(String),
}

/// Encode an absolute, cleaned path into a single filesystem-safe segment.
///
/// Returns [`Error::InvalidPath`] unless `path` is absolute and contains
/// no `.`, `..`, or empty segments.
pub fn encode(path: &str) -> Result<String, Error>
{
    validate(path)?;

    let mut normal = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '~' => normal.push_str("##"),
            '#' => normal.push_str("#1"),
            '/' => normal.push('~'),
            other => normal.push(other),
        }
    }

    if normal.len() <= MAX_FILENAME_LENGTH {
        Ok(normal)
    } else {
        Ok(fallback(path))
    }
}

/// Decode a name produced by [`encode`] back into the original path.
///
/// Returns [`Error::FallbackNotReversible`] if `name` is a fallback
/// encoding, and [`Error::Malformed`] if `name` is not valid codec
/// output at all (e.g. a dangling escape at the end of the string).
pub fn decode(name: &str) -> Result<String, Error>
{
    if is_fallback(name) {
        return Err(Error::FallbackNotReversible);
    }

    if !is_normal(name) {
        return Err(Error::Malformed(name.to_owned()));
    }

    let bytes = name.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'~' => {
                out.push('/');
                i += 1;
            },
            b'#' => {
                match bytes.get(i + 1) {
                    Some(b'#') => {
                        out.push('~');
                        i += 2;
                    },
                    Some(b'1') => {
                        out.push('#');
                        i += 2;
                    },
                    _ => return Err(Error::Malformed(name.to_owned())),
                }
            },
            _ => {
                // Advance by one UTF-8 scalar, not one byte.
                let rest = &name[i..];
                let ch = rest.chars().next().expect("i is a char boundary");
                out.push(ch);
                i += ch.len_utf8();
            },
        }
    }

    Ok(out)
}

/// Whether `name` is a normal (reversible) encoding.
///
/// A normal encoding always starts with `~`, since every absolute path
/// starts with `/` and every `/` is encoded as `~`.
pub fn is_normal(name: &str) -> bool
{
    name.starts_with('~')
}

/// Whether `name` is a fallback (non-reversible) encoding.
///
/// A fallback encoding ends in `.json` and never starts with `~`.
pub fn is_fallback(name: &str) -> bool
{
    !name.starts_with('~') && name.ends_with(FALLBACK_SUFFIX)
}

fn fallback(path: &str) -> String
{
    let digest = Sha256::digest(path.as_bytes());
    let encoded = URL_SAFE_NO_PAD.encode(digest);
    format!("{}{FALLBACK_SUFFIX}", &encoded[..FALLBACK_PREFIX_LEN])
}

fn validate(path: &str) -> Result<(), Error>
{
    if path.is_empty() || !path.starts_with('/') {
        return Err(Error::InvalidPath(path.to_owned()));
    }

    if path == "/" {
        return Ok(());
    }

    if path.ends_with('/') {
        return Err(Error::InvalidPath(path.to_owned()));
    }

    for segment in path[1..].split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::InvalidPath(path.to_owned()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn worked_examples_from_the_spec()
    {
        assert_eq!(encode("/usr/bin/python3").unwrap(), "~usr~bin~python3");
        assert_eq!(
            encode("/home/user#test/file").unwrap(),
            "~home~user#1test~file",
        );
        assert_eq!(
            encode("/home/~user/file").unwrap(),
            "~home~##user~file",
        );
        assert_eq!(encode("/").unwrap(), "~");
    }

    #[test]
    fn round_trip_for_normal_encodings()
    {
        for path in [
            "/usr/bin/python3",
            "/home/user#test/file",
            "/home/~user/file",
            "/",
            "/a/b/c/d/e",
            "/weird#~#~name",
        ] {
            let encoded = encode(path).unwrap();
            assert!(is_normal(&encoded));
            assert_eq!(decode(&encoded).unwrap(), path);
        }
    }

    #[test]
    fn classifier_is_exhaustive_and_exclusive()
    {
        let normal = encode("/usr/bin/python3").unwrap();
        assert!(is_normal(&normal));
        assert!(!is_fallback(&normal));

        let long_path = format!("/{}", "a".repeat(300));
        let long = encode(&long_path).unwrap();
        assert!(is_fallback(&long));
        assert!(!is_normal(&long));
    }

    #[test]
    fn boundary_at_250_and_251_encoded_characters()
    {
        // A path with no special characters encodes 1:1 in length
        // (every `/` becomes exactly one `~`), so we can size it exactly.
        let at_250 = format!("/{}", "a".repeat(249));
        assert_eq!(at_250.len(), 250);
        let encoded = encode(&at_250).unwrap();
        assert_eq!(encoded.len(), 250);
        assert!(is_normal(&encoded));

        let at_251 = format!("/{}", "a".repeat(250));
        assert_eq!(at_251.len(), 251);
        let encoded = encode(&at_251).unwrap();
        assert!(is_fallback(&encoded));
    }

    #[test]
    fn fallback_outputs_fit_under_name_max()
    {
        let path = format!("/{}", "a".repeat(250));
        let encoded = encode(&path).unwrap();
        assert!(encoded.len() <= POSIX_NAME_MAX);
        assert_eq!(encoded.len(), FALLBACK_PREFIX_LEN + FALLBACK_SUFFIX.len());
    }

    #[test]
    fn fallback_decode_is_refused()
    {
        let path = format!("/{}", "a".repeat(250));
        let encoded = encode(&path).unwrap();
        assert_eq!(decode(&encoded), Err(Error::FallbackNotReversible));
    }

    #[test]
    fn deterministic()
    {
        let path = "/etc/important-config.toml";
        assert_eq!(encode(path).unwrap(), encode(path).unwrap());
    }

    #[test]
    fn distinct_inputs_produce_distinct_normal_encodings()
    {
        let a = encode("/a/b").unwrap();
        let b = encode("/a#b").unwrap();
        let c = encode("/a~b").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn empty_path_is_invalid()
    {
        assert_eq!(encode(""), Err(Error::InvalidPath(String::new())));
    }

    #[test]
    fn relative_and_dotted_paths_are_invalid()
    {
        assert!(encode("relative/path").is_err());
        assert!(encode("/a/./b").is_err());
        assert!(encode("/a/../b").is_err());
        assert!(encode("/a//b").is_err());
    }
}
