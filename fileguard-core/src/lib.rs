//! Orchestrates [`fileguard_io`], [`fileguard_codec`] (via
//! [`fileguard_store`]), [`fileguard_hash`], and [`fileguard_privilege`]
//! into a [`Validator`] exposing [`record`][`Validator::record`],
//! [`verify`][`Validator::verify`], and
//! [`verify_and_read`][`Validator::verify_and_read`] with atomic,
//! time-of-check-to-time-of-use-safe semantics.
//!
//! The only load-bearing trick in this crate is
//! [`verify_and_read`][`Validator::verify_and_read`]: it opens the file
//! once, reads its bytes once, hashes those bytes, compares the digest
//! against the recorded one, and returns the very same buffer. There is
//! no second open and no second read, so the bytes a caller receives are
//! provably the ones that were just checked against the record.

#![warn(missing_docs)]

pub use {
    fileguard_hash::{HashAlgorithm, Sha256},
    fileguard_privilege::PrivilegeBridge,
    fileguard_store::{CodecNamer, Namer},
};

use {
    fileguard_store::Store,
    std::{io, path::{Path, PathBuf}},
    thiserror::Error,
};

/// Caps the validator enforces while reading a target file.
///
/// The core takes these as an explicit constructor argument rather than
/// reading them from a configuration file itself; a caller wiring this
/// into a larger TOML-configured system (out of scope here) can
/// override the default without this crate depending on a
/// config-parsing crate.
#[derive(Clone, Copy, Debug)]
pub struct Limits
{
    /// Maximum size, in bytes, of a file this validator will hash or
    /// read. Enforced from the post-open `fstat`, and re-checked against
    /// bytes actually read in case the file grows after that check.
    pub max_file_size: u64,
}

impl Default for Limits
{
    fn default() -> Self
    {
        Self { max_file_size: fileguard_io::DEFAULT_MAX_FILE_SIZE }
    }
}

/// Failures surfaced by the validator.
///
/// These are the C6 names from the component design; some wrap a
/// differently-named error from a lower layer (e.g. a lower-layer
/// `RecordNotFound` becomes [`Error::HashFileNotFound`] here) because
/// the validator's public vocabulary is what an embedding caller is
/// expected to match against.
#[derive(Debug, Error)]
pub enum Error
{
    /// The path was empty, relative, or could not be resolved to a
    /// valid string.
    #[error("path is empty or not absolute: {0:?}")]
    InvalidPath(String),

    /// The target file does not exist.
    #[error("{0:?} not found")]
    NotFound(PathBuf),

    /// The final path component is a symbolic link.
    #[error("{0:?} refers to a symbolic link, refusing to follow it")]
    IsSymlink(PathBuf),

    /// The target is not a regular file.
    #[error("{0:?} is not a regular file")]
    NotRegular(PathBuf),

    /// The target exceeds the configured [`Limits::max_file_size`].
    #[error("{0:?} exceeds the maximum allowed size")]
    TooLarge(PathBuf),

    /// A genuine permission failure that privilege elevation did not
    /// (or could not) resolve.
    #[error("permission denied opening {0:?}")]
    PermissionDenied(PathBuf),

    /// `Verify`/`VerifyAndRead` found no record for this target.
    #[error("no hash record exists for {0:?}")]
    HashFileNotFound(PathBuf),

    /// `Record` was called with `force=false` and a valid record for
    /// this target already exists.
    #[error("a hash record already exists at {0:?}")]
    HashFileExists(PathBuf),

    /// Two distinct target paths encode to the same record file name.
    ///
    /// Surfaced whenever a loaded record's `file_path` does not equal
    /// the path used to look it up.
    #[error(
        "hash record {record_path:?} names {recorded:?}, \
         not the path looked up ({requested:?}); codec collision"
    )]
    HashCollision
    {
        /// The record file path both targets collided on.
        record_path: PathBuf,
        /// The path that was actually being verified or recorded.
        requested: String,
        /// The path the record on disk claims to describe.
        recorded: String,
    },

    /// The record's prefixed digest names a different algorithm than
    /// the one this validator is configured to verify with.
    #[error(
        "hash record {path:?} was written with algorithm {recorded:?}, \
         this validator verifies with {actual:?}"
    )]
    AlgorithmMismatch
    {
        /// The record file's path.
        path: PathBuf,
        /// The algorithm name found in the record.
        recorded: String,
        /// The algorithm name this validator actually used.
        actual: &'static str,
    },

    /// The file's current content does not hash to the recorded digest.
    #[error("{path:?} does not match its recorded hash")]
    Mismatch
    {
        /// The target file's path.
        path: PathBuf,
        /// The digest recorded for this target.
        expected: String,
        /// The digest just computed from the file's current content.
        actual: String,
    },

    /// The record's schema version is not one this validator understands.
    #[error("schema version mismatch for {path:?}: expected {expected}, found {actual}")]
    SchemaVersionMismatch
    {
        /// The record file's path.
        path: PathBuf,
        /// The version this validator writes and expects to read.
        expected: u32,
        /// The version actually found on disk.
        actual: u32,
    },

    /// The record file exists but is not valid JSON / not a valid record.
    #[error("hash record {0:?} is corrupted")]
    RecordCorrupted(PathBuf),

    /// A privileged variant was called with no privilege bridge
    /// available, after the ambient-identity open failed with
    /// permission denied.
    #[error("no privilege bridge is available to retry this open")]
    PrivilegeManagerNotAvailable,

    /// A privilege bridge was supplied but reports it cannot actually
    /// elevate privilege in this process.
    #[error("privileged execution is not supported in this process")]
    PrivilegedExecutionNotSupported,

    /// The privilege bridge failed to assume or restore the elevated
    /// identity.
    #[error("privileged execution failed: {0}")]
    PrivilegedExecutionFailed(#[source] fileguard_privilege::Error),

    /// Any residual I/O failure not covered by a more specific variant.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Orchestrates the core's components into the public validation API.
///
/// `H` is the hash algorithm (always [`Sha256`] in production; test
/// doubles from [`fileguard_hash::testing`] can be substituted). `N` is
/// the record-naming strategy (always [`CodecNamer`] in production; see
/// [`fileguard_store::testing`] for the collision-forcing double).
pub struct Validator<H = Sha256, N = CodecNamer>
{
    store: Store<N>,
    hash: H,
    limits: Limits,
}

impl Validator<Sha256, CodecNamer>
{
    /// Open (creating if absent) a validator backed by SHA-256 and the
    /// reversible path codec, storing records under `hash_dir`.
    pub fn new(hash_dir: impl Into<PathBuf>) -> Result<Self, Error>
    {
        Self::with_limits(hash_dir, Limits::default())
    }

    /// Like [`Validator::new`], with explicit [`Limits`].
    pub fn with_limits(hash_dir: impl Into<PathBuf>, limits: Limits)
        -> Result<Self, Error>
    {
        Self::custom(hash_dir, Sha256, CodecNamer, limits)
    }
}

impl<H, N> Validator<H, N>
    where H: HashAlgorithm, N: Namer
{
    /// Construct a validator from fully custom components. Used by
    /// tests to substitute [`fileguard_hash::testing::ConstantHash`] or
    /// [`fileguard_store::testing::ConstantNamer`]; production code
    /// should use [`Validator::new`].
    pub fn custom(
        hash_dir: impl Into<PathBuf>,
        hash: H,
        namer: N,
        limits: Limits,
    ) -> Result<Self, Error>
    {
        let store = Store::with_namer(hash_dir, namer).map_err(from_store_error)?;
        Ok(Self { store, hash, limits })
    }

    /// Hash `path` and persist a new record for it, refusing to
    /// overwrite an existing valid record unless `force` is set.
    ///
    /// Cancellation checkpoints for a caller embedding this in a
    /// scheduler: after the file is opened, after the digest is
    /// computed, and immediately before the record is saved. Abandoning
    /// the call before that last checkpoint leaves no record on disk (a
    /// record is written atomically or not at all).
    pub fn record(&self, path: &Path, force: bool) -> Result<PathBuf, Error>
    {
        let resolved = resolve_path(path)?;
        let resolved_path = Path::new(&resolved);

        let bytes = self.open_and_read(resolved_path)?;
        let digest = self.hash.sum_bytes(&bytes);
        let prefixed = self.hash.prefixed(&digest);

        let record_path = self.store.record_path(&resolved).map_err(from_store_error)?;

        match self.store.load(&resolved) {
            Ok(existing) => {
                if existing.file_path != resolved {
                    tracing::warn!(
                        requested = %resolved, recorded = %existing.file_path,
                        "codec collision detected on record",
                    );
                    return Err(Error::HashCollision {
                        record_path,
                        requested: resolved,
                        recorded: existing.file_path,
                    });
                }
                if !force {
                    return Err(Error::HashFileExists(record_path));
                }
            },
            Err(fileguard_store::Error::RecordNotFound(_)) => {},
            Err(fileguard_store::Error::RecordCorrupted { .. }) => {
                tracing::warn!(path = %record_path.display(), "overwriting corrupted record");
            },
            Err(err) => return Err(from_store_error(err)),
        }

        self.store.save(&resolved, fileguard_store::Record {
            schema_version: fileguard_store::CURRENT_SCHEMA_VERSION,
            file_path: resolved.clone(),
            content_hash: prefixed,
            updated_at: chrono::Utc::now(),
            syscall_analysis: None,
        }).map_err(from_store_error)?;

        Ok(record_path)
    }

    /// Verify that `path`'s current content matches its recorded hash.
    pub fn verify(&self, path: &Path) -> Result<(), Error>
    {
        let resolved = resolve_path(path)?;
        let bytes = self.open_and_read(Path::new(&resolved))?;
        self.check(&resolved, &bytes)
    }

    /// The TOCTOU-safe primitive: open `path`, read it exactly once,
    /// verify the bytes just read against the record, and return those
    /// same bytes.
    ///
    /// There is no second open and no second read — the bytes returned
    /// are byte-for-byte the ones that were hashed.
    pub fn verify_and_read(&self, path: &Path) -> Result<Vec<u8>, Error>
    {
        let resolved = resolve_path(path)?;
        let bytes = self.open_and_read(Path::new(&resolved))?;
        self.check(&resolved, &bytes)?;
        Ok(bytes)
    }

    /// Like [`Validator::verify`], but falls back to `bridge` (if any)
    /// if the ambient identity cannot open the file.
    ///
    /// `bridge` is optional so a caller can wire up privileged
    /// verification in its API before a bridge is actually configured;
    /// a permission-denied open with no bridge supplied reports
    /// [`Error::PrivilegeManagerNotAvailable`] rather than silently
    /// falling back to the unprivileged error.
    pub fn verify_with_privileges(
        &self,
        path: &Path,
        bridge: Option<&dyn PrivilegeBridge>,
    ) -> Result<(), Error>
    {
        let resolved = resolve_path(path)?;
        let bytes = self.open_and_read_with_privileges(Path::new(&resolved), bridge)?;
        self.check(&resolved, &bytes)
    }

    /// Like [`Validator::verify_and_read`], but falls back to `bridge`
    /// (if any) if the ambient identity cannot open the file.
    ///
    /// Only the open itself runs with elevated privilege; the read,
    /// hash, and record comparison that follow all run with ambient
    /// privilege by virtue of already holding the descriptor.
    pub fn verify_and_read_with_privileges(
        &self,
        path: &Path,
        bridge: Option<&dyn PrivilegeBridge>,
    ) -> Result<Vec<u8>, Error>
    {
        let resolved = resolve_path(path)?;
        let bytes = self.open_and_read_with_privileges(Path::new(&resolved), bridge)?;
        self.check(&resolved, &bytes)?;
        Ok(bytes)
    }

    fn check(&self, resolved: &str, bytes: &[u8]) -> Result<(), Error>
    {
        let digest = self.hash.sum_bytes(bytes);
        let record_path = self.store.record_path(resolved).map_err(from_store_error)?;

        let record = match self.store.load(resolved) {
            Ok(record) => record,
            Err(fileguard_store::Error::RecordNotFound(p)) => {
                return Err(Error::HashFileNotFound(p));
            },
            Err(err) => return Err(from_store_error(err)),
        };

        if record.file_path != resolved {
            tracing::warn!(
                requested = %resolved, recorded = %record.file_path,
                "codec collision detected on verify",
            );
            return Err(Error::HashCollision {
                record_path,
                requested: resolved.to_owned(),
                recorded: record.file_path,
            });
        }

        let (algo, expected_digest) = fileguard_hash::split_prefixed(&record.content_hash)
            .ok_or_else(|| Error::RecordCorrupted(record_path.clone()))?;

        if algo != self.hash.name() {
            return Err(Error::AlgorithmMismatch {
                path: record_path,
                recorded: algo.to_owned(),
                actual: self.hash.name(),
            });
        }

        if expected_digest != digest {
            return Err(Error::Mismatch {
                path: record_path,
                expected: expected_digest.to_owned(),
                actual: digest,
            });
        }

        Ok(())
    }

    fn open_and_read(&self, resolved_path: &Path) -> Result<Vec<u8>, Error>
    {
        let fd = fileguard_io::open_for_read(resolved_path, self.limits.max_file_size)
            .map_err(|err| from_io_error(resolved_path, err))?;
        fileguard_io::read_all(std::os::unix::io::AsFd::as_fd(&fd), self.limits.max_file_size)
            .map_err(|err| from_io_error(resolved_path, err))
    }

    fn open_and_read_with_privileges(
        &self,
        resolved_path: &Path,
        bridge: Option<&dyn PrivilegeBridge>,
    ) -> Result<Vec<u8>, Error>
    {
        match fileguard_io::open_for_read(resolved_path, self.limits.max_file_size) {
            Ok(fd) => {
                return fileguard_io::read_all(
                    std::os::unix::io::AsFd::as_fd(&fd), self.limits.max_file_size,
                ).map_err(|err| from_io_error(resolved_path, err));
            },
            Err(fileguard_io::Error::PermissionDenied) => {},
            Err(other) => return Err(from_io_error(resolved_path, other)),
        }

        let bridge = bridge.ok_or(Error::PrivilegeManagerNotAvailable)?;

        if !bridge.is_privileged_execution_supported() {
            return Err(Error::PrivilegedExecutionNotSupported);
        }

        tracing::debug!(path = %resolved_path.display(), "elevating privilege to open file");

        let max_size = self.limits.max_file_size;
        let mut open = || fileguard_io::open_for_read(resolved_path, max_size);
        let fd = bridge
            .with_privileges(fileguard_privilege::ScopeTag::FileValidation, &mut open)
            .map_err(|err| match err {
                fileguard_privilege::Error::ElevationFailed(_) => {
                    Error::PrivilegedExecutionFailed(err)
                },
                fileguard_privilege::Error::Operation(op) => from_io_error(resolved_path, op),
            })?;

        fileguard_io::read_all(std::os::unix::io::AsFd::as_fd(&fd), max_size)
            .map_err(|err| from_io_error(resolved_path, err))
    }
}

/// Resolve `path` into the canonical, symlink-free absolute path that is
/// this core's lookup key.
///
/// This is the one place the core follows symlinks: it resolves them to
/// compute the key, but every subsequent open uses a non-following flag
/// on the *resolved* path, so a symlink swapped in between resolution
/// and open is still caught (as [`Error::IsSymlink`]) rather than
/// silently followed.
fn resolve_path(path: &Path) -> Result<String, Error>
{
    if path.as_os_str().is_empty() || !path.is_absolute() {
        return Err(Error::InvalidPath(path.display().to_string()));
    }

    let resolved = std::fs::canonicalize(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound(path.to_owned()),
        io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_owned()),
        _ => Error::Io(err),
    })?;

    resolved.into_os_string().into_string()
        .map_err(|_| Error::InvalidPath(path.display().to_string()))
}

fn from_io_error(path: &Path, err: fileguard_io::Error) -> Error
{
    match err {
        fileguard_io::Error::InvalidPath(p) => Error::InvalidPath(p),
        fileguard_io::Error::IsSymlink => Error::IsSymlink(path.to_owned()),
        fileguard_io::Error::NotRegular => Error::NotRegular(path.to_owned()),
        fileguard_io::Error::TooLarge => Error::TooLarge(path.to_owned()),
        fileguard_io::Error::NotFound => Error::NotFound(path.to_owned()),
        fileguard_io::Error::PermissionDenied => Error::PermissionDenied(path.to_owned()),
        fileguard_io::Error::Io(err) => Error::Io(err),
    }
}

fn from_store_error(err: fileguard_store::Error) -> Error
{
    match err {
        fileguard_store::Error::RecordNotFound(p) => Error::HashFileNotFound(p),
        fileguard_store::Error::RecordCorrupted { path, .. } => Error::RecordCorrupted(path),
        fileguard_store::Error::SchemaVersionMismatch { path, expected, actual } => {
            Error::SchemaVersionMismatch { path, expected, actual }
        },
        fileguard_store::Error::InvalidAnalysisDir(p) => {
            Error::InvalidPath(p.display().to_string())
        },
        fileguard_store::Error::Codec(err) => Error::InvalidPath(err.to_string()),
        fileguard_store::Error::Io { path, source } => from_io_error(&path, source),
    }
}
