//! Versioned, per-target hash records persisted under a flat directory.
//!
//! A [`Store`] maps an absolute target path to a single JSON file via
//! [`fileguard_codec`], and guarantees that [`save`][`Store::save`] is
//! the only code path that stamps `schema_version`, `file_path`, and
//! `updated_at` — [`update`][`Store::update`] never duplicates that
//! logic, it only decides what to do about a failed load before
//! delegating to `save`.

#![warn(missing_docs)]

use {
    chrono::{DateTime, Utc},
    os_ext::{AT_SYMLINK_NOFOLLOW, S_IFDIR, S_IFLNK, S_IFMT},
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
    thiserror::Error,
};

/// The only schema version this store currently knows how to write.
///
/// [`Record::Load`][`Store::load`] treats any other value as
/// [`Error::SchemaVersionMismatch`] rather than attempting to migrate it.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Permissions of the hash directory, created on first use if absent.
const HASH_DIR_MODE: libc::mode_t = 0o750;

/// Permissions of an individual record file.
const RECORD_MODE: u32 = 0o600;

/// A versioned per-target hash record.
///
/// `syscall_analysis` is treated opaquely: this crate never reads or
/// interprets it, only round-trips it so an external analyzer's
/// [`update`][`Store::update`] call can set it without disturbing
/// `content_hash`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Record
{
    /// Schema version this record was written under.
    pub schema_version: u32,

    /// Absolute resolved path of the target this record describes.
    pub file_path: String,

    /// Prefixed digest, e.g. `"sha256:<hex>"`.
    pub content_hash: String,

    /// When this record was last written.
    pub updated_at: DateTime<Utc>,

    /// Optional extended analysis, preserved opaquely across updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syscall_analysis: Option<serde_json::Value>,
}

/// Failures from loading, saving, or updating a record.
#[derive(Debug, Error)]
pub enum Error
{
    /// No record file exists for this path.
    #[error("no hash record exists for {0:?}")]
    RecordNotFound(PathBuf),

    /// The record file exists but could not be parsed as a valid record.
    #[error("hash record for {path:?} is corrupted: {source}")]
    RecordCorrupted
    {
        /// The record file's path.
        path: PathBuf,
        /// The JSON parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The record's `schema_version` does not match what this store
    /// understands how to read or write.
    #[error("schema version mismatch for {path:?}: expected {expected}, found {actual}")]
    SchemaVersionMismatch
    {
        /// The record file's path.
        path: PathBuf,
        /// The version this store writes and expects to read.
        expected: u32,
        /// The version actually found on disk.
        actual: u32,
    },

    /// The analysis directory could not be created or is not a directory.
    #[error("{0:?} is not usable as an analysis directory")]
    InvalidAnalysisDir(PathBuf),

    /// The path could not be encoded into a record file name.
    #[error(transparent)]
    Codec(#[from] fileguard_codec::Error),

    /// A lower-level I/O failure reading or writing a record file.
    #[error("I/O error on hash record {path:?}: {source}")]
    Io
    {
        /// The record file's path.
        path: PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: fileguard_io::Error,
    },
}

/// Strategy for turning a target path into the name of its record file.
///
/// Production code always uses [`CodecNamer`]. The indirection exists so
/// a test can force two distinct paths to collide on the same record
/// file name without needing a genuine [`fileguard_codec`] or hash
/// collision — see `fileguard-core`'s collision-detection tests.
pub trait Namer
{
    /// Compute the record file name for `target_path`.
    fn name(&self, target_path: &str) -> Result<String, Error>;
}

/// The production [`Namer`]: [`fileguard_codec::encode`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CodecNamer;

impl Namer for CodecNamer
{
    fn name(&self, target_path: &str) -> Result<String, Error>
    {
        Ok(fileguard_codec::encode(target_path)?)
    }
}

/// A flat directory of hash records, addressed by a [`Namer`] (the
/// production path is always [`CodecNamer`]; see [`Store::with_namer`]
/// for swapping it out in tests).
pub struct Store<N = CodecNamer>
{
    analysis_dir: PathBuf,
    namer: N,
}

impl Store<CodecNamer>
{
    /// Open (creating if absent) the hash record directory at
    /// `analysis_dir`, addressed by [`fileguard_codec`].
    ///
    /// `analysis_dir` itself is never followed through a symlink: its
    /// metadata is inspected with an `lstat`-equivalent call before any
    /// attempt to create it, so a pre-existing symlink at that path is
    /// rejected rather than silently followed into an arbitrary
    /// location.
    pub fn new(analysis_dir: impl Into<PathBuf>) -> Result<Self, Error>
    {
        Self::with_namer(analysis_dir, CodecNamer)
    }
}

impl<N: Namer> Store<N>
{
    /// Like [`Store::new`], but addressed by an arbitrary [`Namer`]
    /// instead of the production codec.
    pub fn with_namer(analysis_dir: impl Into<PathBuf>, namer: N)
        -> Result<Self, Error>
    {
        let analysis_dir = analysis_dir.into();
        let cstr = cstr_path(&analysis_dir)
            .map_err(|_| Error::InvalidAnalysisDir(analysis_dir.clone()))?;

        match os_ext::fstatat(None, &cstr, AT_SYMLINK_NOFOLLOW) {
            Ok(statbuf) if statbuf.st_mode & S_IFMT == S_IFDIR => {},
            Ok(statbuf) if statbuf.st_mode & S_IFMT == S_IFLNK => {
                return Err(Error::InvalidAnalysisDir(analysis_dir));
            },
            Ok(_) => return Err(Error::InvalidAnalysisDir(analysis_dir)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                os_ext::mkdir(&cstr, HASH_DIR_MODE)
                    .map_err(|_| Error::InvalidAnalysisDir(analysis_dir.clone()))?;
            },
            Err(_) => return Err(Error::InvalidAnalysisDir(analysis_dir)),
        }

        Ok(Self { analysis_dir, namer })
    }

    /// The record file path a given target path would be stored at.
    pub fn record_path(&self, target_path: &str) -> Result<PathBuf, Error>
    {
        let name = self.namer.name(target_path)?;
        Ok(self.analysis_dir.join(name))
    }

    /// Load the record for `target_path`.
    pub fn load(&self, target_path: &str) -> Result<Record, Error>
    {
        let record_path = self.record_path(target_path)?;
        self.load_at(&record_path)
    }

    fn load_at(&self, record_path: &Path) -> Result<Record, Error>
    {
        let bytes = match fileguard_io::open_for_read(
            record_path, fileguard_io::DEFAULT_MAX_FILE_SIZE,
        ) {
            Ok(fd) => fileguard_io::read_all(
                std::os::unix::io::AsFd::as_fd(&fd),
                fileguard_io::DEFAULT_MAX_FILE_SIZE,
            ).map_err(|source| Error::Io { path: record_path.to_owned(), source })?,
            Err(fileguard_io::Error::NotFound) => {
                return Err(Error::RecordNotFound(record_path.to_owned()));
            },
            Err(source) => {
                return Err(Error::Io { path: record_path.to_owned(), source });
            },
        };

        let record: Record = serde_json::from_slice(&bytes)
            .map_err(|source| Error::RecordCorrupted {
                path: record_path.to_owned(),
                source,
            })?;

        if record.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(Error::SchemaVersionMismatch {
                path: record_path.to_owned(),
                expected: CURRENT_SCHEMA_VERSION,
                actual: record.schema_version,
            });
        }

        Ok(record)
    }

    /// Overwrite the entire record for `target_path`.
    ///
    /// Always stamps `schema_version`, `file_path`, and `updated_at`;
    /// this is the only place those fields are set.
    pub fn save(&self, target_path: &str, mut record: Record) -> Result<(), Error>
    {
        record.schema_version = CURRENT_SCHEMA_VERSION;
        record.file_path = target_path.to_owned();
        record.updated_at = Utc::now();

        let record_path = self.record_path(target_path)?;
        let bytes = serde_json::to_vec_pretty(&record)
            .expect("Record serialization cannot fail");

        fileguard_io::write_overwrite(&record_path, &bytes, RECORD_MODE)
            .map_err(|source| Error::Io { path: record_path.clone(), source })?;

        tracing::debug!(path = %record_path.display(), "saved hash record");
        Ok(())
    }

    /// Read-modify-write the record for `target_path`.
    ///
    /// - A missing or corrupted record is treated as an empty starting
    ///   point for `mutator`.
    /// - A schema version mismatch is returned without writing anything.
    /// - Any other load error is returned unchanged.
    pub fn update(
        &self,
        target_path: &str,
        mutator: impl FnOnce(&mut Record),
    ) -> Result<(), Error>
    {
        let mut record = match self.load(target_path) {
            Ok(record) => record,
            Err(Error::RecordNotFound(_) | Error::RecordCorrupted { .. }) => {
                Record {
                    schema_version: CURRENT_SCHEMA_VERSION,
                    file_path: target_path.to_owned(),
                    content_hash: String::new(),
                    updated_at: Utc::now(),
                    syscall_analysis: None,
                }
            },
            Err(err @ Error::SchemaVersionMismatch { .. }) => return Err(err),
            Err(err) => return Err(err),
        };

        mutator(&mut record);
        self.save(target_path, record)
    }
}

/// Test doubles for [`Namer`].
pub mod testing
{
    use super::{Error, Namer};

    /// A [`Namer`] that always returns the same record file name,
    /// regardless of the target path — used to force a codec collision
    /// between two distinct paths without needing real colliding input.
    #[derive(Clone, Debug)]
    pub struct ConstantNamer(pub String);

    impl Namer for ConstantNamer
    {
        fn name(&self, _target_path: &str) -> Result<String, Error>
        {
            Ok(self.0.clone())
        }
    }
}

fn cstr_path(path: &Path) -> Result<std::ffi::CString, std::ffi::NulError>
{
    use std::os::unix::ffi::OsStrExt;
    std::ffi::CString::new(path.as_os_str().as_bytes())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn creates_the_analysis_dir_with_the_right_mode()
    {
        let parent = tempfile::tempdir().unwrap();
        let analysis_dir = parent.path().join("hashes");

        Store::new(&analysis_dir).unwrap();

        let meta = std::fs::metadata(&analysis_dir).unwrap();
        assert!(meta.is_dir());
        assert_eq!(
            std::os::unix::fs::PermissionsExt::mode(&meta.permissions()) & 0o777,
            0o750,
        );
    }

    #[test]
    fn refuses_a_symlinked_analysis_dir()
    {
        let parent = tempfile::tempdir().unwrap();
        let real_dir = parent.path().join("real");
        std::fs::create_dir(&real_dir).unwrap();
        let link = parent.path().join("link");
        std::os::unix::fs::symlink(&real_dir, &link).unwrap();

        let err = Store::new(&link).unwrap_err();
        assert!(matches!(err, Error::InvalidAnalysisDir(_)));
    }

    #[test]
    fn save_then_load_round_trips_all_fields()
    {
        let parent = tempfile::tempdir().unwrap();
        let store = Store::new(parent.path().join("hashes")).unwrap();

        let record = Record {
            schema_version: 1,
            file_path: "/tmp/t/test.txt".to_owned(),
            content_hash: "sha256:abc".to_owned(),
            updated_at: Utc::now(),
            syscall_analysis: Some(serde_json::json!({"syscalls": ["open", "read"]})),
        };

        store.save("/tmp/t/test.txt", record.clone()).unwrap();
        let loaded = store.load("/tmp/t/test.txt").unwrap();

        assert_eq!(loaded.file_path, "/tmp/t/test.txt");
        assert_eq!(loaded.content_hash, "sha256:abc");
        assert_eq!(loaded.syscall_analysis, record.syscall_analysis);
    }

    #[test]
    fn load_missing_record_reports_not_found()
    {
        let parent = tempfile::tempdir().unwrap();
        let store = Store::new(parent.path().join("hashes")).unwrap();

        let err = store.load("/tmp/t/nonexistent.txt").unwrap_err();
        assert!(matches!(err, Error::RecordNotFound(_)));
    }

    #[test]
    fn update_preserves_untouched_fields()
    {
        let parent = tempfile::tempdir().unwrap();
        let store = Store::new(parent.path().join("hashes")).unwrap();

        store.update("/tmp/t/test.txt", |record| {
            record.content_hash = "sha256:first".to_owned();
            record.syscall_analysis = Some(serde_json::json!({"a": 1}));
        }).unwrap();

        store.update("/tmp/t/test.txt", |record| {
            record.content_hash = "sha256:second".to_owned();
        }).unwrap();

        let loaded = store.load("/tmp/t/test.txt").unwrap();
        assert_eq!(loaded.content_hash, "sha256:second");
        assert_eq!(loaded.syscall_analysis, Some(serde_json::json!({"a": 1})));
    }

    #[test]
    fn update_refuses_to_overwrite_a_schema_mismatch()
    {
        let parent = tempfile::tempdir().unwrap();
        let store = Store::new(parent.path().join("hashes")).unwrap();

        let record_path = store.record_path("/tmp/t/test.txt").unwrap();
        let raw = serde_json::json!({
            "schema_version": 999,
            "file_path": "/tmp/t/test.txt",
            "content_hash": "sha256:x",
            "updated_at": Utc::now().to_rfc3339(),
        });
        std::fs::write(&record_path, serde_json::to_vec(&raw).unwrap()).unwrap();
        let before = std::fs::read(&record_path).unwrap();

        let err = store.update("/tmp/t/test.txt", |record| {
            record.content_hash = "sha256:new".to_owned();
        }).unwrap_err();

        assert!(matches!(
            err,
            Error::SchemaVersionMismatch { expected: 1, actual: 999, .. },
        ));
        let after = std::fs::read(&record_path).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn update_treats_a_corrupted_record_as_empty()
    {
        let parent = tempfile::tempdir().unwrap();
        let store = Store::new(parent.path().join("hashes")).unwrap();

        let record_path = store.record_path("/tmp/t/test.txt").unwrap();
        std::fs::write(&record_path, b"not json at all").unwrap();

        store.update("/tmp/t/test.txt", |record| {
            record.content_hash = "sha256:recovered".to_owned();
        }).unwrap();

        let loaded = store.load("/tmp/t/test.txt").unwrap();
        assert_eq!(loaded.content_hash, "sha256:recovered");
    }
}
