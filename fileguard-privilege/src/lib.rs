//! Scoped privilege elevation for opening files the ambient identity
//! cannot read.
//!
//! The validator never holds elevated privilege for longer than a single
//! [`fileguard_io::open_for_read`] call. This crate is the only place in
//! the core that is allowed to change the process's effective identity,
//! and it always restores ambient privilege before returning, whether
//! the closure it ran succeeded, failed, or panicked.

#![warn(missing_docs)]

pub mod testing;

use {
    scope_exit::scope_exit,
    std::{fmt, os::unix::io::OwnedFd, path::Path},
    thiserror::Error,
};

/// A tag identifying why privilege is being elevated, carried through to
/// logs so an operator can tell which operation asked for it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ScopeTag
{
    /// Elevation requested to open a file for integrity validation.
    FileValidation,
}

impl fmt::Display for ScopeTag
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self {
            Self::FileValidation => write!(f, "file-validation"),
        }
    }
}

/// Failure to run a closure under elevated privilege.
#[derive(Debug, Error)]
pub enum Error
{
    /// The process could not assume the elevated identity.
    #[error("failed to elevate privilege: {0}")]
    ElevationFailed(#[source] std::io::Error),

    /// The closure itself failed once privilege was held.
    #[error(transparent)]
    Operation(#[from] fileguard_io::Error),
}

/// Capability to run a closure under elevated privilege and guarantee
/// its restoration afterward.
///
/// Implementations must restore ambient privilege on every exit path:
/// the closure returning `Ok`, returning `Err`, or unwinding.
pub trait PrivilegeBridge
{
    /// Whether this process is actually capable of elevating privilege.
    ///
    /// Checked once before attempting [`with_privileges`][Self::with_privileges]
    /// so a caller without `CAP_SETUID` (or not running setuid-root) fails
    /// fast with a clear error instead of a confusing `EPERM`.
    fn is_privileged_execution_supported(&self) -> bool;

    /// Run `f` with elevated privilege, restoring ambient privilege
    /// before returning.
    fn with_privileges(
        &self,
        scope_tag: ScopeTag,
        f: &mut dyn FnMut() -> Result<OwnedFd, fileguard_io::Error>,
    ) -> Result<OwnedFd, Error>;
}

/// Acquire a read-only descriptor for `path`, elevating privilege via
/// `bridge` only if the ambient-identity open failed with
/// [`PermissionDenied`][`fileguard_io::Error::PermissionDenied`].
///
/// This is the single entry point C6 uses; it implements the protocol
/// from the component design exactly: try unprivileged first, and only
/// escalate, and only for the duration of the open, on a permission
/// failure.
pub fn open_for_read_with_privileges(
    path: &Path,
    max_size: u64,
    bridge: Option<&dyn PrivilegeBridge>,
) -> Result<OwnedFd, Error>
{
    match fileguard_io::open_for_read(path, max_size) {
        Ok(fd) => return Ok(fd),
        Err(fileguard_io::Error::PermissionDenied) => {},
        Err(other) => return Err(Error::Operation(other)),
    }

    let bridge = bridge.ok_or(Error::Operation(fileguard_io::Error::PermissionDenied))?;

    if !bridge.is_privileged_execution_supported() {
        return Err(Error::Operation(fileguard_io::Error::PermissionDenied));
    }

    tracing::debug!(?path, "elevating privilege to open file");

    let mut open = || fileguard_io::open_for_read(path, max_size);
    bridge.with_privileges(ScopeTag::FileValidation, &mut open)
}

/// Elevate to the given euid/egid for the duration of `f`, restoring
/// the caller's original ids afterward via `libc::seteuid`/`setegid`.
///
/// This is the production [`PrivilegeBridge`]; it requires the process
/// to either run as root or carry the appropriate `CAP_SETUID`/
/// `CAP_SETGID` capabilities, which [`is_supported`][`Self::is_supported`]
/// checks for by attempting a no-op elevation to the current ids.
pub struct SetuidBridge
{
    target_uid: libc::uid_t,
    target_gid: libc::gid_t,
}

impl SetuidBridge
{
    /// Construct a bridge that elevates to `target_uid`/`target_gid`.
    pub fn new(target_uid: libc::uid_t, target_gid: libc::gid_t) -> Self
    {
        Self { target_uid, target_gid }
    }

    fn is_supported(&self) -> bool
    {
        // SAFETY: geteuid/getegid never fail.
        unsafe { libc::geteuid() == 0 }
    }
}

impl PrivilegeBridge for SetuidBridge
{
    fn is_privileged_execution_supported(&self) -> bool
    {
        self.is_supported()
    }

    fn with_privileges(
        &self,
        scope_tag: ScopeTag,
        f: &mut dyn FnMut() -> Result<OwnedFd, fileguard_io::Error>,
    ) -> Result<OwnedFd, Error>
    {
        tracing::info!(scope = %scope_tag, uid = self.target_uid,
                       gid = self.target_gid, "assuming elevated identity");

        // SAFETY: geteuid/getegid never fail; they only read process state.
        let (ambient_uid, ambient_gid) =
            unsafe { (libc::geteuid(), libc::getegid()) };

        // Order matters: raise gid before uid, drop uid before gid, so
        // we are never simultaneously missing both the privilege to
        // change gid and holding a uid that can't change it back.
        elevate(self.target_gid, self.target_uid)
            .map_err(Error::ElevationFailed)?;

        scope_exit! {
            if let Err(err) = elevate(ambient_gid, ambient_uid) {
                // There is no good way to recover from failing to drop
                // privilege; abort rather than continue running elevated.
                tracing::error!(%err, "failed to restore ambient privilege");
                std::process::abort();
            }
            tracing::debug!(scope = %scope_tag, "restored ambient privilege");
        }

        f().map_err(Error::Operation)
    }
}

fn elevate(gid: libc::gid_t, uid: libc::uid_t) -> std::io::Result<()>
{
    // SAFETY: setegid/seteuid are always safe to call; failure is
    // reported through errno, which last_os_error reads.
    if unsafe { libc::setegid(gid) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::seteuid(uid) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
