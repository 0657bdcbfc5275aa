//! Test doubles for [`PrivilegeBridge`][`crate::PrivilegeBridge`].
//!
//! Exercising the real [`SetuidBridge`][`crate::SetuidBridge`] requires
//! running as root, which most CI environments do not. These doubles let
//! the validator's own test suite exercise every branch of the privilege
//! protocol (bridge absent, bridge present but unsupported, bridge
//! present and supported) without ever touching `seteuid`.

use {
    crate::{Error, PrivilegeBridge, ScopeTag},
    std::{cell::Cell, os::unix::io::OwnedFd},
};

/// A bridge that always reports support and simply runs the closure
/// in-process, with no actual identity change.
///
/// Records whether it was invoked, so a test can assert that escalation
/// happened (or didn't).
#[derive(Default)]
pub struct AlwaysSupported
{
    invoked: Cell<bool>,
}

impl AlwaysSupported
{
    /// Whether [`with_privileges`][`PrivilegeBridge::with_privileges`]
    /// has been called yet.
    pub fn was_invoked(&self) -> bool
    {
        self.invoked.get()
    }
}

impl PrivilegeBridge for AlwaysSupported
{
    fn is_privileged_execution_supported(&self) -> bool
    {
        true
    }

    fn with_privileges(
        &self,
        _scope_tag: ScopeTag,
        f: &mut dyn FnMut() -> Result<OwnedFd, fileguard_io::Error>,
    ) -> Result<OwnedFd, Error>
    {
        self.invoked.set(true);
        f().map_err(Error::Operation)
    }
}

/// A bridge that reports it is not supported, so callers observe
/// [`fileguard_io::Error::PermissionDenied`] surfacing unchanged.
#[derive(Default)]
pub struct Unsupported;

impl PrivilegeBridge for Unsupported
{
    fn is_privileged_execution_supported(&self) -> bool
    {
        false
    }

    fn with_privileges(
        &self,
        _scope_tag: ScopeTag,
        _f: &mut dyn FnMut() -> Result<OwnedFd, fileguard_io::Error>,
    ) -> Result<OwnedFd, Error>
    {
        unreachable!("callers must check is_privileged_execution_supported first")
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::open_for_read_with_privileges, std::os::unix::fs::PermissionsExt};

    #[test]
    fn escalates_only_after_a_permission_denied()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.txt");
        std::fs::write(&path, b"secret").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Root sees through the 0o000 mode, so this test only proves
        // what it means to prove when not running as root.
        if unsafe { libc::geteuid() } == 0 {
            return;
        }

        let bridge = AlwaysSupported::default();
        let fd = open_for_read_with_privileges(&path, 1024, Some(&bridge)).unwrap();
        assert!(bridge.was_invoked());

        let bytes = fileguard_io::read_all(
            std::os::unix::io::AsFd::as_fd(&fd), 1024,
        ).unwrap();
        assert_eq!(bytes, b"secret");
    }

    #[test]
    fn unsupported_bridge_surfaces_permission_denied()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.txt");
        std::fs::write(&path, b"secret").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();

        if unsafe { libc::geteuid() } == 0 {
            return;
        }

        let bridge = Unsupported;
        let err = open_for_read_with_privileges(&path, 1024, Some(&bridge)).unwrap_err();
        assert!(matches!(
            err,
            Error::Operation(fileguard_io::Error::PermissionDenied),
        ));
    }

    /// Exercises the real `SetuidBridge` against a file owned by a
    /// different, genuinely unreadable-by-us uid. Requires running this
    /// test as root with a spare uid available; `cargo test -- --ignored`.
    #[test]
    #[ignore = "requires root"]
    fn setuid_bridge_against_a_root_only_file()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("root-only.txt");
        std::fs::write(&path, b"only root can read this").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        let bridge = crate::SetuidBridge::new(0, 0);
        let fd = open_for_read_with_privileges(&path, 1024, Some(&bridge)).unwrap();
        let bytes = fileguard_io::read_all(
            std::os::unix::io::AsFd::as_fd(&fd), 1024,
        ).unwrap();
        assert_eq!(bytes, b"only root can read this");
    }
}
