use {
    crate::stat,
    std::{
        ffi::CStr,
        io,
        mem::MaybeUninit,
        os::unix::{io::{AsRawFd, BorrowedFd}},
    },
};

/// Call fstat(2) on an already-open file descriptor.
///
/// Unlike [`fstatat`], this never touches the filesystem namespace again;
/// it reports the metadata of the object the descriptor already refers to,
/// which is the only way to learn the type of a file without racing
/// against a second lookup of its path.
pub fn fstat(fd: BorrowedFd) -> io::Result<stat>
{
    let mut statbuf = MaybeUninit::uninit();

    // SAFETY: fd is a valid, open file descriptor.
    let result = unsafe { libc::fstat(fd.as_raw_fd(), statbuf.as_mut_ptr()) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: fstat initialized statbuf.
    Ok(unsafe { statbuf.assume_init() })
}

/// Call fstatat(2) with the given arguments.
///
/// If `dirfd` is [`None`], `AT_FDCWD` is passed.
pub fn fstatat(
    dirfd: Option<BorrowedFd>,
    pathname: &CStr,
    flags: libc::c_int,
) -> io::Result<stat>
{
    let dirfd = dirfd.map(|fd| fd.as_raw_fd()).unwrap_or(libc::AT_FDCWD);

    let mut statbuf = MaybeUninit::uninit();

    // SAFETY: path is NUL-terminated.
    let result = unsafe {
        libc::fstatat(
            dirfd,
            pathname.as_ptr(),
            statbuf.as_mut_ptr(),
            flags,
        )
    };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: fstatat initialized statbuf.
    Ok(unsafe { statbuf.assume_init() })
}

/// Equivalent to [`mkdirat`] with [`None`] passed for `dirfd`.
pub fn mkdir(pathname: &CStr, mode: libc::mode_t) -> io::Result<()>
{
    mkdirat(None, pathname, mode)
}

/// Call mkdirat(2) with the given arguments.
///
/// If `dirfd` is [`None`], `AT_FDCWD` is passed.
pub fn mkdirat(dirfd: Option<BorrowedFd>, pathname: &CStr, mode: libc::mode_t)
    -> io::Result<()>
{
    let dirfd = dirfd.map(|fd| fd.as_raw_fd()).unwrap_or(libc::AT_FDCWD);

    // SAFETY: path is NUL-terminated.
    let result = unsafe { libc::mkdirat(dirfd, pathname.as_ptr(), mode) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Equivalent to [`mknodat`] with [`None`] passed for `dirfd`.
pub fn mknod(pathname: &CStr, mode: libc::mode_t, dev: libc::dev_t)
    -> io::Result<()>
{
    mknodat(None, pathname, mode, dev)
}

/// Call mknodat(2) with the given arguments.
///
/// If `dirfd` is [`None`], `AT_FDCWD` is passed.
pub fn mknodat(
    dirfd: Option<BorrowedFd>,
    pathname: &CStr,
    mode: libc::mode_t,
    dev: libc::dev_t,
) -> io::Result<()>
{
    let dirfd = dirfd.map(|fd| fd.as_raw_fd()).unwrap_or(libc::AT_FDCWD);

    // SAFETY: path is NUL-terminated.
    let result = unsafe { libc::mknodat(dirfd, pathname.as_ptr(), mode, dev) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
