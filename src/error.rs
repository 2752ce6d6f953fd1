/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use thiserror::Error;

use crate::partial::Partial;

/// Internal invariant violations, distinct from pass-through host I/O errors.
///
/// Every variant is mapped to a `libc` errno at the dispatcher boundary
/// (see [`OverlayError::errno`]) rather than aborting the process: a panicking
/// FUSE callback takes the whole mount down with it.
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("'{0}' does not exist")]
    NotFound(Partial),
    #[error("'{0}' is not a directory")]
    NotADir(Partial),
    #[error("handle {0} is not open")]
    UnknownHandle(u64),
    #[error("operation not supported on '{0}'")]
    Unsupported(Partial),
    #[error("failed to append to shadow log: {0}")]
    ShadowAppend(#[source] std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

impl OverlayError {
    /// Maps this error to the errno the kernel should see.
    pub fn errno(&self) -> libc::c_int {
        match self {
            OverlayError::NotFound(_) => libc::ENOENT,
            OverlayError::NotADir(_) => libc::ENOTDIR,
            OverlayError::UnknownHandle(_) => libc::EBADF,
            OverlayError::Unsupported(_) => libc::EMLINK,
            OverlayError::ShadowAppend(_) => libc::EIO,
            OverlayError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            OverlayError::Walk(e) => e
                .io_error()
                .and_then(|e| e.raw_os_error())
                .unwrap_or(libc::EIO),
        }
    }
}

pub type Result<T> = std::result::Result<T, OverlayError>;

/// Converts any [`OverlayError`] into the `libc::c_int` that `fuse_mt`'s result
/// aliases expect, logging the failure first.
pub fn to_errno(op: &str, err: OverlayError) -> libc::c_int {
    let errno = err.errno();
    log::error!("{op}: {err}");
    errno
}

/// Same, for a bare `std::io::Error` arising directly from a pass-through syscall.
pub fn io_to_errno(op: &str, err: std::io::Error) -> libc::c_int {
    let errno = err.raw_os_error().unwrap_or(libc::EIO);
    log::debug!("{op}: {err}");
    errno
}
