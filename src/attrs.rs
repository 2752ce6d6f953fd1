/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::ffi::CString;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime};

use fuse_mt::{FileAttr, FileType, Statfs};

use crate::error::Result;

/// How long the kernel may cache an entry's attributes before asking again.
/// Kept short since promotion can change a path's effective content at any
/// time.
pub const TTL: Duration = Duration::from_secs(1);

fn mode_to_filetype(mode: libc::mode_t) -> FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn systemtime_from(secs: i64, nanos: i64) -> SystemTime {
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(secs as u64, nanos as u32)
    } else {
        SystemTime::UNIX_EPOCH - Duration::new((-secs) as u64, 0)
    }
}

/// `lstat`s `host` directly (rather than going through `std::fs::symlink_metadata`)
/// so the exact field set the design calls out — atime/ctime/mtime, uid, gid,
/// mode, size, nlink — comes straight from the kernel's stat buffer.
pub fn lstat(host: &Path) -> Result<FileAttr> {
    let c_path = CString::new(host.as_os_str().as_bytes()).expect("host path has no interior NUL");
    let mut stat_buf = MaybeUninit::<libc::stat>::zeroed();
    let rc = unsafe { libc::lstat(c_path.as_ptr(), stat_buf.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let st = unsafe { stat_buf.assume_init() };

    Ok(FileAttr {
        size: st.st_size as u64,
        blocks: st.st_blocks as u64,
        atime: systemtime_from(st.st_atime, st.st_atime_nsec),
        mtime: systemtime_from(st.st_mtime, st.st_mtime_nsec),
        ctime: systemtime_from(st.st_ctime, st.st_ctime_nsec),
        crtime: SystemTime::UNIX_EPOCH,
        kind: mode_to_filetype(st.st_mode),
        perm: (st.st_mode & 0o7777) as u16,
        nlink: st.st_nlink as u32,
        uid: st.st_uid,
        gid: st.st_gid,
        rdev: st.st_rdev as u32,
        flags: 0,
    })
}

/// `statvfs`s `host`. Note the FUSE low-level protocol's statfs reply (what
/// `fuse_mt::Statfs` models) carries only `blocks/bfree/bavail/files/ffree/
/// bsize/namelen/frsize` — `f_favail` and `f_flag` from the design's field
/// list exist in the POSIX `statvfs` struct we read, but have no slot in the
/// kernel ABI reply, so they are read and then dropped at this boundary.
pub fn statvfs(host: &Path) -> Result<Statfs> {
    let c_path = CString::new(host.as_os_str().as_bytes()).expect("host path has no interior NUL");
    let mut buf = MaybeUninit::<libc::statvfs>::zeroed();
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), buf.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let st = unsafe { buf.assume_init() };

    Ok(Statfs {
        blocks: st.f_blocks,
        bfree: st.f_bfree,
        bavail: st.f_bavail,
        files: st.f_files,
        ffree: st.f_ffree,
        bsize: st.f_bsize as u32,
        namelen: st.f_namemax as u32,
        frsize: st.f_frsize as u32,
    })
}
