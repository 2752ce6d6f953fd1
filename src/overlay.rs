/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use fuse_mt::{
    CallbackResult, CreatedEntry, DirectoryEntry, FilesystemMT, RequestInfo, ResultCreate,
    ResultData, ResultEmpty, ResultEntry, ResultOpen, ResultReaddir, ResultStatfs, ResultWrite,
};
use log::debug;

use crate::attrs::{self, TTL};
use crate::error::{io_to_errno, to_errno};
use crate::ffi::to_cstring;
use crate::handles::HandleTable;
use crate::merge::DirectoryMerger;
use crate::partial::Partial;
use crate::paths::PathMapper;
use crate::promote::PromotionEngine;
use crate::shadow::ShadowSet;

/// Any of these bits on an `open`/`create` request means the caller intends to
/// modify the file, so the partial must be promoted before we hand back a fd.
const WRITE_INTENT: i32 = libc::O_WRONLY | libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC | libc::O_APPEND;

fn parent_and_name(parent: &Path, name: &OsStr) -> Partial {
    Partial::from(parent).join(&name.to_string_lossy())
}

/// Ties the engine modules together behind the `fuse_mt` callback surface.
///
/// Every callback takes the same three steps: resolve the relevant partial to
/// a host path (possibly promoting it), perform the plain host syscall, map
/// any error to the errno the kernel expects. The shared mutable state — the
/// shadow set and the handle table — lives behind a `Mutex` each; FUSE itself
/// serializes callback dispatch in the single-threaded configuration this
/// binary runs with, so the locks exist to satisfy `Send + Sync` rather than
/// to arbitrate real contention.
pub struct OverlayFs {
    promote: PromotionEngine,
    shadow: Mutex<ShadowSet>,
    handles: Mutex<HandleTable>,
}

impl OverlayFs {
    pub fn new(paths: PathMapper, shadow: ShadowSet) -> Self {
        OverlayFs {
            promote: PromotionEngine::new(paths),
            shadow: Mutex::new(shadow),
            handles: Mutex::new(HandleTable::new()),
        }
    }

    fn resolve_readonly(&self, partial: &Partial) -> std::path::PathBuf {
        let shadow = self.shadow.lock().expect("shadow set lock poisoned");
        self.promote.resolve_readonly(&shadow, partial)
    }

    fn resolve_write(&self, partial: &Partial) -> crate::error::Result<std::path::PathBuf> {
        let mut shadow = self.shadow.lock().expect("shadow set lock poisoned");
        self.promote.resolve(&mut shadow, partial, true)
    }
}

impl FilesystemMT for OverlayFs {
    fn init(&self, _req: RequestInfo) -> ResultEmpty {
        debug!("init");
        Ok(())
    }

    fn destroy(&self) {
        debug!("destroy");
    }

    fn getattr(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>) -> ResultEntry {
        let partial = Partial::from(path);
        debug!("getattr '{partial}'");
        let host = self.resolve_readonly(&partial);
        match attrs::lstat(&host) {
            Ok(attr) => Ok((TTL, attr)),
            Err(e) => Err(to_errno("getattr", e)),
        }
    }

    fn access(&self, _req: RequestInfo, path: &Path, mask: u32) -> ResultEmpty {
        let partial = Partial::from(path);
        debug!("access '{partial}' mask={mask:#o}");
        let host = self.resolve_readonly(&partial);
        let c_host = to_cstring(&host);
        let rc = unsafe { libc::access(c_host.as_ptr(), mask as libc::c_int) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io_to_errno("access", std::io::Error::last_os_error()))
        }
    }

    fn chmod(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>, mode: u32) -> ResultEmpty {
        let partial = Partial::from(path);
        debug!("chmod '{partial}' mode={mode:#o}");
        let host = match self.resolve_write(&partial) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("chmod", e)),
        };
        let c_host = to_cstring(&host);
        let rc = unsafe { libc::chmod(c_host.as_ptr(), mode as libc::mode_t) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io_to_errno("chmod", std::io::Error::last_os_error()))
        }
    }

    fn chown(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: Option<u64>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> ResultEmpty {
        let partial = Partial::from(path);
        debug!("chown '{partial}' uid={uid:?} gid={gid:?}");
        let host = match self.resolve_write(&partial) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("chown", e)),
        };
        let c_host = to_cstring(&host);
        let rc = unsafe {
            libc::chown(
                c_host.as_ptr(),
                uid.unwrap_or(u32::MAX),
                gid.unwrap_or(u32::MAX),
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io_to_errno("chown", std::io::Error::last_os_error()))
        }
    }

    fn truncate(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>, size: u64) -> ResultEmpty {
        let partial = Partial::from(path);
        debug!("truncate '{partial}' size={size}");
        let host = match self.resolve_write(&partial) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("truncate", e)),
        };
        let file = match fs::OpenOptions::new().write(true).open(&host) {
            Ok(f) => f,
            Err(e) => return Err(io_to_errno("truncate", e)),
        };
        match file.set_len(size) {
            Ok(()) => Ok(()),
            Err(e) => Err(io_to_errno("truncate", e)),
        }
    }

    fn utimens(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: Option<u64>,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> ResultEmpty {
        let partial = Partial::from(path);
        debug!("utimens '{partial}'");
        let host = match self.resolve_write(&partial) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("utimens", e)),
        };

        let current = match fs::symlink_metadata(&host) {
            Ok(m) => m,
            Err(e) => return Err(io_to_errno("utimens", e)),
        };
        let a = atime
            .map(filetime::FileTime::from_system_time)
            .unwrap_or_else(|| filetime::FileTime::from_last_access_time(&current));
        let m = mtime
            .map(filetime::FileTime::from_system_time)
            .unwrap_or_else(|| filetime::FileTime::from_last_modification_time(&current));

        match filetime::set_file_times(&host, a, m) {
            Ok(()) => Ok(()),
            Err(e) => Err(io_to_errno("utimens", e)),
        }
    }

    fn readlink(&self, _req: RequestInfo, path: &Path) -> ResultData {
        debug!("readlink '{}'", Partial::from(path));
        Err(libc::EMLINK)
    }

    fn symlink(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        _target: &Path,
    ) -> ResultEntry {
        debug!("symlink '{}'", parent_and_name(parent, name));
        Err(libc::EMLINK)
    }

    fn link(
        &self,
        _req: RequestInfo,
        path: &Path,
        _newparent: &Path,
        _newname: &OsStr,
    ) -> ResultEntry {
        debug!("link '{}'", Partial::from(path));
        Err(libc::EMLINK)
    }

    fn mknod(
        &self,
        _req: RequestInfo,
        parent_path: &Path,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> ResultEntry {
        let partial = parent_and_name(parent_path, name);
        debug!("mknod '{partial}' mode={mode:#o}");
        let host = match self.resolve_write(&partial) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("mknod", e)),
        };
        let c_host = to_cstring(&host);
        let rc = unsafe { libc::mknod(c_host.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) };
        if rc != 0 {
            return Err(io_to_errno("mknod", std::io::Error::last_os_error()));
        }
        match attrs::lstat(&host) {
            Ok(attr) => Ok((TTL, attr)),
            Err(e) => Err(to_errno("mknod", e)),
        }
    }

    fn mkdir(&self, _req: RequestInfo, parent_path: &Path, name: &OsStr, mode: u32) -> ResultEntry {
        let partial = parent_and_name(parent_path, name);
        debug!("mkdir '{partial}' mode={mode:#o}");
        let host = match self.resolve_write(&partial) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("mkdir", e)),
        };
        let c_host = to_cstring(&host);
        let rc = unsafe { libc::mkdir(c_host.as_ptr(), mode as libc::mode_t) };
        if rc != 0 {
            return Err(io_to_errno("mkdir", std::io::Error::last_os_error()));
        }
        match attrs::lstat(&host) {
            Ok(attr) => Ok((TTL, attr)),
            Err(e) => Err(to_errno("mkdir", e)),
        }
    }

    fn unlink(&self, _req: RequestInfo, parent_path: &Path, name: &OsStr) -> ResultEmpty {
        let partial = parent_and_name(parent_path, name);
        debug!("unlink '{partial}'");
        let host = match self.resolve_write(&partial) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("unlink", e)),
        };
        match fs::remove_file(&host) {
            Ok(()) => Ok(()),
            Err(e) => Err(io_to_errno("unlink", e)),
        }
    }

    fn rmdir(&self, _req: RequestInfo, parent_path: &Path, name: &OsStr) -> ResultEmpty {
        let partial = parent_and_name(parent_path, name);
        debug!("rmdir '{partial}'");
        let host = match self.resolve_write(&partial) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("rmdir", e)),
        };
        match fs::remove_dir(&host) {
            Ok(()) => Ok(()),
            Err(e) => Err(io_to_errno("rmdir", e)),
        }
    }

    fn rename(
        &self,
        _req: RequestInfo,
        parent_path: &Path,
        name: &OsStr,
        newparent_path: &Path,
        newname: &OsStr,
    ) -> ResultEmpty {
        let from = parent_and_name(parent_path, name);
        let to = parent_and_name(newparent_path, newname);
        debug!("rename '{from}' -> '{to}'");
        if from == to {
            return Ok(());
        }
        let from_host = match self.resolve_write(&from) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("rename", e)),
        };
        let to_host = match self.resolve_write(&to) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("rename", e)),
        };
        match fs::rename(&from_host, &to_host) {
            Ok(()) => Ok(()),
            Err(e) => Err(io_to_errno("rename", e)),
        }
    }

    fn opendir(&self, _req: RequestInfo, path: &Path, _flags: u32) -> ResultOpen {
        debug!("opendir '{}'", Partial::from(path));
        // readdir recomputes the union listing from scratch on every call, so
        // there is no host descriptor to hand back here.
        Ok((0, 0))
    }

    fn releasedir(&self, _req: RequestInfo, path: &Path, _fh: u64, _flags: u32) -> ResultEmpty {
        debug!("releasedir '{}'", Partial::from(path));
        Ok(())
    }

    fn readdir(&self, _req: RequestInfo, path: &Path, _fh: u64) -> ResultReaddir {
        let partial = Partial::from(path);
        debug!("readdir '{partial}'");
        let shadow = self.shadow.lock().expect("shadow set lock poisoned");
        let merger = DirectoryMerger::new(&self.promote);
        let names = match merger.list(&shadow, &partial) {
            Ok(n) => n,
            Err(e) => return Err(to_errno("readdir", e)),
        };

        let mut entries = vec![
            DirectoryEntry {
                name: ".".into(),
                kind: fuse_mt::FileType::Directory,
            },
            DirectoryEntry {
                name: "..".into(),
                kind: fuse_mt::FileType::Directory,
            },
        ];
        for name in names {
            let child_host = self
                .promote
                .resolve_readonly(&shadow, &partial.join(&name));
            let kind = attrs::lstat(&child_host)
                .map(|a| a.kind)
                .unwrap_or(fuse_mt::FileType::RegularFile);
            entries.push(DirectoryEntry {
                name: name.into(),
                kind,
            });
        }
        Ok(entries)
    }

    fn statfs(&self, _req: RequestInfo, path: &Path) -> ResultStatfs {
        let partial = Partial::from(path);
        debug!("statfs '{partial}'");
        let host = self.resolve_readonly(&partial);
        match attrs::statvfs(&host) {
            Ok(s) => Ok(s),
            Err(e) => Err(to_errno("statfs", e)),
        }
    }

    fn open(&self, _req: RequestInfo, path: &Path, flags: u32) -> ResultOpen {
        let partial = Partial::from(path);
        debug!("open '{partial}' flags={flags:#o}");
        let signed_flags = flags as i32;
        let host = if signed_flags & WRITE_INTENT != 0 {
            match self.resolve_write(&partial) {
                Ok(h) => h,
                Err(e) => return Err(to_errno("open", e)),
            }
        } else {
            self.resolve_readonly(&partial)
        };

        let c_host = to_cstring(&host);
        let fd = unsafe { libc::open(c_host.as_ptr(), signed_flags) };
        if fd < 0 {
            return Err(io_to_errno("open", std::io::Error::last_os_error()));
        }

        let mut handles = self.handles.lock().expect("handle table lock poisoned");
        let handle = handles.open_handle(partial, fd, signed_flags);
        Ok((handle, flags))
    }

    fn create(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> ResultCreate {
        let partial = parent_and_name(parent, name);
        debug!("create '{partial}' mode={mode:#o}");
        let host = match self.resolve_write(&partial) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("create", e)),
        };

        let open_flags = flags as i32 | libc::O_CREAT;
        let c_host = to_cstring(&host);
        let fd = unsafe { libc::open(c_host.as_ptr(), open_flags, mode as libc::mode_t) };
        if fd < 0 {
            return Err(io_to_errno("create", std::io::Error::last_os_error()));
        }

        let attr = match attrs::lstat(&host) {
            Ok(a) => a,
            Err(e) => return Err(to_errno("create", e)),
        };

        let mut handles = self.handles.lock().expect("handle table lock poisoned");
        let fh = handles.open_handle(partial, fd, open_flags);
        Ok(CreatedEntry {
            ttl: TTL,
            attr,
            fh,
            flags,
        })
    }

    fn read(
        &self,
        _req: RequestInfo,
        path: &Path,
        fh: u64,
        offset: u64,
        size: u32,
        callback: impl FnOnce(fuse_mt::ResultSlice<'_>) -> CallbackResult,
    ) -> CallbackResult {
        let _ = path;
        let mut handles = self.handles.lock().expect("handle table lock poisoned");
        let stored = match handles.partial_of(fh) {
            Ok(p) => p,
            Err(e) => return callback(Err(to_errno("read", e))),
        };
        debug!("read '{stored}' fh={fh} offset={offset} size={size}");
        let host = self.resolve_readonly(&stored);
        let fd = match handles.get_fd(fh, &stored, &host) {
            Ok(fd) => fd,
            Err(e) => return callback(Err(to_errno("read", e))),
        };
        drop(handles);

        let mut buf = vec![0u8; size as usize];
        let n = unsafe {
            libc::pread(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                offset as libc::off_t,
            )
        };
        if n < 0 {
            return callback(Err(io_to_errno("read", std::io::Error::last_os_error())));
        }
        buf.truncate(n as usize);
        callback(Ok(&buf))
    }

    fn write(
        &self,
        _req: RequestInfo,
        path: &Path,
        fh: u64,
        offset: u64,
        data: Vec<u8>,
        _flags: u32,
    ) -> ResultWrite {
        let _ = path;
        let mut handles = self.handles.lock().expect("handle table lock poisoned");
        let stored = match handles.partial_of(fh) {
            Ok(p) => p,
            Err(e) => return Err(to_errno("write", e)),
        };
        debug!("write '{stored}' fh={fh} offset={offset} len={}", data.len());
        let host = match self.resolve_write(&stored) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("write", e)),
        };
        let fd = match handles.get_fd(fh, &stored, &host) {
            Ok(fd) => fd,
            Err(e) => return Err(to_errno("write", e)),
        };
        drop(handles);

        let n = unsafe {
            libc::pwrite(
                fd,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                offset as libc::off_t,
            )
        };
        if n < 0 {
            return Err(io_to_errno("write", std::io::Error::last_os_error()));
        }
        Ok(n as u32)
    }

    fn flush(&self, _req: RequestInfo, path: &Path, fh: u64, _lock_owner: u64) -> ResultEmpty {
        debug!("flush '{}' fh={fh}", Partial::from(path));
        Ok(())
    }

    fn release(
        &self,
        _req: RequestInfo,
        path: &Path,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> ResultEmpty {
        debug!("release '{}' fh={fh}", Partial::from(path));
        let mut handles = self.handles.lock().expect("handle table lock poisoned");
        match handles.close_handle(fh) {
            Ok(()) => Ok(()),
            Err(e) => Err(to_errno("release", e)),
        }
    }

    fn fsync(&self, _req: RequestInfo, _path: &Path, fh: u64, datasync: bool) -> ResultEmpty {
        let mut handles = self.handles.lock().expect("handle table lock poisoned");
        let stored = match handles.partial_of(fh) {
            Ok(p) => p,
            Err(e) => return Err(to_errno("fsync", e)),
        };
        debug!("fsync '{stored}' fh={fh} datasync={datasync}");
        // fsync is a write operation per the design: a handle that was opened
        // read-only but never promoted (e.g. fsync'd without an intervening
        // write) must still be promoted here, mirroring `write`'s handling.
        let host = match self.resolve_write(&stored) {
            Ok(h) => h,
            Err(e) => return Err(to_errno("fsync", e)),
        };
        let fd = match handles.get_fd(fh, &stored, &host) {
            Ok(fd) => fd,
            Err(e) => return Err(to_errno("fsync", e)),
        };
        drop(handles);

        let rc = unsafe {
            if datasync {
                libc::fdatasync(fd)
            } else {
                libc::fsync(fd)
            }
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io_to_errno("fsync", std::io::Error::last_os_error()))
        }
    }
}
