/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{FromRawFd, IntoRawFd};

use crate::error::{OverlayError, Result};
use crate::partial::Partial;

struct HandleEntry {
    fd: i32,
    partial: Partial,
    open_flags: i32,
}

/// Maps externally visible handle IDs to live OS descriptors.
///
/// A handle ID is the smallest non-negative integer not already in use at
/// creation time. When the backing path of an open handle changes layer
/// (lower → upper, via promotion), [`HandleTable::get_fd`] transparently
/// closes the stale descriptor and reopens the stored partial with the
/// original open flags.
pub struct HandleTable {
    entries: HashMap<u64, HandleEntry>,
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable {
            entries: HashMap::new(),
        }
    }

    /// Registers an already-open OS descriptor, returning its handle ID.
    pub fn open_handle(&mut self, partial: Partial, fd: i32, open_flags: i32) -> u64 {
        let mut handle = 0u64;
        while self.entries.contains_key(&handle) {
            handle += 1;
        }
        self.entries.insert(
            handle,
            HandleEntry {
                fd,
                partial,
                open_flags,
            },
        );
        handle
    }

    pub fn partial_of(&self, handle: u64) -> Result<Partial> {
        self.entries
            .get(&handle)
            .map(|e| e.partial.clone())
            .ok_or(OverlayError::UnknownHandle(handle))
    }

    /// Returns a valid fd for `handle`, re-opening it at `current_host_path`
    /// (the partial's freshly-resolved host path, computed by the caller via
    /// the Promotion Engine) if the entry is currently bound to a different
    /// partial than `desired_partial`. In current call sites `desired_partial`
    /// is always the stored partial, so the re-open branch is effectively a
    /// no-op; it is retained for symmetry with a future `rename`
    /// implementation that rebinds a handle to a new path.
    pub fn get_fd(
        &mut self,
        handle: u64,
        desired_partial: &Partial,
        current_host_path: &std::path::Path,
    ) -> Result<i32> {
        let entry = self
            .entries
            .get_mut(&handle)
            .ok_or(OverlayError::UnknownHandle(handle))?;

        if &entry.partial == desired_partial {
            return Ok(entry.fd);
        }

        unsafe {
            File::from_raw_fd(entry.fd);
        } // closes on drop
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(entry.open_flags)
            .open(current_host_path)?;
        entry.fd = file.into_raw_fd();
        Ok(entry.fd)
    }

    pub fn close_handle(&mut self, handle: u64) -> Result<()> {
        let entry = self
            .entries
            .remove(&handle)
            .ok_or(OverlayError::UnknownHandle(handle))?;
        unsafe {
            File::from_raw_fd(entry.fd);
        } // closes on drop
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn open_real_fd(dir: &std::path::Path, name: &str) -> i32 {
        let path = dir.join(name);
        File::create(&path).unwrap();
        let file = File::open(&path).unwrap();
        file.into_raw_fd()
    }

    #[test]
    fn handle_ids_reuse_the_smallest_free_slot() {
        let dir = tempdir().unwrap();
        let mut table = HandleTable::new();
        let fd_a = open_real_fd(dir.path(), "a");
        let fd_b = open_real_fd(dir.path(), "b");
        let a = table.open_handle(Partial::new("/a"), fd_a, 0);
        let b = table.open_handle(Partial::new("/b"), fd_b, 0);
        assert_eq!(a, 0);
        assert_eq!(b, 1);

        table.close_handle(a).unwrap();

        let fd_c = open_real_fd(dir.path(), "c");
        let c = table.open_handle(Partial::new("/c"), fd_c, 0);
        assert_eq!(c, 0, "smallest free handle id is reused");

        table.close_handle(b).unwrap();
        table.close_handle(c).unwrap();
    }

    #[test]
    fn unknown_handle_is_reported() {
        let table = HandleTable::new();
        let err = table.partial_of(42).unwrap_err();
        assert!(matches!(err, OverlayError::UnknownHandle(42)));
    }
}
