/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use walkdir::WalkDir;

use crate::error::Result;
use crate::partial::Partial;
use crate::paths::PathMapper;
use crate::shadow::ShadowSet;

/// Default mode used for intermediate directories created while materializing
/// a promotion. The original permissions of lower-tree ancestors are not
/// propagated; see DESIGN.md for why this is a deliberate, documented gap
/// rather than an oversight.
const DEFAULT_DIR_MODE: u32 = 0o755;

/// Decides, for a partial, which host path should currently serve it, and
/// materializes it into the upper layer on demand.
pub struct PromotionEngine {
    paths: PathMapper,
}

impl PromotionEngine {
    pub fn new(paths: PathMapper) -> Self {
        PromotionEngine { paths }
    }

    pub fn paths(&self) -> &PathMapper {
        &self.paths
    }

    /// Read-only resolution: never promotes. Safe to call from contexts (like
    /// `access`) that must not dirty the upper tree just by looking.
    pub fn resolve_readonly(&self, shadow: &ShadowSet, partial: &Partial) -> PathBuf {
        if shadow.contains_or_ancestor(partial) {
            self.paths.fake_of(partial)
        } else {
            self.paths.real_of(partial)
        }
    }

    /// Full decision table from the design: resolves `partial`, promoting it
    /// (and copying down its lower content) if it is lower-backed and the
    /// caller needs to write through it.
    pub fn resolve(
        &self,
        shadow: &mut ShadowSet,
        partial: &Partial,
        force_fake: bool,
    ) -> Result<PathBuf> {
        if shadow.contains_or_ancestor(partial) {
            return Ok(self.paths.fake_of(partial));
        }
        if !force_fake {
            return Ok(self.paths.real_of(partial));
        }

        let dst = self.paths.fake_of(partial);
        let src = self.paths.real_of(partial);

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }

        if src.exists() {
            if src.is_dir() {
                copy_tree(&self.paths, shadow, partial, &src, &dst)?;
            } else {
                copy_file(&src, &dst)?;
            }
        }
        // If `src` doesn't exist, `dst` doesn't either; the caller (create,
        // mknod, mkdir) materializes the entry itself after we return.

        shadow.insert(partial.clone())?;
        Ok(dst)
    }
}

/// Recursively copies `src` into `dst`, merging with any existing `dst` and
/// skipping descendants already present in the shadow set — those carry the
/// user's own modifications and must not be clobbered by the lower-tree copy.
fn copy_tree(
    paths: &PathMapper,
    shadow: &ShadowSet,
    root_partial: &Partial,
    src: &Path,
    dst: &Path,
) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1).into_iter() {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).expect("walkdir yields children of src");
        let entry_partial = rel
            .components()
            .fold(root_partial.clone(), |acc, c| acc.join(&c.as_os_str().to_string_lossy()));

        if shadow.contains_or_ancestor(&entry_partial) {
            continue;
        }

        let entry_dst = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&entry_dst)?;
            preserve_metadata(entry.path(), &entry_dst)?;
        } else {
            if let Some(parent) = entry_dst.parent() {
                fs::create_dir_all(parent)?;
            }
            copy_file(entry.path(), &entry_dst)?;
        }
    }

    preserve_metadata(src, dst)?;
    let _ = paths; // kept for symmetry with single-file promotion call sites
    Ok(())
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)?;
    preserve_metadata(src, dst)?;
    Ok(())
}

/// Preserves mtime/atime and mode unconditionally; ownership is attempted
/// best-effort since an unprivileged process cannot `chown` to an arbitrary
/// uid/gid ("where permitted" per the design).
fn preserve_metadata(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::metadata(src)?;

    fs::set_permissions(dst, meta.permissions())?;

    let atime = FileTime::from_last_access_time(&meta);
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(dst, atime, mtime)?;

    let dst_c = CString::new(dst.as_os_str().as_bytes()).expect("host path has no interior NUL");
    let rc = unsafe { libc::chown(dst_c.as_ptr(), meta.uid(), meta.gid()) };
    if rc != 0 {
        log::debug!(
            "preserve_metadata: chown('{}') failed: {}",
            dst.display(),
            std::io::Error::last_os_error()
        );
    }

    Ok(())
}

/// Intermediate directories that the default promotion path needs but that
/// have no lower-tree counterpart to copy metadata from (e.g. the parent of
/// a brand-new `mkdir`) get a fixed default mode.
pub fn default_dir_mode() -> u32 {
    DEFAULT_DIR_MODE
}
