/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::{Path, PathBuf};

use crate::partial::Partial;

/// Joins a host root with a partial's tail, trimming the leading slash off the
/// tail and any trailing slash off the result. Pure, no I/O.
pub fn join(root: &Path, partial: &Partial) -> PathBuf {
    if partial.is_root() {
        root.to_path_buf()
    } else {
        root.join(partial.tail())
    }
}

/// Resolves partial paths against the lower (read-only) and upper (read-write)
/// roots. Does no I/O and never fails: it is pure path arithmetic.
#[derive(Clone)]
pub struct PathMapper {
    lower_root: PathBuf,
    upper_root: PathBuf,
    fake_root: PathBuf,
}

impl PathMapper {
    pub fn new(lower_root: PathBuf, upper_root: PathBuf) -> Self {
        let fake_root = upper_root.join("fake_root");
        PathMapper {
            lower_root,
            upper_root,
            fake_root,
        }
    }

    pub fn lower_root(&self) -> &Path {
        &self.lower_root
    }

    pub fn upper_root(&self) -> &Path {
        &self.upper_root
    }

    pub fn fake_root(&self) -> &Path {
        &self.fake_root
    }

    pub fn shadow_file(&self) -> PathBuf {
        self.upper_root.join("shadow")
    }

    /// `L/P`
    pub fn real_of(&self, partial: &Partial) -> PathBuf {
        join(&self.lower_root, partial)
    }

    /// `U/fake_root/P`
    pub fn fake_of(&self, partial: &Partial) -> PathBuf {
        join(&self.fake_root, partial)
    }
}
