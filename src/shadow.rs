/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{OverlayError, Result};
use crate::partial::Partial;

/// The persistent set of partials that have been promoted to the upper layer.
///
/// `P ∈ S` means "P itself has been promoted." Membership only grows for the
/// life of the mount (see [`ShadowSet::insert`]); `/` is never a member, since
/// the root is implicitly shared.
pub struct ShadowSet {
    members: HashSet<Partial>,
    log_path: PathBuf,
}

impl ShadowSet {
    /// Loads `S` from `log_path` if it exists; otherwise starts empty.
    pub fn load(log_path: PathBuf) -> Result<Self> {
        let members = if log_path.exists() {
            let data = fs::read_to_string(&log_path)?;
            data.split('\n')
                .filter(|line| !line.is_empty())
                .map(Partial::new)
                .collect()
        } else {
            HashSet::new()
        };
        Ok(ShadowSet { members, log_path })
    }

    /// True if `partial` or any proper ancestor of it is in `S`.
    ///
    /// Walked iteratively rather than recursively (see design notes on deep
    /// trees): `parent("/") == "/"` terminates the walk.
    pub fn contains_or_ancestor(&self, partial: &Partial) -> bool {
        let mut current = partial.clone();
        loop {
            if self.members.contains(&current) {
                return true;
            }
            if current.is_root() {
                return false;
            }
            current = current.parent();
        }
    }

    pub fn contains(&self, partial: &Partial) -> bool {
        self.members.contains(partial)
    }

    /// All members whose parent is exactly `parent` — the promoted siblings
    /// the [`crate::merge::DirectoryMerger`] needs alongside lower listings.
    pub fn children_of<'a>(&'a self, parent: &'a Partial) -> impl Iterator<Item = &'a Partial> {
        self.members.iter().filter(move |p| &p.parent() == parent)
    }

    /// Appends `partial` to the on-disk log before mutating the in-memory set.
    /// If the append fails the in-memory set is left untouched.
    pub fn insert(&mut self, partial: Partial) -> Result<()> {
        if self.members.contains(&partial) {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(OverlayError::ShadowAppend)?;
        writeln!(file, "{partial}").map_err(OverlayError::ShadowAppend)?;
        log::debug!("promote '{partial}'");
        self.members.insert(partial);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[cfg(test)]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_when_log_missing() {
        let dir = tempdir().unwrap();
        let shadow = ShadowSet::load(dir.path().join("shadow")).unwrap();
        assert!(shadow.is_empty());
        assert!(!shadow.contains_or_ancestor(&Partial::new("/a")));
    }

    #[test]
    fn insert_persists_and_ancestor_lookup_sticks() {
        let dir = tempdir().unwrap();
        let mut shadow = ShadowSet::load(dir.path().join("shadow")).unwrap();
        shadow.insert(Partial::new("/a/b")).unwrap();

        assert!(shadow.contains_or_ancestor(&Partial::new("/a/b")));
        assert!(shadow.contains_or_ancestor(&Partial::new("/a/b/c")));
        assert!(!shadow.contains_or_ancestor(&Partial::new("/a")));
        assert!(!shadow.contains_or_ancestor(&Partial::new("/a/bb")));

        let reloaded = ShadowSet::load(shadow.log_path().to_path_buf()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&Partial::new("/a/b")));
    }

    #[test]
    fn duplicate_lines_collapse_on_load() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("shadow");
        fs::write(&log_path, "/a\n/a\n/b\n").unwrap();
        let shadow = ShadowSet::load(log_path).unwrap();
        assert_eq!(shadow.len(), 2);
    }

    #[test]
    fn empty_lines_are_ignored_on_load() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("shadow");
        fs::write(&log_path, "/a\n\n/b\n\n").unwrap();
        let shadow = ShadowSet::load(log_path).unwrap();
        assert_eq!(shadow.len(), 2);
    }

    #[test]
    fn children_of_filters_by_direct_parent() {
        let dir = tempdir().unwrap();
        let mut shadow = ShadowSet::load(dir.path().join("shadow")).unwrap();
        shadow.insert(Partial::new("/d/x")).unwrap();
        shadow.insert(Partial::new("/d/y/z")).unwrap();

        let children: Vec<_> = shadow.children_of(&Partial::new("/d")).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(*children[0], Partial::new("/d/x"));
    }
}
