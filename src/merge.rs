/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;
use std::fs;

use crate::error::{OverlayError, Result};
use crate::partial::Partial;
use crate::promote::PromotionEngine;
use crate::shadow::ShadowSet;

/// Produces the union directory listing of a partial, excluding `.` and `..`.
pub struct DirectoryMerger<'a> {
    promote: &'a PromotionEngine,
}

impl<'a> DirectoryMerger<'a> {
    pub fn new(promote: &'a PromotionEngine) -> Self {
        DirectoryMerger { promote }
    }

    pub fn list(&self, shadow: &ShadowSet, partial: &Partial) -> Result<HashSet<String>> {
        let host = self.promote.resolve_readonly(shadow, partial);
        let fake = self.promote.paths().fake_of(partial);

        if host == fake {
            // Once promoted, upper is authoritative: there is no lower content
            // left to merge in, either it was copied at promotion time or it
            // never existed.
            log::debug!("merge '{partial}': already promoted, upper authoritative");
            return list_dir_names(&host);
        }

        if !host.exists() {
            return Err(OverlayError::NotFound(partial.clone()));
        }
        if !host.is_dir() {
            return Err(OverlayError::NotADir(partial.clone()));
        }

        let mut names = list_dir_names(&host)?;

        for child in shadow.children_of(partial) {
            let child_host = self.promote.resolve_readonly(shadow, child);
            if child_host.exists() {
                log::debug!("merge '{partial}': including promoted sibling '{child}'");
                names.insert(child.file_name().to_owned());
            }
        }

        Ok(names)
    }
}

fn list_dir_names(dir: &std::path::Path) -> Result<HashSet<String>> {
    let mut names = HashSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::PathMapper;
    use std::fs;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, PromotionEngine, ShadowSet) {
        let lower = tempdir().unwrap();
        let upper = tempdir().unwrap();
        let paths = PathMapper::new(lower.path().to_path_buf(), upper.path().to_path_buf());
        let engine = PromotionEngine::new(paths.clone());
        let shadow = ShadowSet::load(paths.shadow_file()).unwrap();
        (lower, upper, engine, shadow)
    }

    #[test]
    fn lists_lower_only_directory() {
        let (lower, _upper, engine, shadow) = setup();
        fs::create_dir(lower.path().join("d")).unwrap();
        fs::write(lower.path().join("d/x"), "").unwrap();
        fs::write(lower.path().join("d/y"), "").unwrap();

        let merger = DirectoryMerger::new(&engine);
        let names = merger.list(&shadow, &Partial::new("/d")).unwrap();
        assert_eq!(names, HashSet::from(["x".to_owned(), "y".to_owned()]));
    }

    #[test]
    fn promoted_child_appears_alongside_untouched_lower_siblings() {
        let (lower, _upper, engine, mut shadow) = setup();
        fs::create_dir(lower.path().join("d")).unwrap();
        fs::write(lower.path().join("d/x"), "lower").unwrap();
        fs::write(lower.path().join("d/y"), "lower").unwrap();

        engine
            .resolve(&mut shadow, &Partial::new("/d/x"), true)
            .unwrap();

        let merger = DirectoryMerger::new(&engine);
        let names = merger.list(&shadow, &Partial::new("/d")).unwrap();
        assert_eq!(names, HashSet::from(["x".to_owned(), "y".to_owned()]));
    }

    #[test]
    fn once_directory_itself_is_promoted_upper_is_authoritative() {
        let (lower, _upper, engine, mut shadow) = setup();
        fs::create_dir(lower.path().join("d")).unwrap();
        fs::write(lower.path().join("d/x"), "lower").unwrap();

        engine
            .resolve(&mut shadow, &Partial::new("/d"), true)
            .unwrap();
        let fake_dir = engine.paths().fake_of(&Partial::new("/d"));
        fs::write(fake_dir.join("new_only_upper"), "").unwrap();
        fs::remove_file(fake_dir.join("x")).unwrap();

        let merger = DirectoryMerger::new(&engine);
        let names = merger.list(&shadow, &Partial::new("/d")).unwrap();
        assert_eq!(names, HashSet::from(["new_only_upper".to_owned()]));
    }

    #[test]
    fn missing_directory_is_enoent() {
        let (_lower, _upper, engine, shadow) = setup();
        let merger = DirectoryMerger::new(&engine);
        let err = merger.list(&shadow, &Partial::new("/missing")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn non_directory_is_enotdir() {
        let (lower, _upper, engine, shadow) = setup();
        fs::write(lower.path().join("f"), "").unwrap();
        let merger = DirectoryMerger::new(&engine);
        let err = merger.list(&shadow, &Partial::new("/f")).unwrap_err();
        assert_eq!(err.errno(), libc::ENOTDIR);
    }

    #[test]
    fn upper_only_child_created_without_promoting_parent_is_listed() {
        let (lower, upper, engine, mut shadow) = setup();
        fs::create_dir(lower.path().join("d")).unwrap();
        fs::create_dir_all(upper.path().join("fake_root/d")).unwrap();
        fs::write(upper.path().join("fake_root/d/only_upper"), "").unwrap();
        shadow.insert(Partial::new("/d/only_upper")).unwrap();

        let merger = DirectoryMerger::new(&engine);
        let names = merger.list(&shadow, &Partial::new("/d")).unwrap();
        assert_eq!(names, HashSet::from(["only_upper".to_owned()]));
    }
}
