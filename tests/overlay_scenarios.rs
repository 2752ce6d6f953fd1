/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! End-to-end scenarios composed from Path Mapper + Shadow Set + Promotion
//! Engine + Directory Merger + Handle Table, without a live FUSE mount.

use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;

use layerfs::handles::HandleTable;
use layerfs::merge::DirectoryMerger;
use layerfs::partial::Partial;
use layerfs::paths::PathMapper;
use layerfs::promote::PromotionEngine;
use layerfs::shadow::ShadowSet;
use tempfile::TempDir;

struct Mount {
    lower: TempDir,
    upper: TempDir,
    engine: PromotionEngine,
    shadow: ShadowSet,
}

impl Mount {
    fn new() -> Self {
        let lower = TempDir::new().unwrap();
        let upper = TempDir::new().unwrap();
        let paths = PathMapper::new(lower.path().to_path_buf(), upper.path().to_path_buf());
        fs::create_dir_all(paths.fake_root()).unwrap();
        let shadow = ShadowSet::load(paths.shadow_file()).unwrap();
        let engine = PromotionEngine::new(paths);
        Mount {
            lower,
            upper,
            engine,
            shadow,
        }
    }

    fn read(&self, partial: &str) -> String {
        let host = self
            .engine
            .resolve_readonly(&self.shadow, &Partial::new(partial));
        fs::read_to_string(host).unwrap()
    }

    fn write(&mut self, partial: &str, data: &str) {
        let host = self
            .engine
            .resolve(&mut self.shadow, &Partial::new(partial), true)
            .unwrap();
        fs::write(host, data).unwrap();
    }

    fn readdir(&self, partial: &str) -> std::collections::HashSet<String> {
        let merger = DirectoryMerger::new(&self.engine);
        merger.list(&self.shadow, &Partial::new(partial)).unwrap()
    }

    fn mkdir(&mut self, partial: &str) {
        let host = self
            .engine
            .resolve(&mut self.shadow, &Partial::new(partial), true)
            .unwrap();
        fs::create_dir(host).unwrap();
    }
}

fn to_cstring(path: &std::path::Path) -> CString {
    CString::new(path.as_os_str().as_bytes()).unwrap()
}

#[test]
fn scenario_1_read_through_to_lower_leaves_shadow_empty() {
    let m = Mount::new();
    fs::create_dir(m.lower.path().join("a")).unwrap();
    fs::write(m.lower.path().join("a/b.txt"), "hello").unwrap();

    assert_eq!(m.read("/a/b.txt"), "hello");
    assert!(m.shadow.is_empty());
}

#[test]
fn scenario_2_write_promotes_and_lower_stays_untouched() {
    let mut m = Mount::new();
    fs::create_dir(m.lower.path().join("a")).unwrap();
    fs::write(m.lower.path().join("a/b.txt"), "hello").unwrap();

    m.write("/a/b.txt", "world");

    assert!(m.shadow.contains(&Partial::new("/a/b.txt")));
    let fake = m.upper.path().join("fake_root/a/b.txt");
    assert_eq!(fs::read_to_string(&fake).unwrap(), "world");
    assert_eq!(
        fs::read_to_string(m.lower.path().join("a/b.txt")).unwrap(),
        "hello"
    );
    assert_eq!(m.read("/a/b.txt"), "world");
}

#[test]
fn scenario_3_promoting_one_sibling_leaves_the_other_lower_backed() {
    let mut m = Mount::new();
    fs::create_dir(m.lower.path().join("d")).unwrap();
    fs::write(m.lower.path().join("d/x"), "X-lower").unwrap();
    fs::write(m.lower.path().join("d/y"), "Y-lower").unwrap();

    m.write("/d/x", "X");

    let names = m.readdir("/d");
    assert_eq!(
        names,
        std::collections::HashSet::from(["x".to_owned(), "y".to_owned()])
    );

    assert!(m.shadow.contains(&Partial::new("/d/x")));
    assert!(!m.shadow.contains(&Partial::new("/d/y")));
    assert!(!m.shadow.contains_or_ancestor(&Partial::new("/d")));

    let y_host = m.engine.resolve_readonly(&m.shadow, &Partial::new("/d/y"));
    assert_eq!(y_host, m.lower.path().join("d/y"));
}

#[test]
fn scenario_4_mkdir_on_empty_mount_shows_up_in_root_listing() {
    let mut m = Mount::new();

    m.mkdir("/new");

    assert!(m.shadow.contains(&Partial::new("/new")));
    assert!(m.upper.path().join("fake_root/new").is_dir());
    assert!(m.readdir("/").contains("new"));
}

#[test]
fn scenario_5_remount_reuses_persisted_shadow_log() {
    let lower = TempDir::new().unwrap();
    let upper = TempDir::new().unwrap();
    fs::write(lower.path().join("a"), "original").unwrap();

    {
        let paths = PathMapper::new(lower.path().to_path_buf(), upper.path().to_path_buf());
        fs::create_dir_all(paths.fake_root()).unwrap();
        let mut shadow = ShadowSet::load(paths.shadow_file()).unwrap();
        let engine = PromotionEngine::new(paths);
        let host = engine
            .resolve(&mut shadow, &Partial::new("/a"), true)
            .unwrap();
        fs::write(host, "promoted").unwrap();
    }

    // Simulated remount: reload everything from the same layer_storage.
    let paths = PathMapper::new(lower.path().to_path_buf(), upper.path().to_path_buf());
    let shadow = ShadowSet::load(paths.shadow_file()).unwrap();
    let engine = PromotionEngine::new(paths);

    assert!(shadow.contains(&Partial::new("/a")));
    let host = engine.resolve_readonly(&shadow, &Partial::new("/a"));
    assert_eq!(fs::read_to_string(host).unwrap(), "promoted");
}

#[test]
fn scenario_6_handle_survives_promotion_of_its_backing_path() {
    let mut m = Mount::new();
    fs::write(m.lower.path().join("f"), "pre-promotion").unwrap();

    let mut handles = HandleTable::new();
    let initial_host = m.engine.resolve_readonly(&m.shadow, &Partial::new("/f"));
    let fd = unsafe { libc::open(to_cstring(&initial_host).as_ptr(), libc::O_RDONLY) };
    assert!(fd >= 0);
    let h = handles.open_handle(Partial::new("/f"), fd, libc::O_RDONLY);

    // A different client promotes /f through a write.
    m.write("/f", "post-promotion");

    // The original handle's next read must not error, regardless of which
    // content it observes.
    let stored = handles.partial_of(h).unwrap();
    let current_host = m.engine.resolve_readonly(&m.shadow, &stored);
    let live_fd = handles.get_fd(h, &stored, &current_host).unwrap();
    let mut buf = [0u8; 64];
    let n = unsafe { libc::pread(live_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
    assert!(n >= 0, "read after cross-handle promotion must not error");

    handles.close_handle(h).unwrap();
}
