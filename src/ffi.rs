/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Host paths come from joining UTF-8 partials onto host roots; they never
/// contain an interior NUL, so this conversion cannot fail in practice.
pub fn to_cstring(path: &Path) -> CString {
    CString::new(path.as_os_str().as_bytes()).expect("host path has no interior NUL")
}
