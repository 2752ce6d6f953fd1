/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt::Display;
use std::path::Path;

/// A slash-separated path as seen by the filesystem client, always starting with `/`.
///
/// Normalized on construction: trailing slashes are stripped and an empty tail
/// collapses to `/`. This is the only path currency the overlay engine deals in;
/// host paths are derived from it on demand by [`crate::paths::PathMapper`].
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Partial(String);

impl Display for Partial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Partial {
    fn from(value: &str) -> Self {
        Partial::new(value)
    }
}

impl From<String> for Partial {
    fn from(value: String) -> Self {
        Partial::new(&value)
    }
}

impl From<&Path> for Partial {
    fn from(value: &Path) -> Self {
        // FUSE callbacks already hand us absolute, slash-separated paths; this
        // is a lossy but sufficient conversion since we never support non-UTF8 names.
        Partial::new(&value.to_string_lossy())
    }
}

impl AsRef<str> for Partial {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Partial {
    pub fn root() -> Self {
        Partial("/".to_owned())
    }

    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim_end_matches('/');
        if trimmed.is_empty() {
            Partial::root()
        } else if trimmed.starts_with('/') {
            Partial(trimmed.to_owned())
        } else {
            Partial(format!("/{trimmed}"))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Trimmed, leading-slash-free tail used to join onto a host root.
    pub fn tail(&self) -> &str {
        self.0.trim_start_matches('/')
    }

    /// The parent partial. `parent("/") == "/"`, which terminates ancestor walks.
    pub fn parent(&self) -> Partial {
        if self.is_root() {
            return self.clone();
        }
        match self.0.rfind('/') {
            Some(0) => Partial::root(),
            Some(idx) => Partial(self.0[..idx].to_owned()),
            None => Partial::root(),
        }
    }

    pub fn join(&self, name: &str) -> Partial {
        if self.is_root() {
            Partial(format!("/{name}"))
        } else {
            Partial(format!("{}/{name}", self.0))
        }
    }

    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }
}
