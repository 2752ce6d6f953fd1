/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Copy-on-write FUSE overlay engine: reads fall through to a read-only lower
//! tree, the first write to a path materializes it into a read-write upper
//! tree, and all future access to it is served from upper.
//!
//! `main.rs` wires this engine to a live FUSE mount; the `tests/` suite
//! exercises it directly against `tempfile`-built lower/upper trees.

pub mod args;
pub mod attrs;
pub mod error;
pub mod ffi;
pub mod handles;
pub mod logging;
pub mod merge;
pub mod overlay;
pub mod partial;
pub mod paths;
pub mod promote;
pub mod shadow;
