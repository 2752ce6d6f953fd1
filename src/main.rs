/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use clap::Parser;
use fuse_mt::FuseMT;
use log::info;

use layerfs::args::Args;
use layerfs::logging;
use layerfs::overlay::OverlayFs;
use layerfs::paths::PathMapper;
use layerfs::shadow::ShadowSet;

fn main() {
    let status = run();
    if let Err(ref err) = status {
        eprintln!("layerfs: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.debug).context("failed to init logger")?;

    let src = Path::new(&args.src);
    if !src.is_dir() {
        bail!("source '{}' is not a directory", args.src);
    }

    let layer_storage = Path::new(&args.layer_storage);
    if layer_storage.exists() && !layer_storage.is_dir() {
        bail!(
            "layer storage '{}' exists and is not a directory",
            args.layer_storage
        );
    }
    fs::create_dir_all(layer_storage)
        .with_context(|| format!("failed to create layer storage at '{}'", args.layer_storage))?;

    let dst = Path::new(&args.dst);
    if !dst.is_dir() {
        bail!("mount point '{}' is not an existing directory", args.dst);
    }

    let paths = PathMapper::new(src.to_path_buf(), layer_storage.to_path_buf());
    fs::create_dir_all(paths.fake_root())
        .context("failed to create the upper layer's fake root")?;

    let shadow = ShadowSet::load(paths.shadow_file()).context("failed to load shadow log")?;
    info!(
        "loaded shadow set with {} promoted path(s) from '{}'",
        shadow.len(),
        paths.shadow_file().display()
    );

    let overlay = OverlayFs::new(paths, shadow);

    info!("mounting '{}' -> '{}'", args.src, args.dst);
    fuse_mt::mount(FuseMT::new(overlay, 1), &args.dst, &[])
        .with_context(|| format!("failed to mount overlay at '{}'", args.dst))?;

    Ok(())
}
