/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Read-only lower tree to overlay
    pub src: String,

    /// Directory used to store promoted files and the shadow log
    pub layer_storage: String,

    /// Mountpoint presented to the rest of the system
    pub dst: String,

    /// Log at debug level instead of info
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}
