// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::{
    copy::{self, CopyOptions},
    format::bmap::Bmap,
};

/// Copy an image to a file or block device, using a bmap when available.
#[derive(Debug, Parser)]
pub struct CopyCli {
    /// Source image (path, file:// URL, or http(s):// URL).
    pub source: String,

    /// Destination file or block device.
    pub dest: PathBuf,

    /// Bmap file. Defaults to searching next to a local source.
    #[arg(long, value_name = "FILE")]
    pub bmap: Option<PathBuf>,

    /// Copy the full stream even if a bmap file is available.
    #[arg(long, conflicts_with = "bmap")]
    pub no_bmap: bool,

    /// Skip checksum verification of copied ranges.
    #[arg(long)]
    pub no_verify: bool,

    /// Do not report transfer progress.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Search for a bmap next to a local source by appending `.bmap` and then
/// progressively stripping extensions: `image.tar.gz` is looked up as
/// `image.tar.gz.bmap`, `image.tar.bmap`, and `image.bmap`.
fn discover_bmap(source: &str) -> Option<PathBuf> {
    if source.contains("://") {
        return None;
    }

    let mut candidate = PathBuf::from(format!("{source}.bmap"));

    loop {
        if candidate.is_file() {
            return Some(candidate);
        }

        let stem = candidate.file_stem()?.to_os_string();
        let inner_stem = Path::new(&stem).file_stem()?;
        if inner_stem == stem.as_os_str() {
            return None;
        }

        candidate = candidate.with_file_name(format!("{}.bmap", inner_stem.to_string_lossy()));
    }
}

fn load_bmap(path: &Path) -> Result<Bmap> {
    let data =
        fs::read_to_string(path).with_context(|| format!("Failed to read bmap: {path:?}"))?;
    let bmap = Bmap::parse(&data).with_context(|| format!("Failed to parse bmap: {path:?}"))?;

    Ok(bmap)
}

pub fn copy_main(cli: &CopyCli) -> Result<()> {
    let bmap_path = if cli.no_bmap {
        None
    } else {
        cli.bmap.clone().or_else(|| discover_bmap(&cli.source))
    };

    let bmap = match &bmap_path {
        Some(path) => {
            info!("Using bmap: {path:?}");
            Some(load_bmap(path)?)
        }
        None => {
            if !cli.no_bmap {
                warn!("No bmap found; copying the full stream");
            }
            None
        }
    };

    let mut last_percent = None;
    let mut progress = |copied: u64, total: Option<u64>| {
        if let Some(total) = total.filter(|t| *t > 0) {
            let percent = copied * 100 / total;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                eprint!("\rCopying: {percent}%");
            }
        }
    };

    let progress: Option<&mut copy::ProgressFn> = if cli.quiet {
        None
    } else {
        Some(&mut progress)
    };

    let options = CopyOptions {
        verify: !cli.no_verify,
        progress,
    };

    let result = copy::copy(&cli.source, &cli.dest, bmap.as_ref(), options);

    if last_percent.is_some() {
        eprintln!();
    }

    result.with_context(|| format!("Failed to copy {} to {:?}", cli.source, cli.dest))?;

    info!("Copied {} to {:?}", cli.source, cli.dest);

    Ok(())
}
