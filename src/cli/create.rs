// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use crate::{
    create::{self, CreateOptions},
    format::bmap::{ChecksumType, DEFAULT_BLOCK_SIZE},
    source::SourceReader,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ChecksumArg {
    Sha1,
    Sha256,
    Sha512,
}

impl From<ChecksumArg> for ChecksumType {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Sha1 => Self::Sha1,
            ChecksumArg::Sha256 => Self::Sha256,
            ChecksumArg::Sha512 => Self::Sha512,
        }
    }
}

/// Create a bmap for an image.
#[derive(Debug, Parser)]
pub struct CreateCli {
    /// Source image (path, file:// URL, or http(s):// URL).
    pub image: String,

    /// Write the bmap to this file instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Block size in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: u32,

    /// Digest algorithm for all checksums in the bmap.
    #[arg(long, value_enum, value_name = "ALGO", default_value = "sha256")]
    pub checksum: ChecksumArg,
}

pub fn create_main(cli: &CreateCli) -> Result<()> {
    let mut source = SourceReader::open(&cli.image)
        .with_context(|| format!("Failed to open source: {}", cli.image))?;

    let options = CreateOptions {
        block_size: cli.block_size,
        checksum_type: cli.checksum.into(),
    };

    let bmap = create::generate_from(&mut source, &options)
        .with_context(|| format!("Failed to create bmap for: {}", cli.image))?;

    let data = bmap.serialize().context("Failed to serialize bmap")?;

    match &cli.output {
        Some(path) => fs::write(path, data)
            .with_context(|| format!("Failed to write bmap: {path:?}"))?,
        None => io::stdout()
            .write_all(data.as_bytes())
            .context("Failed to write bmap to stdout")?,
    }

    info!(
        "Mapped {} of {} blocks ({}%)",
        bmap.mapped_blocks_count, bmap.blocks_count, bmap.mapped_blocks_percent
    );

    Ok(())
}
