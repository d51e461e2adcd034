// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

//! Bmap generation.
//!
//! The generator walks the source's mapped extents in ascending order,
//! digesting each range, while accumulating a second digest over the entire
//! linear byte stream. Hole bytes read as zeros, so they are folded into the
//! image digest without touching the source. The single ascending pass is
//! what makes the whole-image digest computable without re-reading.

use std::io;

use ring::digest::Context;
use thiserror::Error;
use tracing::debug;

use crate::{
    extents::{self, Extent, ExtentKind},
    format::bmap::{self, BlockRange, Bmap, ChecksumType, DEFAULT_BLOCK_SIZE, FORMAT_VERSION},
    source::{self, SourceReader},
    stream::{self, ReadDiscardExt, ZEROS},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid block size (must be a power of two): {0}")]
    InvalidBlockSize(u32),
    #[error("Source size is unknown; cannot compute the block layout")]
    UnknownImageSize,
    #[error("Failed to read source at byte {offset}")]
    Read {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("Failed to seek source to byte {offset}")]
    Seek {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Source(#[from] source::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub block_size: u32,
    pub checksum_type: ChecksumType,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            checksum_type: ChecksumType::default(),
        }
    }
}

/// Generate a bmap for the image at `addr` with default options.
pub fn generate(addr: &str) -> Result<Bmap> {
    let mut source = SourceReader::open(addr)?;

    generate_from(&mut source, &CreateOptions::default())
}

/// Generate a bmap from an already-opened source positioned at offset 0.
///
/// Extent information is only available for local seekable sources; for
/// everything else the whole image is treated as mapped, which costs
/// sparseness but never correctness. The source size must be known.
pub fn generate_from(source: &mut SourceReader, options: &CreateOptions) -> Result<Bmap> {
    if options.block_size == 0 || !options.block_size.is_power_of_two() {
        return Err(Error::InvalidBlockSize(options.block_size));
    }

    let image_size = source.known_size().ok_or(Error::UnknownImageSize)?;
    let block_size = u64::from(options.block_size);
    let blocks_count = image_size.div_ceil(block_size);

    let extents = match source.as_local_file() {
        Some(file) => extents::mapped_extents(file, image_size, options.block_size),
        None => vec![Extent {
            blocks: 0..blocks_count,
            kind: ExtentKind::Mapped,
        }],
    };

    // The extent scan clobbers the file position of local sources.
    source
        .try_seek(0)
        .map_err(|e| Error::Seek { offset: 0, source: e })?;

    debug!(
        "Mapping {} extents over {blocks_count} blocks of {block_size} bytes",
        extents.len()
    );

    let algorithm = options.checksum_type.algorithm();
    let mut image_context = Context::new(algorithm);
    let mut block_map = Vec::with_capacity(extents.len());
    let mut mapped_blocks_count = 0;
    let mut pos = 0;

    for extent in extents.iter().filter(|e| e.kind == ExtentKind::Mapped) {
        let start = extent.blocks.start * block_size;
        let end = (extent.blocks.end * block_size).min(image_size);

        // Holes read back as zeros, so the image digest can absorb them
        // without any I/O.
        hash_zeros(&mut image_context, start - pos);

        if pos != start {
            let seeked = source
                .try_seek(start)
                .map_err(|e| Error::Seek { offset: start, source: e })?;

            if !seeked {
                source
                    .read_discard_exact(start - pos)
                    .map_err(|e| Error::Read { offset: pos, source: e })?;
            }
        }

        let mut range_context = Context::new(algorithm);

        stream::copy_n_inspect(&mut *source, io::sink(), end - start, |buf| {
            image_context.update(buf);
            range_context.update(buf);
        })
        .map_err(|e| Error::Read { offset: start, source: e })?;

        block_map.push(BlockRange {
            start_block: extent.blocks.start,
            end_block: extent.blocks.end,
            checksum: range_context.finish().as_ref().to_vec(),
        });

        mapped_blocks_count += extent.blocks.end - extent.blocks.start;
        pos = end;
    }

    // A trailing hole still contributes zeros to the image digest.
    hash_zeros(&mut image_context, image_size - pos);

    Ok(Bmap {
        version: FORMAT_VERSION.to_string(),
        image_size,
        block_size: options.block_size,
        blocks_count,
        mapped_blocks_count,
        mapped_blocks_percent: bmap::percent(mapped_blocks_count, blocks_count),
        checksum_type: options.checksum_type,
        image_checksum: image_context.finish().as_ref().to_vec(),
        block_map,
    })
}

fn hash_zeros(context: &mut Context, mut size: u64) {
    while size > 0 {
        let n = size.min(ZEROS.len() as u64) as usize;
        context.update(&ZEROS[..n]);
        size -= n as u64;
    }
}
