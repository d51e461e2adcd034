// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

//! Discovery of allocated-vs-hole block ranges in a local sparse file or
//! block device.
//!
//! Extents are reported block-aligned, sorted, and merged. When the
//! underlying storage cannot report allocation information, the entire file
//! is reported as one mapped extent. That fallback only costs sparseness,
//! never correctness, so extent query failures are never fatal.

use std::{fs::File, ops::Range};

use tracing::debug;

/// Allocation state of a run of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentKind {
    Mapped,
    Hole,
}

/// A contiguous run of blocks sharing the same allocation state. The block
/// range is half-open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent {
    pub blocks: Range<u64>,
    pub kind: ExtentKind,
}

/// [Linux only] Find allocated byte regions of the file via SEEK_DATA and
/// SEEK_HOLE. The file position is clobbered.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn allocated_byte_ranges(file: &File) -> rustix::io::Result<Vec<Range<u64>>> {
    use rustix::{fs::SeekFrom, io::Errno};

    let mut result = vec![];
    let mut start;
    let mut end = 0;

    loop {
        start = match rustix::fs::seek(file, SeekFrom::Data(end)) {
            Ok(offset) => offset,
            Err(Errno::NXIO) => break,
            Err(e) => return Err(e),
        };

        end = rustix::fs::seek(file, SeekFrom::Hole(start))?;

        result.push(start..end);
    }

    Ok(result)
}

fn whole_file(blocks_count: u64) -> Vec<Extent> {
    vec![Extent {
        blocks: 0..blocks_count,
        kind: ExtentKind::Mapped,
    }]
}

/// Convert sorted allocated byte regions into merged mapped block extents.
/// Region boundaries are aligned outward, so touching or overlapping block
/// ranges are merged.
fn to_block_extents(
    byte_ranges: &[Range<u64>],
    blocks_count: u64,
    block_size: u32,
) -> Vec<Extent> {
    let block_size = u64::from(block_size);
    let mut result: Vec<Extent> = vec![];

    for range in byte_ranges {
        if range.start >= range.end {
            continue;
        }

        let start_block = range.start / block_size;
        let end_block = range.end.div_ceil(block_size).min(blocks_count);

        match result.last_mut() {
            Some(last) if start_block <= last.blocks.end => {
                last.blocks.end = last.blocks.end.max(end_block);
            }
            _ => result.push(Extent {
                blocks: start_block..end_block,
                kind: ExtentKind::Mapped,
            }),
        }
    }

    result
}

/// Find the mapped extents of a local file or block device, covering every
/// block that holds allocated data. Falls back to reporting the whole file as
/// mapped when the filesystem cannot answer. The file position is clobbered.
pub fn mapped_extents(file: &File, image_size: u64, block_size: u32) -> Vec<Extent> {
    let blocks_count = image_size.div_ceil(u64::from(block_size));

    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        match allocated_byte_ranges(file) {
            Ok(byte_ranges) => return to_block_extents(&byte_ranges, blocks_count, block_size),
            Err(e) => {
                debug!("No extent information available ({e}); treating all blocks as mapped");
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        let _ = file;
        debug!("Extent queries unsupported on this platform; treating all blocks as mapped");
    }

    whole_file(blocks_count)
}

/// Derive the hole extents as the complement of the mapped extents within
/// `[0, blocks_count)`. Holes are never stored in a bmap document.
pub fn holes(mapped: &[Extent], blocks_count: u64) -> Vec<Extent> {
    let mut result = vec![];
    let mut pos = 0;

    for extent in mapped {
        if extent.blocks.start > pos {
            result.push(Extent {
                blocks: pos..extent.blocks.start,
                kind: ExtentKind::Hole,
            });
        }
        pos = extent.blocks.end;
    }

    if pos < blocks_count {
        result.push(Extent {
            blocks: pos..blocks_count,
            kind: ExtentKind::Hole,
        });
    }

    result
}
