// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

//! The map-guided copy engine.
//!
//! With a bmap, only mapped ranges are transferred: the destination is seeked
//! past holes (leaving them unallocated on filesystems that support sparse
//! files) or zero-filled when it cannot seek, and each range's checksum is
//! verified as it streams through. Without a bmap, the engine degrades to a
//! full sequential copy with no verification and no sparseness, since it
//! cannot tell a meaningful zero from a hole.
//!
//! Everything runs as one sequential pipeline. Destination seeks must happen
//! in the order ranges are declared and a non-seekable source can only be
//! consumed linearly, so there is nothing to parallelize. An error aborts the
//! copy immediately and leaves the destination in an unspecified partial
//! state; callers wanting atomicity must copy to a temporary destination and
//! move it into place on success.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use ring::digest::Context;
use thiserror::Error;
use tracing::debug;

use crate::{
    format::bmap::Bmap,
    source::{self, SourceReader},
    stream::{ReadDiscardExt, WriteZerosExt},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Checksum mismatch in blocks {start_block}..{end_block}: expected {expected}, but have {actual}")]
    Integrity {
        start_block: u64,
        end_block: u64,
        expected: String,
        actual: String,
    },
    #[error("Bmap declares image size {declared}, but the source reports {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("Failed to read source at byte {offset}")]
    SourceRead {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("Failed to seek source to byte {offset}")]
    SourceSeek {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("Failed to open destination: {path:?}")]
    DestOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write destination at byte {offset}")]
    DestWrite {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("Failed to seek destination to byte {offset}")]
    DestSeek {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("Failed to finalize destination at {size} bytes")]
    DestFinalize {
        size: u64,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Source(#[from] source::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Progress callback: cumulative bytes processed and, if known, the total.
/// Runs synchronously in the copy loop, so it must not block for long.
pub type ProgressFn<'a> = dyn FnMut(u64, Option<u64>) + 'a;

pub struct CopyOptions<'a> {
    /// Verify each range's checksum against the bmap. A mismatch aborts the
    /// copy; nothing is retried or healed.
    pub verify: bool,
    pub progress: Option<&'a mut ProgressFn<'a>>,
}

impl Default for CopyOptions<'_> {
    fn default() -> Self {
        Self {
            verify: true,
            progress: None,
        }
    }
}

/// The destination sink. Only [`Dest::File`] can hold holes and be resized;
/// a [`Dest::Stream`] receives explicit zeros instead.
pub enum Dest<'a> {
    File(&'a mut File),
    Stream(&'a mut dyn Write),
}

impl Dest<'_> {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::File(f) => f,
            Self::Stream(w) => *w,
        }
    }
}

/// Copy the image at `addr` to the file or block device at `path`, guided by
/// `bmap` if one is provided. The destination is synced before returning.
pub fn copy(addr: &str, path: &Path, bmap: Option<&Bmap>, options: CopyOptions) -> Result<()> {
    let mut source = SourceReader::open(addr)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::DestOpen {
            path: path.to_path_buf(),
            source: e,
        })?;

    let copied = copy_stream(&mut source, &mut Dest::File(&mut file), bmap, options)?;

    file.sync_all().map_err(|e| Error::DestFinalize {
        size: bmap.map_or(copied, |b| b.image_size),
        source: e,
    })?;

    Ok(())
}

/// Copy an opened source positioned at offset 0 into `dest`. Returns the
/// number of bytes read from the source (hole bytes excluded).
pub fn copy_stream(
    source: &mut SourceReader,
    dest: &mut Dest,
    bmap: Option<&Bmap>,
    mut options: CopyOptions,
) -> Result<u64> {
    match bmap {
        Some(bmap) => copy_with_bmap(source, dest, bmap, &mut options),
        None => copy_sequential(source, dest, &mut options),
    }
}

/// Full sequential transfer until end-of-stream. No per-range verification
/// and no destination sparseness.
fn copy_sequential(
    source: &mut SourceReader,
    dest: &mut Dest,
    options: &mut CopyOptions,
) -> Result<u64> {
    let total = source.known_size();
    let writer = dest.writer();
    let mut buf = [0u8; 16384];
    let mut copied = 0;

    loop {
        let n = source.read(&mut buf).map_err(|e| Error::SourceRead {
            offset: copied,
            source: e,
        })?;
        if n == 0 {
            break;
        }

        writer.write_all(&buf[..n]).map_err(|e| Error::DestWrite {
            offset: copied,
            source: e,
        })?;

        copied += n as u64;

        if let Some(progress) = options.progress.as_deref_mut() {
            progress(copied, total);
        }
    }

    writer.flush().map_err(|e| Error::DestWrite {
        offset: copied,
        source: e,
    })?;

    // A pre-existing regular-file destination may be longer than the stream;
    // cut off the stale tail so the result matches the source exactly.
    if let Dest::File(file) = dest {
        let is_regular = file
            .metadata()
            .map(|m| m.is_file())
            .map_err(|e| Error::DestFinalize {
                size: copied,
                source: e,
            })?;

        if is_regular {
            file.set_len(copied).map_err(|e| Error::DestFinalize {
                size: copied,
                source: e,
            })?;
        }
    }

    Ok(copied)
}

fn copy_with_bmap(
    source: &mut SourceReader,
    dest: &mut Dest,
    bmap: &Bmap,
    options: &mut CopyOptions,
) -> Result<u64> {
    // An independently known source length must agree with the document.
    if let Some(size) = source.known_size() {
        if size != bmap.image_size {
            return Err(Error::SizeMismatch {
                declared: bmap.image_size,
                actual: size,
            });
        }
    }

    let block_size = u64::from(bmap.block_size);
    let total: u64 = bmap
        .block_map
        .iter()
        .map(|r| range_bytes(r.start_block, r.end_block, block_size, bmap.image_size))
        .sum();

    debug!(
        "Copying {} of {} blocks ({total} bytes of data)",
        bmap.mapped_blocks_count, bmap.blocks_count
    );

    let mut buf = [0u8; 16384];
    let mut copied = 0;
    let mut pos = 0;

    for range in &bmap.block_map {
        let start = range.start_block * block_size;
        let end = start + range_bytes(range.start_block, range.end_block, block_size, bmap.image_size);

        if pos != start {
            // The hole before this range: the destination seeks past it (or
            // gets explicit zeros), and a non-seekable source must still
            // consume the zero bytes that materialize it in the linear
            // stream.
            match &mut *dest {
                Dest::File(file) => {
                    file.seek(SeekFrom::Start(start)).map_err(|e| Error::DestSeek {
                        offset: start,
                        source: e,
                    })?;
                }
                Dest::Stream(writer) => {
                    writer.write_zeros_exact(start - pos).map_err(|e| Error::DestWrite {
                        offset: pos,
                        source: e,
                    })?;
                }
            }

            let seeked = source.try_seek(start).map_err(|e| Error::SourceSeek {
                offset: start,
                source: e,
            })?;

            if !seeked {
                source.read_discard_exact(start - pos).map_err(|e| Error::SourceRead {
                    offset: pos,
                    source: e,
                })?;
            }
        }

        let mut context = options
            .verify
            .then(|| Context::new(bmap.checksum_type.algorithm()));
        let writer = dest.writer();
        let mut done = 0;

        while done < end - start {
            let to_read = (end - start - done).min(buf.len() as u64) as usize;

            source.read_exact(&mut buf[..to_read]).map_err(|e| Error::SourceRead {
                offset: start + done,
                source: e,
            })?;

            if let Some(context) = &mut context {
                context.update(&buf[..to_read]);
            }

            writer.write_all(&buf[..to_read]).map_err(|e| Error::DestWrite {
                offset: start + done,
                source: e,
            })?;

            done += to_read as u64;
            copied += to_read as u64;

            if let Some(progress) = options.progress.as_deref_mut() {
                progress(copied, Some(total));
            }
        }

        if let Some(context) = context {
            let digest = context.finish();

            if digest.as_ref() != range.checksum.as_slice() {
                return Err(Error::Integrity {
                    start_block: range.start_block,
                    end_block: range.end_block,
                    expected: hex::encode(&range.checksum),
                    actual: hex::encode(digest.as_ref()),
                });
            }
        }

        pos = end;
    }

    // Represent a trailing hole even if no range touched the final blocks.
    match dest {
        Dest::File(file) => {
            let is_regular = file
                .metadata()
                .map(|m| m.is_file())
                .map_err(|e| Error::DestFinalize {
                    size: bmap.image_size,
                    source: e,
                })?;

            // Block devices already have a fixed size.
            if is_regular {
                file.set_len(bmap.image_size).map_err(|e| Error::DestFinalize {
                    size: bmap.image_size,
                    source: e,
                })?;
            }
        }
        Dest::Stream(writer) => {
            writer
                .write_zeros_exact(bmap.image_size - pos)
                .map_err(|e| Error::DestWrite {
                    offset: pos,
                    source: e,
                })?;
            writer.flush().map_err(|e| Error::DestWrite {
                offset: bmap.image_size,
                source: e,
            })?;
        }
    }

    Ok(copied)
}

/// Byte length of a range, accounting for the image's final partial block.
fn range_bytes(start_block: u64, end_block: u64, block_size: u64, image_size: u64) -> u64 {
    let start = start_block * block_size;
    let end = (end_block * block_size).min(image_size);

    end - start
}
