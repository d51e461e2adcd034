// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

//! In-memory representation and serialization of the bmap document.
//!
//! A bmap describes which blocks of an image hold real data. The document is
//! a TOML file with a version-tagged root, the image geometry, one checksum
//! per mapped block range, and one checksum over the full linear image. The
//! same logical document always serializes to the same bytes, so two
//! generation runs over identical content are comparable.

use std::{fmt, str};

use ring::digest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bmap format version emitted by this implementation. Parsing accepts any
/// document with the same major version.
pub const FORMAT_VERSION: &str = "2.0";

/// Default block size used when generating a bmap.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to parse bmap document")]
    Parse(#[source] toml_edit::de::Error),
    #[error("Failed to serialize bmap document")]
    Serialize(#[source] toml_edit::ser::Error),
    #[error("Unsupported bmap format version: {0}")]
    UnsupportedVersion(String),
    #[error("Invalid block size (must be a power of two): {0}")]
    InvalidBlockSize(u32),
    #[error("Blocks count {blocks_count} does not match image size {image_size} at block size {block_size}")]
    InvalidBlocksCount {
        blocks_count: u64,
        image_size: u64,
        block_size: u32,
    },
    #[error("Range #{index}: start block {start_block} is not below end block {end_block}")]
    EmptyRange {
        index: usize,
        start_block: u64,
        end_block: u64,
    },
    #[error("Range #{index}: starts at block {start_block}, but a previous range ends at {prev_end_block}")]
    UnorderedRanges {
        index: usize,
        start_block: u64,
        prev_end_block: u64,
    },
    #[error("Range #{index}: end block {end_block} exceeds blocks count {blocks_count}")]
    RangeOutOfBounds {
        index: usize,
        end_block: u64,
        blocks_count: u64,
    },
    #[error("Range #{index}: checksum is {actual} bytes, but {checksum_type} digests are {expected} bytes")]
    InvalidRangeChecksumSize {
        index: usize,
        checksum_type: ChecksumType,
        expected: usize,
        actual: usize,
    },
    #[error("Image checksum is {actual} bytes, but {checksum_type} digests are {expected} bytes")]
    InvalidImageChecksumSize {
        checksum_type: ChecksumType,
        expected: usize,
        actual: usize,
    },
    #[error("Mapped blocks count {declared} does not match the ranges' total {actual}")]
    InvalidMappedBlocksCount { declared: u64, actual: u64 },
    #[error("Mapped blocks percent {declared} does not match the computed value {actual}")]
    InvalidMappedBlocksPercent { declared: u8, actual: u8 },
}

type Result<T> = std::result::Result<T, Error>;

/// Digest algorithm used for all checksums within one document. Only
/// cryptographic hashes are recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumType {
    pub fn algorithm(self) -> &'static digest::Algorithm {
        match self {
            Self::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => &digest::SHA256,
            Self::Sha512 => &digest::SHA512,
        }
    }

    pub fn digest_size(self) -> usize {
        self.algorithm().output_len()
    }
}

impl Default for ChecksumType {
    fn default() -> Self {
        Self::Sha256
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        };

        f.write_str(name)
    }
}

/// One contiguous run of mapped blocks. The block range is half-open:
/// `start_block` is included, `end_block` is not. The checksum covers the
/// bytes of exactly these blocks, except that the final block of the image
/// only contributes bytes up to the image size.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockRange {
    pub start_block: u64,
    pub end_block: u64,
    #[serde(with = "hex")]
    pub checksum: Vec<u8>,
}

impl BlockRange {
    pub fn blocks_count(&self) -> u64 {
        self.end_block - self.start_block
    }
}

/// The bmap document. Constructed once by generation or parsing and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Bmap {
    /// Format version. The major component gates parsing.
    pub version: String,
    /// Total logical byte length of the image. The final block may be
    /// partially used.
    pub image_size: u64,
    /// Bytes per block. Always a power of two.
    pub block_size: u32,
    /// `ceil(image_size / block_size)`.
    pub blocks_count: u64,
    /// Number of blocks covered by `block_map`.
    pub mapped_blocks_count: u64,
    /// `mapped_blocks_count * 100 / blocks_count`, rounded down. Derived, but
    /// carried in the document and re-validated on parse.
    pub mapped_blocks_percent: u8,
    /// Digest algorithm for every checksum in this document.
    pub checksum_type: ChecksumType,
    /// Digest over the full linear byte stream, hole bytes included.
    #[serde(with = "hex")]
    pub image_checksum: Vec<u8>,
    /// Mapped ranges, sorted by `start_block`, non-overlapping.
    pub block_map: Vec<BlockRange>,
}

impl Bmap {
    /// Parse and fully validate a serialized bmap document. Any invariant
    /// violation is an error; nothing is silently corrected.
    pub fn parse(data: &str) -> Result<Self> {
        let bmap: Self = toml_edit::de::from_str(data).map_err(Error::Parse)?;
        bmap.validate()?;

        Ok(bmap)
    }

    /// Serialize deterministically. The output depends only on the logical
    /// document contents.
    pub fn serialize(&self) -> Result<String> {
        toml_edit::ser::to_string_pretty(self).map_err(Error::Serialize)
    }

    pub fn validate(&self) -> Result<()> {
        let major = self.version.split('.').next().unwrap_or("");
        let supported_major = FORMAT_VERSION.split('.').next().unwrap_or("");
        if major != supported_major {
            return Err(Error::UnsupportedVersion(self.version.clone()));
        }

        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(Error::InvalidBlockSize(self.block_size));
        }

        if self.blocks_count != self.image_size.div_ceil(u64::from(self.block_size)) {
            return Err(Error::InvalidBlocksCount {
                blocks_count: self.blocks_count,
                image_size: self.image_size,
                block_size: self.block_size,
            });
        }

        let digest_size = self.checksum_type.digest_size();
        let mut prev_end = 0;
        let mut total_blocks = 0;

        for (index, range) in self.block_map.iter().enumerate() {
            if range.start_block >= range.end_block {
                return Err(Error::EmptyRange {
                    index,
                    start_block: range.start_block,
                    end_block: range.end_block,
                });
            }

            if index > 0 && range.start_block < prev_end {
                return Err(Error::UnorderedRanges {
                    index,
                    start_block: range.start_block,
                    prev_end_block: prev_end,
                });
            }

            if range.end_block > self.blocks_count {
                return Err(Error::RangeOutOfBounds {
                    index,
                    end_block: range.end_block,
                    blocks_count: self.blocks_count,
                });
            }

            if range.checksum.len() != digest_size {
                return Err(Error::InvalidRangeChecksumSize {
                    index,
                    checksum_type: self.checksum_type,
                    expected: digest_size,
                    actual: range.checksum.len(),
                });
            }

            prev_end = range.end_block;
            total_blocks += range.blocks_count();
        }

        if self.mapped_blocks_count != total_blocks {
            return Err(Error::InvalidMappedBlocksCount {
                declared: self.mapped_blocks_count,
                actual: total_blocks,
            });
        }

        let actual_percent = percent(self.mapped_blocks_count, self.blocks_count);
        if self.mapped_blocks_percent != actual_percent {
            return Err(Error::InvalidMappedBlocksPercent {
                declared: self.mapped_blocks_percent,
                actual: actual_percent,
            });
        }

        if self.image_checksum.len() != digest_size {
            return Err(Error::InvalidImageChecksumSize {
                checksum_type: self.checksum_type,
                expected: digest_size,
                actual: self.image_checksum.len(),
            });
        }

        Ok(())
    }
}

/// Percentage of mapped blocks, rounded down.
pub fn percent(mapped_blocks_count: u64, blocks_count: u64) -> u8 {
    if blocks_count == 0 {
        0
    } else {
        (mapped_blocks_count * 100 / blocks_count) as u8
    }
}
