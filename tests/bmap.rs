// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

use assert_matches::assert_matches;
use bmapcopy::format::bmap::{self, BlockRange, Bmap, ChecksumType, Error};

fn range(start_block: u64, end_block: u64) -> BlockRange {
    BlockRange {
        start_block,
        end_block,
        checksum: vec![0xab; 32],
    }
}

/// The 10 MiB example: block size 4096, three 64 KiB data extents.
fn sample() -> Bmap {
    Bmap {
        version: "2.0".to_string(),
        image_size: 10 * 1024 * 1024,
        block_size: 4096,
        blocks_count: 2560,
        mapped_blocks_count: 48,
        mapped_blocks_percent: 1,
        checksum_type: ChecksumType::Sha256,
        image_checksum: vec![0xcd; 32],
        block_map: vec![range(16, 32), range(1000, 1016), range(2544, 2560)],
    }
}

#[test]
fn round_trip() {
    let bmap = sample();
    let data = bmap.serialize().unwrap();
    let parsed = Bmap::parse(&data).unwrap();

    assert_eq!(parsed, bmap);
}

#[test]
fn serialization_is_deterministic() {
    let first = sample().serialize().unwrap();
    let second = sample().serialize().unwrap();
    assert_eq!(first, second);

    // Parsing and re-serializing is also stable.
    let reparsed = Bmap::parse(&first).unwrap().serialize().unwrap();
    assert_eq!(first, reparsed);
}

#[test]
fn document_shape() {
    let data = sample().serialize().unwrap();

    assert!(data.starts_with("version = \"2.0\""));
    assert!(data.contains("checksum_type = \"sha256\""));
    assert!(data.contains("[[block_map]]"));
    // Digests are hex strings.
    assert!(data.contains(&"ab".repeat(32)));
    assert!(data.contains(&"cd".repeat(32)));
}

#[test]
fn accepts_same_major_version() {
    let mut bmap = sample();
    bmap.version = "2.9".to_string();
    bmap.validate().unwrap();
}

#[test]
fn rejects_other_major_version() {
    let mut bmap = sample();
    bmap.version = "3.0".to_string();
    assert_matches!(bmap.validate(), Err(Error::UnsupportedVersion(_)));
}

#[test]
fn rejects_bad_block_size() {
    let mut bmap = sample();
    bmap.block_size = 1000;
    assert_matches!(bmap.validate(), Err(Error::InvalidBlockSize(1000)));

    bmap.block_size = 0;
    assert_matches!(bmap.validate(), Err(Error::InvalidBlockSize(0)));
}

#[test]
fn rejects_wrong_blocks_count() {
    let mut bmap = sample();
    bmap.blocks_count = 2561;
    assert_matches!(bmap.validate(), Err(Error::InvalidBlocksCount { .. }));
}

#[test]
fn rejects_empty_range() {
    let mut bmap = sample();
    bmap.block_map[1] = range(1000, 1000);
    assert_matches!(bmap.validate(), Err(Error::EmptyRange { index: 1, .. }));
}

#[test]
fn rejects_unsorted_ranges() {
    let mut bmap = sample();
    bmap.block_map.swap(0, 1);
    assert_matches!(bmap.validate(), Err(Error::UnorderedRanges { index: 1, .. }));
}

#[test]
fn rejects_overlapping_ranges() {
    let mut bmap = sample();
    bmap.block_map[1] = range(24, 40);
    assert_matches!(bmap.validate(), Err(Error::UnorderedRanges { index: 1, .. }));
}

#[test]
fn accepts_touching_ranges() {
    let mut bmap = sample();
    bmap.block_map[1] = range(32, 48);
    bmap.validate().unwrap();
}

#[test]
fn rejects_range_past_end() {
    let mut bmap = sample();
    bmap.block_map[2] = range(2544, 2561);
    bmap.mapped_blocks_count = 49;
    assert_matches!(bmap.validate(), Err(Error::RangeOutOfBounds { index: 2, .. }));
}

#[test]
fn rejects_wrong_mapped_count() {
    let mut bmap = sample();
    bmap.mapped_blocks_count = 47;
    assert_matches!(
        bmap.validate(),
        Err(Error::InvalidMappedBlocksCount {
            declared: 47,
            actual: 48,
        })
    );
}

#[test]
fn rejects_wrong_percent() {
    let mut bmap = sample();
    bmap.mapped_blocks_percent = 2;
    assert_matches!(
        bmap.validate(),
        Err(Error::InvalidMappedBlocksPercent {
            declared: 2,
            actual: 1,
        })
    );
}

#[test]
fn rejects_wrong_checksum_sizes() {
    let mut bmap = sample();
    bmap.block_map[0].checksum = vec![0xab; 20];
    assert_matches!(
        bmap.validate(),
        Err(Error::InvalidRangeChecksumSize { index: 0, .. })
    );

    let mut bmap = sample();
    bmap.image_checksum = vec![0xcd; 64];
    assert_matches!(bmap.validate(), Err(Error::InvalidImageChecksumSize { .. }));
}

#[test]
fn digest_sizes_per_algorithm() {
    // The recognized set: one 160-bit and two longer cryptographic hashes.
    assert_eq!(ChecksumType::Sha1.digest_size(), 20);
    assert_eq!(ChecksumType::Sha256.digest_size(), 32);
    assert_eq!(ChecksumType::Sha512.digest_size(), 64);

    let mut bmap = sample();
    bmap.checksum_type = ChecksumType::Sha512;
    bmap.image_checksum = vec![0xcd; 64];
    bmap.block_map = vec![BlockRange {
        start_block: 0,
        end_block: 48,
        checksum: vec![0xab; 64],
    }];
    bmap.validate().unwrap();
}

#[test]
fn rejects_unknown_checksum_type() {
    let data = sample()
        .serialize()
        .unwrap()
        .replace("checksum_type = \"sha256\"", "checksum_type = \"md5\"");
    assert_matches!(Bmap::parse(&data), Err(Error::Parse(_)));
}

#[test]
fn parse_validates() {
    // A syntactically fine document with inconsistent counts must not parse.
    let mut bmap = sample();
    bmap.mapped_blocks_count = 40;
    bmap.mapped_blocks_percent = bmap::percent(40, 2560);
    let data = bmap.serialize().unwrap();
    assert_matches!(Bmap::parse(&data), Err(Error::InvalidMappedBlocksCount { .. }));
}

#[test]
fn percent_rounds_down() {
    assert_eq!(bmap::percent(48, 2560), 1);
    assert_eq!(bmap::percent(0, 2560), 0);
    assert_eq!(bmap::percent(2560, 2560), 100);
    assert_eq!(bmap::percent(0, 0), 0);
}
