// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    io::{Read, Write},
};

use assert_matches::assert_matches;
use bmapcopy::source::{Error, SourceReader};
use bzip2::write::BzEncoder;
use flate2::{Compression, write::GzEncoder};
use tempfile::TempDir;

/// Deterministic pseudo-random bytes so failures are reproducible.
fn test_data(len: usize) -> Vec<u8> {
    let mut state = 0x9e3779b97f4a7c15u64;

    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A tar archive with a leading directory member followed by the payload.
fn tar_with_payload(data: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_mode(0o755);
    dir.set_size(0);
    builder
        .append_data(&mut dir, "images", std::io::empty())
        .unwrap();

    let mut file = tar::Header::new_gnu();
    file.set_entry_type(tar::EntryType::Regular);
    file.set_mode(0o644);
    file.set_size(data.len() as u64);
    builder.append_data(&mut file, "images/disk.img", data).unwrap();

    builder.into_inner().unwrap()
}

fn read_all(source: &mut SourceReader) -> Vec<u8> {
    let mut buf = Vec::new();
    source.read_to_end(&mut buf).unwrap();
    buf
}

fn write_tmp(dir: &TempDir, name: &str, data: &[u8]) -> String {
    let path = dir.path().join(name);
    fs::write(&path, data).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn local_file() {
    let dir = TempDir::new().unwrap();
    let data = test_data(100000);
    let path = write_tmp(&dir, "plain.img", &data);

    let mut source = SourceReader::open(&path).unwrap();
    assert_eq!(source.known_size(), Some(data.len() as u64));
    assert!(source.as_local_file().is_some());
    assert_eq!(read_all(&mut source), data);
}

#[test]
fn file_url() {
    let dir = TempDir::new().unwrap();
    let data = test_data(5000);
    let path = write_tmp(&dir, "plain.img", &data);

    let mut source = SourceReader::open(&format!("file://{path}")).unwrap();
    assert_eq!(source.known_size(), Some(data.len() as u64));
    assert_eq!(read_all(&mut source), data);
}

#[test]
fn local_file_seeking() {
    let dir = TempDir::new().unwrap();
    let data = test_data(10000);
    let path = write_tmp(&dir, "plain.img", &data);

    let mut source = SourceReader::open(&path).unwrap();
    assert!(source.try_seek(6000).unwrap());

    let mut buf = Vec::new();
    source.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, &data[6000..]);

    // Seeking back also works.
    assert!(source.try_seek(0).unwrap());
    assert_eq!(read_all(&mut source), data);
}

#[test]
fn gzip_stream() {
    let dir = TempDir::new().unwrap();
    let data = test_data(200000);
    let path = write_tmp(&dir, "image.gz", &gzip(&data));

    let mut source = SourceReader::open(&path).unwrap();
    assert_eq!(source.known_size(), None);
    assert!(!source.try_seek(100).unwrap());
    assert!(source.as_local_file().is_none());
    assert_eq!(read_all(&mut source), data);
}

#[test]
fn gzip_detected_by_signature_not_extension() {
    let dir = TempDir::new().unwrap();
    let data = test_data(50000);
    // A renamed compressed file must still decode.
    let path = write_tmp(&dir, "image.img", &gzip(&data));

    let mut source = SourceReader::open(&path).unwrap();
    assert_eq!(read_all(&mut source), data);
}

#[test]
fn bzip2_stream() {
    let dir = TempDir::new().unwrap();
    let data = test_data(200000);
    let path = write_tmp(&dir, "image.bz2", &bzip2(&data));

    let mut source = SourceReader::open(&path).unwrap();
    assert_eq!(source.known_size(), None);
    assert!(!source.try_seek(100).unwrap());
    assert_eq!(read_all(&mut source), data);
}

#[test]
fn tar_gz_payload() {
    let dir = TempDir::new().unwrap();
    let data = test_data(150000);
    let path = write_tmp(&dir, "image.tar.gz", &gzip(&tar_with_payload(&data)));

    let mut source = SourceReader::open(&path).unwrap();
    // The archive records the member's uncompressed size.
    assert_eq!(source.known_size(), Some(data.len() as u64));
    assert!(!source.try_seek(100).unwrap());
    assert_eq!(read_all(&mut source), data);
}

#[test]
fn tar_bz2_payload() {
    let dir = TempDir::new().unwrap();
    let data = test_data(150000);
    let path = write_tmp(&dir, "image.tar.bz2", &bzip2(&tar_with_payload(&data)));

    let mut source = SourceReader::open(&path).unwrap();
    assert_eq!(source.known_size(), Some(data.len() as u64));
    assert_eq!(read_all(&mut source), data);
}

#[test]
fn archive_without_regular_member() {
    let dir = TempDir::new().unwrap();

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);
    builder
        .append_data(&mut header, "empty", std::io::empty())
        .unwrap();
    let archive = builder.into_inner().unwrap();

    let path = write_tmp(&dir, "empty.tar.gz", &gzip(&archive));
    assert_matches!(SourceReader::open(&path).err(), Some(Error::NoArchiveMember));
}

#[test]
fn truncated_gzip_stream() {
    let dir = TempDir::new().unwrap();
    let data = test_data(500000);
    let compressed = gzip(&data);
    let path = write_tmp(&dir, "image.gz", &compressed[..compressed.len() / 2]);

    let mut source = SourceReader::open(&path).unwrap();
    let mut buf = Vec::new();
    source.read_to_end(&mut buf).unwrap_err();
}

#[test]
fn unsupported_scheme() {
    assert_matches!(
        SourceReader::open("ftp://example.com/image.img").err(),
        Some(Error::UnsupportedScheme(scheme)) if scheme == "ftp"
    );
}

#[test]
fn missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nonexistent.img");
    assert_matches!(
        SourceReader::open(path.to_str().unwrap()).err(),
        Some(Error::Open(..))
    );
}

#[test]
fn short_file_is_plain() {
    let dir = TempDir::new().unwrap();
    let path = write_tmp(&dir, "tiny", b"ab");

    let mut source = SourceReader::open(&path).unwrap();
    assert_eq!(source.known_size(), Some(2));
    assert_eq!(read_all(&mut source), b"ab");
}

#[test]
fn read_after_partial_consume() {
    // Mixed reads through the peek buffer boundary.
    let dir = TempDir::new().unwrap();
    let data = test_data(100000);
    let path = write_tmp(&dir, "image.gz", &gzip(&data));

    let mut source = SourceReader::open(&path).unwrap();
    let mut head = [0u8; 7];
    source.read_exact(&mut head).unwrap();
    assert_eq!(head, data[..7]);

    let mut rest = Vec::new();
    source.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, &data[7..]);
}
