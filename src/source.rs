// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

//! Uniform forward-read access to an image source, whatever its address and
//! encoding.
//!
//! A source address is a local path, a `file://` URL, or an `http(s)://` URL.
//! The concrete backend is picked from the address scheme and a content
//! signature of the fetched bytes, so a renamed compressed file still decodes
//! correctly. Decompressing backends are forward-only streams; seeking is a
//! capability the caller probes with [`SourceReader::try_seek`].

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::debug;
use ureq::Agent;

use crate::stream::PeekReader;

static GZIP_MAGIC: &[u8; 2] = b"\x1f\x8b";
static BZIP2_MAGIC: &[u8; 3] = b"BZh";
static TAR_MAGIC: &[u8; 5] = b"ustar";

/// Byte offset of the magic within a tar header block.
const TAR_MAGIC_OFFSET: usize = 257;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported source address scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Failed to open source: {0}")]
    Open(String, #[source] io::Error),
    #[error("Failed to fetch {url}: HTTP status {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("Failed to fetch {url}")]
    Http {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    #[error("I/O error when autodetecting source format")]
    AutoDetect(#[source] io::Error),
    #[error("Failed to read archive member headers")]
    ArchiveRead(#[source] io::Error),
    #[error("Archive contains no regular file member")]
    NoArchiveMember,
}

type Result<T> = std::result::Result<T, Error>;

/// An HTTP(S) stream. Seekable only when the server honors `Range` requests.
pub struct RemoteReader {
    agent: Agent,
    url: String,
    body: Box<dyn Read + Send>,
    size: Option<u64>,
    accepts_ranges: bool,
}

impl RemoteReader {
    fn open(url: &str) -> Result<Self> {
        let agent: Agent = Agent::config_builder()
            .user_agent(concat!("bmapcopy/", env!("CARGO_PKG_VERSION")))
            .build()
            .new_agent();

        let response = agent.get(url).call().map_err(|e| match e {
            ureq::Error::StatusCode(status) => Error::HttpStatus {
                url: url.to_string(),
                status,
            },
            e => Error::Http {
                url: url.to_string(),
                source: Box::new(e),
            },
        })?;

        let size = response
            .headers()
            .get("Content-Length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let accepts_ranges = response
            .headers()
            .get("Accept-Ranges")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

        debug!("Opened {url}: size={size:?}, accepts_ranges={accepts_ranges}");

        Ok(Self {
            agent,
            url: url.to_string(),
            body: Box::new(response.into_body().into_reader()),
            size,
            accepts_ranges,
        })
    }

    /// Reposition by issuing a new ranged request. Returns false if the
    /// server does not support ranges; the current stream is untouched in
    /// that case.
    fn seek_to(&mut self, offset: u64) -> io::Result<bool> {
        if !self.accepts_ranges {
            return Ok(false);
        }

        let response = self
            .agent
            .get(&self.url)
            .header("Range", format!("bytes={offset}-"))
            .call()
            .map_err(io::Error::other)?;

        if response.status().as_u16() != 206 {
            // The server ignored the range and replied with the full body.
            return Ok(false);
        }

        self.body = Box::new(response.into_body().into_reader());

        Ok(true)
    }
}

impl Read for RemoteReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

/// An undecoded backend: the bytes exactly as addressed.
pub enum RawSource {
    File { file: File, size: u64 },
    Remote(RemoteReader),
}

impl RawSource {
    fn open(addr: &str) -> Result<Self> {
        let path = match addr.split_once("://") {
            Some(("http" | "https", _)) => return Ok(Self::Remote(RemoteReader::open(addr)?)),
            Some(("file", rest)) => rest,
            Some((scheme, _)) => return Err(Error::UnsupportedScheme(scheme.to_string())),
            None => addr,
        };

        let mut file = File::open(path).map_err(|e| Error::Open(addr.to_string(), e))?;

        // Seek instead of stat so that block devices report their real size.
        let size = file
            .seek(SeekFrom::End(0))
            .and_then(|size| file.rewind().map(|()| size))
            .map_err(|e| Error::Open(addr.to_string(), e))?;

        Ok(Self::File { file, size })
    }

    fn try_seek(&mut self, offset: u64) -> io::Result<bool> {
        match self {
            Self::File { file, .. } => {
                file.seek(SeekFrom::Start(offset))?;
                Ok(true)
            }
            Self::Remote(remote) => remote.seek_to(offset),
        }
    }

    fn known_size(&self) -> Option<u64> {
        match self {
            Self::File { size, .. } => Some(*size),
            Self::Remote(remote) => remote.size,
        }
    }
}

impl Read for RawSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File { file, .. } => file.read(buf),
            Self::Remote(remote) => remote.read(buf),
        }
    }
}

type Raw = PeekReader<RawSource>;
type GzStream = PeekReader<GzDecoder<Raw>>;
type Bz2Stream = PeekReader<BzDecoder<Raw>>;

/// A stateful cursor over an image source. Exposes forward reads via [`Read`],
/// optional seeking, and an optional known decoded size.
pub enum SourceReader {
    LocalOrRemote(Raw),
    Gzip(GzStream),
    Bzip2(Bz2Stream),
    TarGz { reader: io::Take<GzStream>, size: u64 },
    TarBz2 { reader: io::Take<Bz2Stream>, size: u64 },
}

impl SourceReader {
    /// Open a source address and detect its encoding from the content
    /// signature.
    pub fn open(addr: &str) -> Result<Self> {
        let raw = RawSource::open(addr)?;
        let mut reader = PeekReader::new(raw);
        let magic = reader.peek(3).map_err(Error::AutoDetect)?;

        if magic.starts_with(GZIP_MAGIC) {
            let mut stream = PeekReader::new(GzDecoder::new(reader));

            if is_tar(&mut stream)? {
                let (reader, size) = archive_payload(stream)?;
                Ok(Self::TarGz { reader, size })
            } else {
                Ok(Self::Gzip(stream))
            }
        } else if magic.starts_with(BZIP2_MAGIC) {
            let mut stream = PeekReader::new(BzDecoder::new(reader));

            if is_tar(&mut stream)? {
                let (reader, size) = archive_payload(stream)?;
                Ok(Self::TarBz2 { reader, size })
            } else {
                Ok(Self::Bzip2(stream))
            }
        } else {
            Ok(Self::LocalOrRemote(reader))
        }
    }

    /// Decoded size of the source, if the backend knows it upfront.
    pub fn known_size(&self) -> Option<u64> {
        match self {
            Self::LocalOrRemote(r) => r.get_ref().known_size(),
            Self::Gzip(_) | Self::Bzip2(_) => None,
            Self::TarGz { size, .. } | Self::TarBz2 { size, .. } => Some(*size),
        }
    }

    /// Try to reposition the stream to `offset`. Returns false if the backend
    /// can only be read forward, in which case the stream is left untouched.
    pub fn try_seek(&mut self, offset: u64) -> io::Result<bool> {
        match self {
            Self::LocalOrRemote(r) => {
                let seeked = r.get_mut().try_seek(offset)?;
                if seeked {
                    r.discard_buffered();
                }
                Ok(seeked)
            }
            _ => Ok(false),
        }
    }

    /// The underlying local file, if the source is one. Only such sources can
    /// answer extent queries.
    pub fn as_local_file(&self) -> Option<&File> {
        match self {
            Self::LocalOrRemote(r) => match r.get_ref() {
                RawSource::File { file, .. } => Some(file),
                RawSource::Remote(_) => None,
            },
            _ => None,
        }
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::LocalOrRemote(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
            Self::Bzip2(r) => r.read(buf),
            Self::TarGz { reader, .. } => reader.read(buf),
            Self::TarBz2 { reader, .. } => reader.read(buf),
        }
    }
}

/// Check for a tar header at the start of a decompressed stream. The peeked
/// bytes stay buffered, so the stream still replays from offset 0.
fn is_tar<R: Read>(stream: &mut PeekReader<R>) -> Result<bool> {
    let header = stream
        .peek(TAR_MAGIC_OFFSET + TAR_MAGIC.len())
        .map_err(Error::AutoDetect)?;

    Ok(header.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &header[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC)
}

/// Advance an archive stream to the contents of its canonical payload: the
/// first regular file member. Returns a reader limited to exactly that
/// member's bytes along with the member size.
fn archive_payload<R: Read>(stream: R) -> Result<(io::Take<R>, u64)> {
    let mut archive = Archive::new(stream);
    let mut size = None;

    {
        let mut entries = archive.entries().map_err(Error::ArchiveRead)?;

        // Advancing the iterator skips the data of unread members.
        for entry in entries.by_ref() {
            let entry = entry.map_err(Error::ArchiveRead)?;

            if entry.header().entry_type().is_file() {
                debug!(
                    "Archive payload member: {:?} ({} bytes)",
                    entry.path_bytes(),
                    entry.size()
                );
                size = Some(entry.size());
                break;
            }
        }
    }

    let size = size.ok_or(Error::NoArchiveMember)?;

    // The member header has been consumed, so the inner stream sits exactly
    // at the start of the member's data.
    Ok((archive.into_inner().take(size), size))
}
