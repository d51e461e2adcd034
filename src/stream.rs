// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Read, Write};

pub const ZEROS: [u8; 16384] = [0u8; 16384];

/// Extensions for readers to read and discard data (eg. for skipping hole
/// bytes in a linear stream).
pub trait ReadDiscardExt {
    fn read_discard(&mut self, size: u64) -> io::Result<u64>;

    fn read_discard_exact(&mut self, size: u64) -> io::Result<()> {
        let n = self.read_discard(size)?;
        if n != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Expected to read {size} bytes, but reached EOF after {n} bytes"),
            ));
        }
        Ok(())
    }
}

impl<R: Read> ReadDiscardExt for R {
    fn read_discard(&mut self, size: u64) -> io::Result<u64> {
        io::copy(&mut self.take(size), &mut io::sink())
    }
}

/// Extensions for writers to easily write zeros (eg. for materializing holes
/// on a non-seekable destination).
pub trait WriteZerosExt {
    fn write_zeros(&mut self, size: u64) -> io::Result<u64>;

    fn write_zeros_exact(&mut self, size: u64) -> io::Result<()> {
        let n = self.write_zeros(size)?;
        if n != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Expected to write {size} bytes, but reached EOF after {n} bytes"),
            ));
        }
        Ok(())
    }
}

impl<W: Write> WriteZerosExt for W {
    fn write_zeros(&mut self, size: u64) -> io::Result<u64> {
        // We don't use std::io::copy() on std::io::repeat(0) because it fails
        // if the writer hits EOF before all data is written.
        let mut written = 0;

        while written < size {
            let to_write = (size - written).min(ZEROS.len() as u64) as usize;
            let n = self.write(&ZEROS[..to_write])?;
            written += n as u64;

            if n < to_write {
                break;
            }
        }

        Ok(written)
    }
}

/// A reader wrapper that can peek at upcoming bytes without consuming them.
/// Peeked bytes are buffered and replayed by subsequent reads, which makes
/// content-signature detection possible on forward-only streams.
pub struct PeekReader<R> {
    inner: R,
    buffered: Vec<u8>,
    pos: usize,
}

impl<R: Read> PeekReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffered: Vec::new(),
            pos: 0,
        }
    }

    /// Return up to `size` upcoming bytes. Fewer are returned only if the
    /// stream ends first.
    pub fn peek(&mut self, size: usize) -> io::Result<&[u8]> {
        while self.buffered.len() - self.pos < size {
            let mut buf = [0u8; 512];
            let n = self.inner.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.buffered.extend_from_slice(&buf[..n]);
        }

        let available = (self.buffered.len() - self.pos).min(size);
        Ok(&self.buffered[self.pos..self.pos + available])
    }

    /// Drop buffered bytes after the underlying stream has been repositioned.
    pub fn discard_buffered(&mut self) {
        self.buffered.clear();
        self.pos = 0;
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for PeekReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buffered.len() {
            let n = (self.buffered.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.buffered[self.pos..self.pos + n]);
            self.pos += n;

            if self.pos == self.buffered.len() {
                self.discard_buffered();
            }

            return Ok(n);
        }

        self.inner.read(buf)
    }
}

/// Copy exactly `size` bytes from `reader` to `writer`, invoking `inspect`
/// after every buffer read iteration. If either `reader` or `writer` reaches
/// EOF before `size` bytes are copied, an error is returned.
pub fn copy_n_inspect(
    mut reader: impl Read,
    mut writer: impl Write,
    mut size: u64,
    mut inspect: impl FnMut(&[u8]),
) -> io::Result<()> {
    let mut buf = [0u8; 16384];

    while size > 0 {
        let to_read = size.min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..to_read])?;

        inspect(&buf[..to_read]);

        writer.write_all(&buf[..to_read])?;

        size -= to_read as u64;
    }

    Ok(())
}
