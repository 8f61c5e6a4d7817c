//! gzip compression applied before encryption
//!
//! Level 0 stores bytes unchanged; levels 1-9 map to gzip levels. Both
//! directions are streaming adapters so payloads never need to fit in memory.

use flate2::Compression;
use std::io::{self, Read, Write};

/// Highest accepted level
pub const MAX_LEVEL: u32 = 9;

/// Reader yielding the compressed form of `source`
pub enum Compressor<R: Read> {
    Stored(R),
    Gzip(flate2::read::GzEncoder<R>),
}

impl<R: Read> Compressor<R> {
    pub fn new(source: R, level: u32) -> Self {
        if level == 0 {
            Compressor::Stored(source)
        } else {
            Compressor::Gzip(flate2::read::GzEncoder::new(
                source,
                Compression::new(level.min(MAX_LEVEL)),
            ))
        }
    }
}

impl<R: Read> Read for Compressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Compressor::Stored(inner) => inner.read(buf),
            Compressor::Gzip(inner) => inner.read(buf),
        }
    }
}

/// Writer that reverses [`Compressor`] into `sink`
///
/// Malformed input surfaces as `InvalidData` or `InvalidInput`. Call
/// [`Decompressor::finish`] to detect a truncated gzip stream.
pub enum Decompressor<W: Write> {
    Stored(W),
    Gzip(flate2::write::GzDecoder<W>),
}

impl<W: Write> Decompressor<W> {
    pub fn new(sink: W, level: u32) -> Self {
        if level == 0 {
            Decompressor::Stored(sink)
        } else {
            Decompressor::Gzip(flate2::write::GzDecoder::new(sink))
        }
    }

    /// Flush remaining output and return the sink
    pub fn finish(self) -> io::Result<W> {
        match self {
            Decompressor::Stored(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            Decompressor::Gzip(inner) => {
                let mut sink = inner.finish()?;
                sink.flush()?;
                Ok(sink)
            }
        }
    }
}

impl<W: Write> Write for Decompressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Decompressor::Stored(inner) => inner.write(buf),
            Decompressor::Gzip(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Decompressor::Stored(inner) => inner.flush(),
            Decompressor::Gzip(inner) => inner.flush(),
        }
    }
}

/// Whether an I/O error means the compressed bytes themselves are malformed
pub fn is_malformed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
    )
}
