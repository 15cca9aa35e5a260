// Byte and bit level reading/writing over a raw stream and its transform chain

use super::bits::{BitBuffer, Endian};
use super::config::StreamConfig;
use super::raw::{RawStream, SeekableReader, SeekableWriter, UnseekableReader, UnseekableWriter};
use super::transform::{BoxedTransform, Chain, Link, Transform};
use super::StreamError;
use std::io::{Cursor, Read, Seek, Write};

type Result<T> = std::result::Result<T, StreamError>;

/// Whether a stream decodes or encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// A bit-addressable stream.
///
/// Byte operations always start on a byte boundary: pending bits are
/// discarded (reading) or zero-padded and emitted (writing) first. Switching
/// bit endianness mid-byte does the same.
pub struct BitStream<'a> {
    raw: Box<dyn RawStream + 'a>,
    links: Vec<Link>,
    direction: Direction,
    bits: BitBuffer,
    bit_aligned: bool,
    config: StreamConfig,
}

impl<'a> BitStream<'a> {
    fn from_raw(raw: Box<dyn RawStream + 'a>, direction: Direction) -> Self {
        Self {
            raw,
            links: Vec::new(),
            direction,
            bits: BitBuffer::new(),
            bit_aligned: false,
            config: StreamConfig::default(),
        }
    }

    /// Wrap a seekable source for reading
    pub fn reader<R: Read + Seek + 'a>(source: R) -> Result<Self> {
        Ok(Self::from_raw(
            Box::new(SeekableReader::new(source)?),
            Direction::Read,
        ))
    }

    /// Wrap a source without seek support; skips degrade to read-and-discard
    pub fn unseekable_reader<R: Read + 'a>(source: R) -> Self {
        Self::from_raw(Box::new(UnseekableReader::new(source)), Direction::Read)
    }

    /// Wrap an in-memory buffer for reading
    pub fn from_bytes(data: &'a [u8]) -> Self {
        Self::from_raw(
            Box::new(SeekableReader::from_start(Cursor::new(data))),
            Direction::Read,
        )
    }

    /// Wrap a seekable sink for writing
    pub fn writer<W: Write + Seek + 'a>(sink: W) -> Result<Self> {
        Ok(Self::from_raw(
            Box::new(SeekableWriter::new(sink)?),
            Direction::Write,
        ))
    }

    /// Wrap an append-only sink for writing
    pub fn unseekable_writer<W: Write + 'a>(sink: W) -> Self {
        Self::from_raw(Box::new(UnseekableWriter::new(sink)), Direction::Write)
    }

    /// Wrap any raw stream implementation
    pub fn with_raw(raw: impl RawStream + 'a, direction: Direction) -> Self {
        Self::from_raw(Box::new(raw), direction)
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn pending_bits(&self) -> u32 {
        self.bits.pending_bits()
    }

    fn chain(&mut self) -> Chain<'_, 'a> {
        Chain::new(&mut self.links, &mut *self.raw, self.config.chunk_size)
    }

    fn require(&self, direction: Direction) -> Result<()> {
        if self.direction == direction {
            return Ok(());
        }
        Err(StreamError::WrongDirection(match direction {
            Direction::Read => "read from a write stream",
            Direction::Write => "write to a read stream",
        }))
    }

    pub fn is_seekable(&mut self) -> bool {
        self.chain().is_seekable()
    }

    /// Byte offset relative to where the stream was wrapped
    pub fn offset(&mut self) -> Result<u64> {
        self.chain().offset()
    }

    pub fn bytes_remaining(&mut self) -> Result<u64> {
        self.chain().bytes_remaining()
    }

    /// Drops a partial byte left over from bit reads
    pub fn discard_bits(&mut self) {
        self.bits.discard();
    }

    /// Emits a partial byte left over from bit writes, zero padded
    pub fn flush_bits(&mut self) -> Result<()> {
        if let Some(byte) = self.bits.flush() {
            self.chain().write(&[byte])?;
        }
        Ok(())
    }

    /// Brings the stream back to a byte boundary for its direction
    pub fn align(&mut self) -> Result<()> {
        match self.direction {
            Direction::Read => {
                self.discard_bits();
                Ok(())
            }
            Direction::Write => self.flush_bits(),
        }
    }

    fn read_exact_chain(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut data = self.chain().read(n)?;
        while data.len() < n {
            let more = self.chain().read(n - data.len())?;
            if more.is_empty() {
                break;
            }
            data.extend_from_slice(&more);
        }

        if data.len() == n {
            Ok(data)
        } else if data.is_empty() {
            Err(StreamError::EndOfStream)
        } else {
            Err(StreamError::Truncated {
                expected: n,
                actual: data.len(),
            })
        }
    }

    /// Reads exactly `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.require(Direction::Read)?;
        if self.bit_aligned {
            let mut out = Vec::with_capacity(n);
            for _ in 0..n {
                match self.read_bits(8, Endian::Big) {
                    Ok(byte) => out.push(byte as u8),
                    Err(StreamError::EndOfStream) if !out.is_empty() => {
                        return Err(StreamError::Truncated {
                            expected: n,
                            actual: out.len(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
            return Ok(out);
        }

        self.discard_bits();
        if n == 0 {
            return Ok(Vec::new());
        }
        self.read_exact_chain(n)
    }

    /// Reads an unsigned `n`-bit value (1..=64)
    pub fn read_bits(&mut self, n: u32, endian: Endian) -> Result<u64> {
        self.require(Direction::Read)?;
        if n == 0 || n > 64 {
            return Err(StreamError::InvalidBitCount(n));
        }
        if self.bits.endian_switch(endian) {
            self.bits.discard();
        }

        let needed = self.bits.bytes_needed(n);
        if needed > 0 {
            let data = self.read_exact_chain(needed)?;
            for byte in data {
                self.bits.feed(byte, endian);
            }
        }
        Ok(self.bits.take(n, endian))
    }

    /// Reads every remaining byte
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.require(Direction::Read)?;
        self.discard_bits();
        self.chain().read_to_end()
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.require(Direction::Write)?;
        if self.bit_aligned {
            for &byte in data {
                self.write_bits(byte as u64, 8, Endian::Big)?;
            }
            return Ok(());
        }

        self.flush_bits()?;
        self.chain().write(data)
    }

    /// Writes the low `n` bits of `value` (1..=64)
    pub fn write_bits(&mut self, value: u64, n: u32, endian: Endian) -> Result<()> {
        self.require(Direction::Write)?;
        if n == 0 || n > 64 {
            return Err(StreamError::InvalidBitCount(n));
        }
        if self.bits.endian_switch(endian) {
            self.flush_bits()?;
        }

        let completed = self.bits.put(value, n, endian);
        if !completed.is_empty() {
            self.chain().write(&completed)?;
        }
        Ok(())
    }

    /// Skips `n` bytes. Readers seek or discard; writers emit zero bytes.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.align()?;
        match self.direction {
            Direction::Read => self.chain().skip(n),
            Direction::Write => self.chain().write_zeros(n),
        }
    }

    pub fn seek_absolute(&mut self, pos: u64) -> Result<()> {
        self.align()?;
        self.chain().seek(pos)
    }

    /// Runs `f` with byte operations performed as consecutive 8-bit big-endian
    /// bit operations, so byte-oriented content can start mid-byte.
    pub fn with_bit_aligned<R, E: From<StreamError>>(
        &mut self,
        f: impl FnOnce(&mut Self) -> std::result::Result<R, E>,
    ) -> std::result::Result<R, E> {
        let previous = self.bit_aligned;
        self.bit_aligned = true;
        let result = f(self);
        self.bit_aligned = previous;
        result
    }

    /// Splices `transform` into the chain for the duration of `f`.
    pub fn transform<T: Transform, R, E: From<StreamError>>(
        &mut self,
        transform: T,
        f: impl FnOnce(&mut Self) -> std::result::Result<R, E>,
    ) -> std::result::Result<R, E> {
        self.splice(BoxedTransform::new(transform), f)
    }

    /// Type-erased form of [`BitStream::transform`]
    pub fn splice<R, E: From<StreamError>>(
        &mut self,
        transform: BoxedTransform,
        f: impl FnOnce(&mut Self) -> std::result::Result<R, E>,
    ) -> std::result::Result<R, E> {
        self.align()?;
        let start = self.offset()?;
        let mut link = Link::new(transform, start);
        link.before_transform(&mut self.chain())?;
        tracing::trace!("spliced transform {} at offset {}", link.name(), start);
        self.links.push(link);

        let result = f(self).and_then(|r| {
            self.align()?;
            Ok(r)
        });

        let Some(mut link) = self.links.pop() else {
            return result;
        };
        let value = result?;
        match self.direction {
            Direction::Read => link.after_read_transform(&mut self.chain())?,
            Direction::Write => link.after_write_transform(&mut self.chain())?,
        }
        tracing::trace!("removed transform {}", link.name());
        Ok(value)
    }

    /// Finishes the stream; a writer must not hold unflushed bits.
    pub fn close(self) -> Result<()> {
        if self.direction == Direction::Write && !self.bits.is_empty() {
            return Err(StreamError::UnflushedBits(self.bits.pending_bits()));
        }
        Ok(())
    }
}
