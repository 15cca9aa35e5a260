// Backing byte sources and sinks underneath the transform chain

use super::StreamError;
use std::io::{self, Read, Seek, SeekFrom, Write};

type Result<T> = std::result::Result<T, StreamError>;

/// The raw end of a stream chain.
///
/// `read` returns up to `n` bytes and only returns fewer at the end of the data.
/// Offsets are relative to the position the stream had when it was wrapped.
pub trait RawStream {
    fn read(&mut self, _n: usize) -> Result<Vec<u8>> {
        Err(StreamError::WrongDirection("read from a write-only stream"))
    }

    fn write(&mut self, _data: &[u8]) -> Result<()> {
        Err(StreamError::WrongDirection("write to a read-only stream"))
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn offset(&self) -> u64;

    fn seek(&mut self, _pos: u64) -> Result<()> {
        Err(StreamError::Unseekable)
    }

    fn bytes_remaining(&mut self) -> Result<u64> {
        Err(StreamError::Unsupported("bytes_remaining on an unseekable stream"))
    }
}

fn read_up_to<R: Read>(inner: &mut R, n: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(n.min(64 * 1024));
    inner.take(n as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// A reader whose underlying stream supports seeking
#[derive(Debug)]
pub struct SeekableReader<R> {
    inner: R,
    start: u64,
    offset: u64,
}

impl<R: Read + Seek> SeekableReader<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let start = inner.stream_position()?;
        Ok(Self {
            inner,
            start,
            offset: 0,
        })
    }

    /// Wraps a source that is known to sit at its first byte
    pub fn from_start(inner: R) -> Self {
        Self {
            inner,
            start: 0,
            offset: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> RawStream for SeekableReader<R> {
    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let data = read_up_to(&mut self.inner, n)?;
        self.offset += data.len() as u64;
        Ok(data)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(self.start + pos))?;
        self.offset = pos;
        Ok(())
    }

    fn bytes_remaining(&mut self) -> Result<u64> {
        let end = self.inner.seek(SeekFrom::End(0))?;
        let here = self.start + self.offset;
        self.inner.seek(SeekFrom::Start(here))?;
        Ok(end.saturating_sub(here))
    }
}

/// A reader over a pipe-like source; offsets are counted, never queried
#[derive(Debug)]
pub struct UnseekableReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> UnseekableReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }
}

impl<R: Read> RawStream for UnseekableReader<R> {
    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let data = read_up_to(&mut self.inner, n)?;
        self.offset += data.len() as u64;
        Ok(data)
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

/// A writer whose underlying sink supports seeking
#[derive(Debug)]
pub struct SeekableWriter<W> {
    inner: W,
    start: u64,
    offset: u64,
}

impl<W: Write + Seek> SeekableWriter<W> {
    pub fn new(mut inner: W) -> io::Result<Self> {
        let start = inner.stream_position()?;
        Ok(Self {
            inner,
            start,
            offset: 0,
        })
    }
}

impl<W: Write + Seek> RawStream for SeekableWriter<W> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(self.start + pos))?;
        self.offset = pos;
        Ok(())
    }

    fn bytes_remaining(&mut self) -> Result<u64> {
        let end = self.inner.seek(SeekFrom::End(0))?;
        let here = self.start + self.offset;
        self.inner.seek(SeekFrom::Start(here))?;
        Ok(end.saturating_sub(here))
    }
}

/// A writer over an append-only sink
#[derive(Debug)]
pub struct UnseekableWriter<W> {
    inner: W,
    offset: u64,
}

impl<W: Write> UnseekableWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, offset: 0 }
    }
}

impl<W: Write> RawStream for UnseekableWriter<W> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(())
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_seekable_reader_offsets() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3, 4, 5]);
        cursor.set_position(1);
        let mut raw = SeekableReader::new(cursor).unwrap();

        assert_eq!(raw.read(2).unwrap(), vec![2, 3]);
        assert_eq!(raw.offset(), 2);
        assert_eq!(raw.bytes_remaining().unwrap(), 2);

        raw.seek(0).unwrap();
        assert_eq!(raw.read(10).unwrap(), vec![2, 3, 4, 5]);
        assert!(raw.read(1).unwrap().is_empty());
    }

    #[test]
    fn test_unseekable_reader() {
        let mut raw = UnseekableReader::new(&[9u8, 8, 7][..]);
        assert!(!raw.is_seekable());
        assert_eq!(raw.read(2).unwrap(), vec![9, 8]);
        assert_eq!(raw.offset(), 2);
        assert!(matches!(raw.seek(0), Err(StreamError::Unseekable)));
        assert!(matches!(
            raw.bytes_remaining(),
            Err(StreamError::Unsupported(_))
        ));
        assert!(raw.write(&[1]).is_err());
    }

    #[test]
    fn test_writers() {
        let mut buf = Vec::new();
        {
            let mut raw = SeekableWriter::new(Cursor::new(&mut buf)).unwrap();
            raw.write(&[1, 2, 3]).unwrap();
            raw.seek(1).unwrap();
            raw.write(&[9]).unwrap();
            assert_eq!(raw.offset(), 2);
        }
        assert_eq!(buf, vec![1, 9, 3]);

        let mut out = Vec::new();
        let mut raw = UnseekableWriter::new(&mut out);
        raw.write(&[4, 5]).unwrap();
        assert_eq!(raw.offset(), 2);
        assert!(raw.read(1).is_err());
    }
}
