// Stackable stream filters and the chain that links them to the raw stream

use super::raw::RawStream;
use super::StreamError;
use std::fmt;

type Result<T> = std::result::Result<T, StreamError>;

/// A stream filter spliced around the raw stream for the duration of one object.
///
/// Every operation receives the rest of the chain as `next`; the default
/// implementations forward unchanged. A transform that alters the number of
/// bytes passing through it must set [`Transform::CHANGES_STREAM_LENGTH`], which
/// makes the whole chain unseekable while it is active.
pub trait Transform: 'static {
    const CHANGES_STREAM_LENGTH: bool = false;

    /// Runs once when the transform is spliced into the chain
    fn before_transform(&mut self, _next: &mut Chain<'_, '_>) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, next: &mut Chain<'_, '_>, n: usize) -> Result<Vec<u8>> {
        next.read(n)
    }

    fn write(&mut self, next: &mut Chain<'_, '_>, data: &[u8]) -> Result<()> {
        next.write(data)
    }

    fn seek(&mut self, next: &mut Chain<'_, '_>, pos: u64) -> Result<()> {
        next.seek(pos)
    }

    fn offset(&mut self, next: &mut Chain<'_, '_>) -> Result<u64> {
        next.offset()
    }

    fn bytes_remaining(&mut self, next: &mut Chain<'_, '_>) -> Result<u64> {
        next.bytes_remaining()
    }

    /// Runs once after the wrapped object has finished reading
    fn after_read_transform(&mut self, _next: &mut Chain<'_, '_>) -> Result<()> {
        Ok(())
    }

    /// Runs once after the wrapped object has finished writing
    fn after_write_transform(&mut self, _next: &mut Chain<'_, '_>) -> Result<()> {
        Ok(())
    }
}

/// Object-safe mirror of [`Transform`] used once a transform is boxed.
trait DynTransform {
    fn before_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()>;
    fn read(&mut self, next: &mut Chain<'_, '_>, n: usize) -> Result<Vec<u8>>;
    fn write(&mut self, next: &mut Chain<'_, '_>, data: &[u8]) -> Result<()>;
    fn seek(&mut self, next: &mut Chain<'_, '_>, pos: u64) -> Result<()>;
    fn offset(&mut self, next: &mut Chain<'_, '_>) -> Result<u64>;
    fn bytes_remaining(&mut self, next: &mut Chain<'_, '_>) -> Result<u64>;
    fn after_read_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()>;
    fn after_write_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()>;
}

impl<T: Transform> DynTransform for T {
    fn before_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()> {
        Transform::before_transform(self, next)
    }

    fn read(&mut self, next: &mut Chain<'_, '_>, n: usize) -> Result<Vec<u8>> {
        Transform::read(self, next, n)
    }

    fn write(&mut self, next: &mut Chain<'_, '_>, data: &[u8]) -> Result<()> {
        Transform::write(self, next, data)
    }

    fn seek(&mut self, next: &mut Chain<'_, '_>, pos: u64) -> Result<()> {
        Transform::seek(self, next, pos)
    }

    fn offset(&mut self, next: &mut Chain<'_, '_>) -> Result<u64> {
        Transform::offset(self, next)
    }

    fn bytes_remaining(&mut self, next: &mut Chain<'_, '_>) -> Result<u64> {
        Transform::bytes_remaining(self, next)
    }

    fn after_read_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()> {
        Transform::after_read_transform(self, next)
    }

    fn after_write_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()> {
        Transform::after_write_transform(self, next)
    }
}

/// A type-erased transform that remembers whether it changes stream length
pub struct BoxedTransform {
    inner: Box<dyn DynTransform>,
    changes_length: bool,
    name: &'static str,
}

impl BoxedTransform {
    pub fn new<T: Transform>(transform: T) -> Self {
        Self {
            inner: Box::new(transform),
            changes_length: T::CHANGES_STREAM_LENGTH,
            name: std::any::type_name::<T>(),
        }
    }

    pub fn changes_length(&self) -> bool {
        self.changes_length
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for BoxedTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedTransform")
            .field("name", &self.name)
            .field("changes_length", &self.changes_length)
            .finish()
    }
}

/// One spliced transform plus the bookkeeping the chain keeps for it
#[derive(Debug)]
pub(crate) struct Link {
    transform: BoxedTransform,
    /// Offset of the next link when this one was spliced in
    start: u64,
    /// Bytes handed upward (read) or accepted (write) by this link
    passed: u64,
}

impl Link {
    pub(crate) fn new(transform: BoxedTransform, start: u64) -> Self {
        Self {
            transform,
            start,
            passed: 0,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.transform.name
    }

    pub(crate) fn before_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()> {
        self.transform.inner.before_transform(next)
    }

    pub(crate) fn after_read_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()> {
        self.transform.inner.after_read_transform(next)
    }

    pub(crate) fn after_write_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()> {
        self.transform.inner.after_write_transform(next)
    }
}

/// The remainder of a transform chain, from some link down to the raw stream.
///
/// Links are stored bottom-up; the last link is the outermost transform and
/// the first to see each operation.
pub struct Chain<'c, 'a> {
    links: &'c mut [Link],
    raw: &'c mut (dyn RawStream + 'a),
    chunk_size: usize,
}

impl<'c, 'a> Chain<'c, 'a> {
    pub(crate) fn new(
        links: &'c mut [Link],
        raw: &'c mut (dyn RawStream + 'a),
        chunk_size: usize,
    ) -> Self {
        Self {
            links,
            raw,
            chunk_size: chunk_size.max(1),
        }
    }

    /// True when neither the raw stream nor any link prevents seeking
    pub fn is_seekable(&self) -> bool {
        self.raw.is_seekable() && self.links.iter().all(|l| !l.transform.changes_length)
    }

    /// Reads up to `n` bytes; fewer only at the end of the data.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let chunk_size = self.chunk_size;
        match self.links.split_last_mut() {
            Some((top, rest)) => {
                let mut next = Chain::new(rest, &mut *self.raw, chunk_size);
                let data = top.transform.inner.read(&mut next, n)?;
                top.passed += data.len() as u64;
                Ok(data)
            }
            None => self.raw.read(n),
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let chunk_size = self.chunk_size;
        match self.links.split_last_mut() {
            Some((top, rest)) => {
                let mut next = Chain::new(rest, &mut *self.raw, chunk_size);
                top.transform.inner.write(&mut next, data)?;
                top.passed += data.len() as u64;
                Ok(())
            }
            None => self.raw.write(data),
        }
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if !self.is_seekable() {
            return Err(StreamError::Unseekable);
        }
        let chunk_size = self.chunk_size;
        match self.links.split_last_mut() {
            Some((top, rest)) => {
                let mut next = Chain::new(rest, &mut *self.raw, chunk_size);
                top.transform.inner.seek(&mut next, pos)
            }
            None => self.raw.seek(pos),
        }
    }

    /// Current byte offset. Inside a length-changing link this counts the
    /// bytes that link has passed since it was spliced in.
    pub fn offset(&mut self) -> Result<u64> {
        let chunk_size = self.chunk_size;
        match self.links.split_last_mut() {
            Some((top, _)) if top.transform.changes_length => Ok(top.start + top.passed),
            Some((top, rest)) => {
                let mut next = Chain::new(rest, &mut *self.raw, chunk_size);
                top.transform.inner.offset(&mut next)
            }
            None => Ok(self.raw.offset()),
        }
    }

    pub fn bytes_remaining(&mut self) -> Result<u64> {
        if !self.is_seekable() {
            return Err(StreamError::Unsupported(
                "bytes_remaining on an unseekable stream",
            ));
        }
        let chunk_size = self.chunk_size;
        match self.links.split_last_mut() {
            Some((top, rest)) => {
                let mut next = Chain::new(rest, &mut *self.raw, chunk_size);
                top.transform.inner.bytes_remaining(&mut next)
            }
            None => self.raw.bytes_remaining(),
        }
    }

    /// Skips `n` bytes: a seek when possible, otherwise read-and-discard in
    /// chunks of at most `chunk_size` bytes.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        if self.is_seekable() {
            let pos = self.offset()? + n;
            return self.seek(pos);
        }

        tracing::trace!("skipping {} bytes on an unseekable chain", n);
        let mut remaining = n;
        while remaining > 0 {
            let want = remaining.min(self.chunk_size as u64) as usize;
            let got = self.read(want)?;
            if got.is_empty() {
                return Err(StreamError::EndOfStream);
            }
            remaining -= got.len() as u64;
        }
        Ok(())
    }

    /// Writes `n` zero bytes in chunks of at most `chunk_size` bytes
    pub fn write_zeros(&mut self, n: u64) -> Result<()> {
        let zeros = vec![0u8; (self.chunk_size as u64).min(n) as usize];
        let mut remaining = n;
        while remaining > 0 {
            let len = remaining.min(zeros.len() as u64) as usize;
            self.write(&zeros[..len])?;
            remaining -= len as u64;
        }
        Ok(())
    }

    /// Reads everything up to the end of the data, chunk by chunk
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read(self.chunk_size)?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }
}
