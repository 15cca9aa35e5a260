// Concrete transforms shipped with the engine

use super::transform::{Chain, Transform};
use super::StreamError;

type Result<T> = std::result::Result<T, StreamError>;

/// Bounds a nested object to exactly `length` bytes.
///
/// Reads stop at the bound and trailing unread bytes are discarded when the
/// object finishes; writes are zero-padded up to the bound. Writing or seeking
/// past the bound is an error.
#[derive(Debug, Clone)]
pub struct SubRange {
    length: u64,
    start: u64,
    position: u64,
}

impl SubRange {
    pub fn new(length: u64) -> Self {
        Self {
            length,
            start: 0,
            position: 0,
        }
    }

    fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.position)
    }
}

impl Transform for SubRange {
    fn before_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()> {
        self.start = next.offset()?;
        self.position = 0;
        Ok(())
    }

    fn read(&mut self, next: &mut Chain<'_, '_>, n: usize) -> Result<Vec<u8>> {
        let allowed = (n as u64).min(self.remaining()) as usize;
        if allowed == 0 {
            return Ok(Vec::new());
        }
        let data = next.read(allowed)?;
        self.position += data.len() as u64;
        Ok(data)
    }

    fn write(&mut self, next: &mut Chain<'_, '_>, data: &[u8]) -> Result<()> {
        let end = self.position + data.len() as u64;
        if end > self.length {
            return Err(StreamError::OutOfBounds {
                offset: self.start + end,
                limit: self.start + self.length,
            });
        }
        next.write(data)?;
        self.position = end;
        Ok(())
    }

    fn seek(&mut self, next: &mut Chain<'_, '_>, pos: u64) -> Result<()> {
        if pos < self.start || pos > self.start + self.length {
            return Err(StreamError::OutOfBounds {
                offset: pos,
                limit: self.start + self.length,
            });
        }
        next.seek(pos)?;
        self.position = pos - self.start;
        Ok(())
    }

    fn bytes_remaining(&mut self, _next: &mut Chain<'_, '_>) -> Result<u64> {
        Ok(self.remaining())
    }

    fn after_read_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()> {
        let rest = self.remaining();
        if rest > 0 {
            tracing::trace!("discarding {} unread bytes at end of sub-range", rest);
            next.skip(rest)?;
            self.position = self.length;
        }
        Ok(())
    }

    fn after_write_transform(&mut self, next: &mut Chain<'_, '_>) -> Result<()> {
        let rest = self.remaining();
        if rest > 0 {
            tracing::trace!("padding sub-range with {} zero bytes", rest);
            next.write_zeros(rest)?;
            self.position = self.length;
        }
        Ok(())
    }
}

/// XORs every byte with a repeating key.
#[derive(Debug, Clone)]
pub struct Xor {
    key: Vec<u8>,
    position: usize,
}

impl Xor {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        let mut key = key.into();
        if key.is_empty() {
            key.push(0);
        }
        Self { key, position: 0 }
    }

    fn apply(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .map(|b| {
                let k = self.key[self.position % self.key.len()];
                self.position += 1;
                b ^ k
            })
            .collect()
    }
}

impl Transform for Xor {
    fn before_transform(&mut self, _next: &mut Chain<'_, '_>) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn read(&mut self, next: &mut Chain<'_, '_>, n: usize) -> Result<Vec<u8>> {
        let data = next.read(n)?;
        Ok(self.apply(&data))
    }

    fn write(&mut self, next: &mut Chain<'_, '_>, data: &[u8]) -> Result<()> {
        let encoded = self.apply(data);
        next.write(&encoded)
    }

    fn seek(&mut self, next: &mut Chain<'_, '_>, pos: u64) -> Result<()> {
        let here = next.offset()?;
        next.seek(pos)?;
        let delta = pos as i64 - here as i64;
        self.position = (self.position as i64 + delta).max(0) as usize;
        Ok(())
    }
}
