// Stream configuration

/// Tunables for a [`super::BitStream`]
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Largest number of bytes pulled per read when skipping on an unseekable
    /// chain or reading to the end of the data
    pub chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { chunk_size: 4096 }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk size (clamped to at least one byte)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(StreamConfig::default().chunk_size, 4096);
        assert_eq!(StreamConfig::new().with_chunk_size(0).chunk_size, 1);
    }
}
