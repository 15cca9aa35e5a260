// Sub-byte accumulation for reading and writing bit fields

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Endianness for multi-byte values and bit packing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    pub fn is_big(&self) -> bool {
        matches!(self, Endian::Big)
    }

    pub fn is_little(&self) -> bool {
        matches!(self, Endian::Little)
    }

    /// Suffix used by the type registry for endian-specific type names
    pub fn suffix(&self) -> &'static str {
        match self {
            Endian::Big => "be",
            Endian::Little => "le",
        }
    }
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Big
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Big => write!(f, "big"),
            Endian::Little => write!(f, "little"),
        }
    }
}

impl FromStr for Endian {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "big" | "be" => Ok(Endian::Big),
            "little" | "le" => Ok(Endian::Little),
            other => Err(format!("unknown endian '{}'", other)),
        }
    }
}

/// Mask with the low `n` bits set (n <= 64)
pub fn mask(n: u32) -> u128 {
    (1u128 << n) - 1
}

/// Sign-extends the low `bits` of `value` to a full `i64`.
pub fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Partial-byte state shared by the reader and writer halves of a stream.
///
/// Reading: whole bytes are pulled in by the caller via [`BitBuffer::feed`] until
/// enough bits are pending, then [`BitBuffer::take`] extracts them. Writing:
/// [`BitBuffer::put`] packs bits and hands back every byte it completes.
#[derive(Debug, Clone, Default)]
pub struct BitBuffer {
    value: u128,
    pending: u32,
    endian: Option<Endian>,
}

impl BitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bits buffered but not yet consumed (reader) or emitted (writer)
    pub fn pending_bits(&self) -> u32 {
        self.pending
    }

    pub fn pending_value(&self) -> u128 {
        self.value
    }

    pub fn endian(&self) -> Option<Endian> {
        self.endian
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    /// Drops any partial byte without emitting it.
    pub fn discard(&mut self) {
        self.value = 0;
        self.pending = 0;
        self.endian = None;
    }

    /// Reader side: true when the requested endian differs from the bits
    /// currently buffered. The caller discards before continuing.
    pub fn endian_switch(&self, endian: Endian) -> bool {
        self.pending > 0 && self.endian.is_some_and(|e| e != endian)
    }

    /// Bytes that must be fed before `n` bits can be taken
    pub fn bytes_needed(&self, n: u32) -> usize {
        if n <= self.pending {
            0
        } else {
            (n - self.pending).div_ceil(8) as usize
        }
    }

    /// Reader side: accumulate one whole byte.
    pub fn feed(&mut self, byte: u8, endian: Endian) {
        self.endian = Some(endian);
        match endian {
            Endian::Big => {
                self.value = (self.value << 8) | byte as u128;
            }
            Endian::Little => {
                self.value |= (byte as u128) << self.pending;
            }
        }
        self.pending += 8;
    }

    /// Reader side: extract `n` bits. Caller guarantees enough bits are pending.
    pub fn take(&mut self, n: u32, endian: Endian) -> u64 {
        debug_assert!(n <= self.pending);
        let value = match endian {
            Endian::Big => {
                let v = (self.value >> (self.pending - n)) & mask(n);
                self.pending -= n;
                self.value &= mask(self.pending);
                v
            }
            Endian::Little => {
                let v = self.value & mask(n);
                self.value >>= n;
                self.pending -= n;
                v
            }
        };
        if self.pending == 0 {
            self.endian = None;
        }
        value as u64
    }

    /// Writer side: pack `n` bits of `value`, returning the bytes completed.
    pub fn put(&mut self, value: u64, n: u32, endian: Endian) -> Vec<u8> {
        let mut out = Vec::new();
        let mut val = value as u128 & mask(n);
        let mut nbits = n;
        self.endian = Some(endian);

        while nbits > 0 {
            let bits_req = 8 - self.pending;
            if nbits >= bits_req {
                match endian {
                    Endian::Big => {
                        let msb_bits = (val >> (nbits - bits_req)) & mask(bits_req);
                        nbits -= bits_req;
                        val &= mask(nbits);
                        self.value = (self.value << bits_req) | msb_bits;
                    }
                    Endian::Little => {
                        let lsb_bits = val & mask(bits_req);
                        nbits -= bits_req;
                        val >>= bits_req;
                        self.value |= lsb_bits << self.pending;
                    }
                }
                out.push(self.value as u8);
                self.value = 0;
                self.pending = 0;
            } else {
                match endian {
                    Endian::Big => self.value = (self.value << nbits) | val,
                    Endian::Little => self.value |= val << self.pending,
                }
                self.pending += nbits;
                nbits = 0;
            }
        }

        if self.pending == 0 {
            self.endian = None;
        }
        out
    }

    /// Writer side: pad the partial byte with zero bits and return it.
    pub fn flush(&mut self) -> Option<u8> {
        if self.pending == 0 {
            return None;
        }
        let endian = self.endian.unwrap_or_default();
        let fill = 8 - self.pending;
        self.put(0, fill, endian).pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_seq(bytes: &[u8], widths: &[u32], endian: Endian) -> Vec<u64> {
        let mut buf = BitBuffer::new();
        let mut input = bytes.iter();
        widths
            .iter()
            .map(|&n| {
                for _ in 0..buf.bytes_needed(n) {
                    buf.feed(*input.next().unwrap(), endian);
                }
                buf.take(n, endian)
            })
            .collect()
    }

    #[test]
    fn test_big_endian_reference_vector() {
        let values = read_seq(&[0x76, 0x54], &[6, 5], Endian::Big);
        assert_eq!(values, vec![0b011101, 0b10010]);
    }

    #[test]
    fn test_little_endian_fills_from_lsb() {
        let values = read_seq(&[0x76, 0x54], &[6, 5], Endian::Little);
        assert_eq!(values, vec![0b110110, 0b10001]);
    }

    #[test]
    fn test_write_matches_read() {
        let mut buf = BitBuffer::new();
        let mut out = buf.put(0b011101, 6, Endian::Big);
        out.extend(buf.put(0b10010, 5, Endian::Big));
        out.extend(buf.flush());
        assert_eq!(out, vec![0x76, 0x40]);

        let mut buf = BitBuffer::new();
        let mut out = buf.put(0b110110, 6, Endian::Little);
        out.extend(buf.put(0b10001, 5, Endian::Little));
        out.extend(buf.flush());
        assert_eq!(out, vec![0x76, 0x04]);
    }

    #[test]
    fn test_wide_values() {
        let mut buf = BitBuffer::new();
        let mut out = buf.put(0x3, 2, Endian::Big);
        out.extend(buf.put(u64::MAX, 64, Endian::Big));
        out.extend(buf.flush());
        assert_eq!(out.len(), 9);
        assert_eq!(read_seq(&out, &[2, 64], Endian::Big), vec![0x3, u64::MAX]);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0b1111, 4), -1);
        assert_eq!(sign_extend(0b0111, 4), 7);
        assert_eq!(sign_extend(0xFF, 8), -1);
    }

    #[test]
    fn test_endian_parse() {
        assert_eq!("little".parse::<Endian>().unwrap(), Endian::Little);
        assert_eq!("be".parse::<Endian>().unwrap(), Endian::Big);
        assert!("middle".parse::<Endian>().is_err());
    }
}
