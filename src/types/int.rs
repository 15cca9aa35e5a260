// Integer and bit-field codecs
//
// Byte-sized integers (uint8, int16be, uint24le ...) and packed bit fields
// (bit3, sbit5le ...) share one codec; registry synthesis picks the width.

use super::codec::{wrong_type, Codec, CodecCtx};
use crate::core::{Result, Value};
use crate::io::bits::{mask, sign_extend};
use crate::io::{BitStream, Endian};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Int {
    bits: u32,
    signed: bool,
    endian: Endian,
    /// Packed into the bit buffer rather than read as whole bytes
    packed: bool,
}

impl Int {
    /// A whole-byte integer; `bits` must be a multiple of 8
    pub fn bytes(bits: u32, signed: bool, endian: Endian) -> Self {
        Self {
            bits,
            signed,
            endian,
            packed: false,
        }
    }

    /// A bit field of 1..=64 bits
    pub fn bits(bits: u32, signed: bool, endian: Endian) -> Self {
        Self {
            bits,
            signed,
            endian,
            packed: true,
        }
    }

    pub fn width(&self) -> u32 {
        self.bits
    }

    /// Inclusive range of representable values
    pub fn range(&self) -> (i128, i128) {
        if self.signed {
            let half = 1i128 << (self.bits - 1);
            (-half, half - 1)
        } else {
            (0, (1i128 << self.bits) - 1)
        }
    }

    fn clamp(&self, value: i128) -> i128 {
        let (min, max) = self.range();
        value.clamp(min, max)
    }

    fn to_raw(&self, value: i128) -> u64 {
        ((value as u128) & mask(self.bits)) as u64
    }

    fn from_raw(&self, raw: u64) -> i128 {
        if self.signed {
            sign_extend(raw, self.bits) as i128
        } else {
            raw as i128
        }
    }
}

impl Codec for Int {
    fn read(&self, io: &mut BitStream<'_>, _ctx: &CodecCtx<'_>) -> Result<Value> {
        let raw = if self.packed {
            io.read_bits(self.bits, self.endian)?
        } else {
            let data = io.read_bytes((self.bits / 8) as usize)?;
            match self.endian {
                Endian::Big => data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
                Endian::Little => data.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64),
            }
        };
        Ok(Value::Int(self.from_raw(raw)))
    }

    fn write(&self, io: &mut BitStream<'_>, value: &Value, _ctx: &CodecCtx<'_>) -> Result<()> {
        let value = value.as_int().ok_or_else(|| wrong_type("int", value))?;
        let raw = self.to_raw(self.clamp(value));
        if self.packed {
            io.write_bits(raw, self.bits, self.endian)?;
        } else {
            let n = (self.bits / 8) as usize;
            let be = raw.to_be_bytes();
            let mut data = be[8 - n..].to_vec();
            if self.endian.is_little() {
                data.reverse();
            }
            io.write_bytes(&data)?;
        }
        Ok(())
    }

    fn num_bits(&self, _value: &Value, _ctx: &CodecCtx<'_>) -> Result<u64> {
        Ok(self.bits as u64)
    }

    fn default_value(&self, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(Value::Int(0))
    }

    /// Out-of-range integers saturate at the type's bounds
    fn coerce(&self, value: &Value) -> Result<Value> {
        match value.as_int() {
            Some(i) => Ok(Value::Int(self.clamp(i))),
            None => Err(wrong_type("int", value)),
        }
    }

    fn aligns_to_byte(&self) -> bool {
        !self.packed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Mode, Scope};
    use crate::schema::prototype::{Kind, Prototype};
    use indexmap::IndexMap;
    use std::io::Cursor;
    use std::sync::Arc;

    fn with_ctx<R>(f: impl FnOnce(&CodecCtx<'_>) -> R) -> R {
        let proto = Prototype::new(
            "int",
            IndexMap::new(),
            Kind::Primitive {
                codec: Arc::new(Int::bytes(8, false, Endian::Big)),
            },
        );
        let scope = Scope::root(Mode::Idle);
        let ctx = CodecCtx::new(&proto, &scope);
        f(&ctx)
    }

    fn encode(codec: &Int, value: i128) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut io = BitStream::writer(Cursor::new(&mut buf)).unwrap();
            with_ctx(|ctx| codec.write(&mut io, &Value::Int(value), ctx)).unwrap();
            io.flush_bits().unwrap();
        }
        buf
    }

    #[test]
    fn test_byte_order() {
        assert_eq!(encode(&Int::bytes(16, false, Endian::Big), 0x1234), vec![0x12, 0x34]);
        assert_eq!(encode(&Int::bytes(16, false, Endian::Little), 0x1234), vec![0x34, 0x12]);
        assert_eq!(
            encode(&Int::bytes(24, false, Endian::Little), 0x010203),
            vec![0x03, 0x02, 0x01]
        );
        assert_eq!(encode(&Int::bytes(8, true, Endian::Big), -1), vec![0xFF]);
    }

    #[test]
    fn test_signed_read() {
        let data = [0xFF, 0xFE];
        let mut io = BitStream::from_bytes(&data);
        let codec = Int::bytes(16, true, Endian::Big);
        assert_eq!(with_ctx(|ctx| codec.read(&mut io, ctx)).unwrap(), Value::Int(-2));

        let data = [0b1110_0000];
        let mut io = BitStream::from_bytes(&data);
        let codec = Int::bits(3, true, Endian::Big);
        assert_eq!(with_ctx(|ctx| codec.read(&mut io, ctx)).unwrap(), Value::Int(-1));
    }

    #[test]
    fn test_coerce_saturates() {
        let codec = Int::bytes(8, false, Endian::Big);
        assert_eq!(codec.coerce(&Value::Int(300)).unwrap(), Value::Int(255));
        assert_eq!(codec.coerce(&Value::Int(-5)).unwrap(), Value::Int(0));

        let codec = Int::bits(4, true, Endian::Big);
        assert_eq!(codec.range(), (-8, 7));
        assert_eq!(codec.coerce(&Value::Int(-100)).unwrap(), Value::Int(-8));
        assert!(codec.coerce(&Value::Str("x".into())).is_err());
    }

    #[test]
    fn test_full_width() {
        let codec = Int::bytes(64, false, Endian::Big);
        let bytes = encode(&codec, u64::MAX as i128);
        assert_eq!(bytes, vec![0xFF; 8]);
        let mut io = BitStream::from_bytes(&bytes);
        assert_eq!(
            with_ctx(|ctx| codec.read(&mut io, ctx)).unwrap(),
            Value::Int(u64::MAX as i128)
        );
    }
}
