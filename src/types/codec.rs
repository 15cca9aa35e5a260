// Primitive codecs: how a single value is laid out in the stream

use crate::core::{Eval, Result, Scope, UsageError, Value};
use crate::core::error::mismatch;
use crate::io::BitStream;
use crate::schema::prototype::Prototype;
use std::fmt;
use std::sync::Arc;

/// What a codec can see while it works: its prototype and the scope its
/// parameters are evaluated in
pub struct CodecCtx<'a> {
    pub proto: &'a Prototype,
    pub scope: &'a Scope<'a>,
}

impl<'a> CodecCtx<'a> {
    pub fn new(proto: &'a Prototype, scope: &'a Scope<'a>) -> Self {
        Self { proto, scope }
    }

    /// Evaluates a parameter, if declared
    pub fn param(&self, name: &str) -> Result<Option<Value>> {
        match self.proto.param(name) {
            Some(param) => Eval::new(self.scope).eval(param).map(Some),
            None => Ok(None),
        }
    }

    pub fn usize_param(&self, name: &str) -> Result<Option<usize>> {
        match self.param(name)? {
            Some(value) => value
                .as_usize()
                .map(Some)
                .ok_or_else(|| mismatch("unsigned int", &value)),
            None => Ok(None),
        }
    }

    pub fn bool_param(&self, name: &str) -> Result<bool> {
        Ok(self.param(name)?.map(|v| v.truthy()).unwrap_or(false))
    }
}

/// Reads, writes and sizes one kind of primitive value
pub trait Codec: fmt::Debug + Send + Sync {
    fn read(&self, io: &mut BitStream<'_>, ctx: &CodecCtx<'_>) -> Result<Value>;

    fn write(&self, io: &mut BitStream<'_>, value: &Value, ctx: &CodecCtx<'_>) -> Result<()>;

    fn num_bits(&self, value: &Value, ctx: &CodecCtx<'_>) -> Result<u64>;

    fn default_value(&self, ctx: &CodecCtx<'_>) -> Result<Value>;

    /// Converts an assigned value into this codec's domain
    fn coerce(&self, value: &Value) -> Result<Value>;

    /// Final form of the value before it is sized or written
    fn normalize(&self, value: Value, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(value)
    }

    /// Form of the value shown to callers
    fn snapshot(&self, value: Value, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(value)
    }

    fn aligns_to_byte(&self) -> bool {
        true
    }
}

/// Reports a value of the wrong kind handed to a codec
pub(crate) fn wrong_type(expected: &'static str, value: &Value) -> crate::core::Error {
    UsageError::TypeMismatch {
        expected,
        found: value.type_name().to_string(),
    }
    .into()
}

/// Runs a byte-oriented codec through bit operations so it can start
/// mid-byte.
#[derive(Debug)]
pub struct BitAligned {
    inner: Arc<dyn Codec>,
}

impl BitAligned {
    pub fn new(inner: Arc<dyn Codec>) -> Self {
        Self { inner }
    }
}

impl Codec for BitAligned {
    fn read(&self, io: &mut BitStream<'_>, ctx: &CodecCtx<'_>) -> Result<Value> {
        io.with_bit_aligned(|io| self.inner.read(io, ctx))
    }

    fn write(&self, io: &mut BitStream<'_>, value: &Value, ctx: &CodecCtx<'_>) -> Result<()> {
        io.with_bit_aligned(|io| self.inner.write(io, value, ctx))
    }

    fn num_bits(&self, value: &Value, ctx: &CodecCtx<'_>) -> Result<u64> {
        self.inner.num_bits(value, ctx)
    }

    fn default_value(&self, ctx: &CodecCtx<'_>) -> Result<Value> {
        self.inner.default_value(ctx)
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        self.inner.coerce(value)
    }

    fn normalize(&self, value: Value, ctx: &CodecCtx<'_>) -> Result<Value> {
        self.inner.normalize(value, ctx)
    }

    fn snapshot(&self, value: Value, ctx: &CodecCtx<'_>) -> Result<Value> {
        self.inner.snapshot(value, ctx)
    }

    fn aligns_to_byte(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;
    use crate::io::Endian;
    use crate::schema::prototype::Kind;
    use crate::types::int::Int;
    use indexmap::IndexMap;

    #[test]
    fn test_bit_aligned_reads_across_byte_boundary() {
        let codec = BitAligned::new(Arc::new(Int::bytes(16, false, Endian::Big)));
        let proto = Prototype::new(
            "uint16be",
            IndexMap::new(),
            Kind::Primitive {
                codec: Arc::new(Int::bytes(8, false, Endian::Big)),
            },
        );
        let scope = Scope::root(Mode::Reading);
        let ctx = CodecCtx::new(&proto, &scope);

        let data = [0b0001_0010, 0b0011_0100, 0b0101_0000];
        let mut io = BitStream::from_bytes(&data);
        io.read_bits(4, Endian::Big).unwrap();
        assert_eq!(codec.read(&mut io, &ctx).unwrap(), Value::Int(0x2345));
        assert!(!codec.aligns_to_byte());
    }
}
