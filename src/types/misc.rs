// Stream-position codecs: skip, rest and count_bytes_remaining

use super::codec::{Codec, CodecCtx};
use crate::core::{Result, Value};
use crate::io::BitStream;
use crate::schema::registry::{ParamRules, TypeDef};

/// Skips `length` bytes on read, emits that many zero bytes on write
#[derive(Debug, Clone, Copy, Default)]
pub struct Skip;

impl Skip {
    fn length(ctx: &CodecCtx<'_>) -> Result<u64> {
        Ok(ctx.usize_param("length")?.unwrap_or(0) as u64)
    }
}

impl Codec for Skip {
    fn read(&self, io: &mut BitStream<'_>, ctx: &CodecCtx<'_>) -> Result<Value> {
        let n = Self::length(ctx)?;
        tracing::trace!("Skipping {} bytes", n);
        io.skip(n)?;
        Ok(Value::Null)
    }

    fn write(&self, io: &mut BitStream<'_>, _value: &Value, ctx: &CodecCtx<'_>) -> Result<()> {
        io.skip(Self::length(ctx)?)?;
        Ok(())
    }

    fn num_bits(&self, _value: &Value, ctx: &CodecCtx<'_>) -> Result<u64> {
        Ok(Self::length(ctx)? * 8)
    }

    fn default_value(&self, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(Value::Null)
    }

    fn coerce(&self, _value: &Value) -> Result<Value> {
        Ok(Value::Null)
    }
}

/// Everything left in the stream
#[derive(Debug, Clone, Copy, Default)]
pub struct Rest;

impl Codec for Rest {
    fn read(&self, io: &mut BitStream<'_>, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(Value::from_bytes(io.read_all()?))
    }

    fn write(&self, io: &mut BitStream<'_>, value: &Value, _ctx: &CodecCtx<'_>) -> Result<()> {
        let data = value
            .as_bytes()
            .ok_or_else(|| super::codec::wrong_type("string", value))?;
        io.write_bytes(data)?;
        Ok(())
    }

    fn num_bits(&self, value: &Value, _ctx: &CodecCtx<'_>) -> Result<u64> {
        Ok(value.as_bytes().map_or(0, |b| b.len() as u64) * 8)
    }

    fn default_value(&self, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(Value::Str(String::new()))
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        match value.as_bytes() {
            Some(data) => Ok(Value::from_bytes(data.to_vec())),
            None => Err(super::codec::wrong_type("string", value)),
        }
    }
}

/// Number of unread bytes, observed without consuming them
#[derive(Debug, Clone, Copy, Default)]
pub struct CountBytesRemaining;

impl Codec for CountBytesRemaining {
    fn read(&self, io: &mut BitStream<'_>, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(Value::from(io.bytes_remaining()?))
    }

    fn write(&self, _io: &mut BitStream<'_>, _value: &Value, _ctx: &CodecCtx<'_>) -> Result<()> {
        Ok(())
    }

    fn num_bits(&self, _value: &Value, _ctx: &CodecCtx<'_>) -> Result<u64> {
        Ok(0)
    }

    fn default_value(&self, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(Value::Int(0))
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        match value.as_int() {
            Some(i) => Ok(Value::Int(i)),
            None => Err(super::codec::wrong_type("int", value)),
        }
    }

    /// Leaves pending bits alone in both directions
    fn aligns_to_byte(&self) -> bool {
        false
    }
}

fn skip_type() -> TypeDef {
    TypeDef::codec("skip", Skip, ParamRules::new().mandatory(&["length"]))
}

fn rest_type() -> TypeDef {
    TypeDef::codec("rest", Rest, ParamRules::primitive())
}

fn count_bytes_remaining_type() -> TypeDef {
    TypeDef::codec("count_bytes_remaining", CountBytesRemaining, ParamRules::new())
}

crate::register_builtin_type!("skip", skip_type);
crate::register_builtin_type!("rest", rest_type);
crate::register_builtin_type!("count_bytes_remaining", count_bytes_remaining_type);

#[cfg(test)]
mod tests {
    use crate::core::{Param, Value};
    use crate::io::{BitStream, StreamError};
    use crate::schema::{Sanitizer, SchemaNode, TypeRegistry};
    use crate::types::Record;
    use std::sync::Arc;

    fn sanitizer() -> Sanitizer {
        Sanitizer::new(Arc::new(TypeRegistry::with_builtins()))
    }

    #[test]
    fn test_skip_and_rest() {
        let proto = sanitizer()
            .sanitize(
                &SchemaNode::new("struct")
                    .field(SchemaNode::new("uint8").named("n"))
                    .field(SchemaNode::new("skip").with("length", Param::reference("n")))
                    .field(SchemaNode::new("count_bytes_remaining").named("left"))
                    .field(SchemaNode::new("rest").named("tail")),
            )
            .unwrap();
        let data = [2u8, 0xAA, 0xBB, b'x', b'y'];
        let rec = Record::read_from_bytes(&proto, &data).unwrap();
        assert_eq!(rec.get("left").unwrap(), Value::Int(2));
        assert_eq!(rec.get("tail").unwrap(), Value::from("xy"));

        // skipped bytes come back as zeros
        assert_eq!(rec.to_bytes().unwrap(), vec![2, 0, 0, b'x', b'y']);
        assert_eq!(rec.num_bytes().unwrap(), 5);
    }

    #[test]
    fn test_unseekable_skip_then_count_is_unsupported() {
        let proto = sanitizer()
            .sanitize(
                &SchemaNode::new("struct")
                    .field(SchemaNode::new("skip").with("length", 3))
                    .field(SchemaNode::new("count_bytes_remaining").named("left")),
            )
            .unwrap();
        let data = [0u8; 8];
        let mut rec = Record::new(&proto).unwrap();
        let mut io = BitStream::unseekable_reader(&data[..]);
        let err = rec.read(&mut io).unwrap_err();
        assert!(matches!(
            err,
            crate::core::Error::Stream(StreamError::Unsupported(_))
        ));
        assert_eq!(io.offset().unwrap(), 3);
    }
}
