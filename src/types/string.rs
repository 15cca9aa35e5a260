// Byte string codecs: fixed/variable length `string` and zero-terminated `stringz`

use super::codec::{wrong_type, Codec, CodecCtx};
use crate::core::{Result, SchemaError, Value};
use crate::io::BitStream;
use crate::schema::registry::{ParamRules, TypeDef};

fn bytes_of(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Int(i) if (0..=255).contains(i) => Ok(vec![*i as u8]),
        other => other
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| wrong_type("string", other)),
    }
}

/// A byte string of optional fixed `length`.
///
/// Short values are padded with `pad_byte` (at the front with `pad_front`),
/// long ones truncated. `trim_padding` strips the padding from snapshots.
/// `read_length` overrides how many bytes a read consumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteString;

impl ByteString {
    fn pad_byte(ctx: &CodecCtx<'_>) -> Result<u8> {
        match ctx.param("pad_byte")? {
            None => Ok(0),
            Some(Value::Int(i)) if (0..=255).contains(&i) => Ok(i as u8),
            Some(Value::Str(s)) if s.len() == 1 => Ok(s.as_bytes()[0]),
            Some(_) => Err(SchemaError::InvalidParameter {
                type_name: ctx.proto.type_name.clone(),
                param: "pad_byte".to_string(),
                reason: "must be a byte or a single character".to_string(),
            }
            .into()),
        }
    }
}

impl Codec for ByteString {
    fn read(&self, io: &mut BitStream<'_>, ctx: &CodecCtx<'_>) -> Result<Value> {
        let n = match ctx.usize_param("read_length")? {
            Some(n) => n,
            None => ctx.usize_param("length")?.unwrap_or(0),
        };
        Ok(Value::from_bytes(io.read_bytes(n)?))
    }

    fn write(&self, io: &mut BitStream<'_>, value: &Value, _ctx: &CodecCtx<'_>) -> Result<()> {
        io.write_bytes(&bytes_of(value)?)?;
        Ok(())
    }

    fn num_bits(&self, value: &Value, _ctx: &CodecCtx<'_>) -> Result<u64> {
        Ok(bytes_of(value)?.len() as u64 * 8)
    }

    fn default_value(&self, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(Value::Str(String::new()))
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        Ok(Value::from_bytes(bytes_of(value)?))
    }

    /// Clamps to `length`, padding or truncating
    fn normalize(&self, value: Value, ctx: &CodecCtx<'_>) -> Result<Value> {
        let Some(length) = ctx.usize_param("length")? else {
            return Ok(value);
        };
        let mut data = bytes_of(&value)?;
        if data.len() > length {
            data.truncate(length);
        } else if data.len() < length {
            let pad = vec![Self::pad_byte(ctx)?; length - data.len()];
            if ctx.bool_param("pad_front")? {
                data.splice(0..0, pad);
            } else {
                data.extend(pad);
            }
        }
        Ok(Value::from_bytes(data))
    }

    fn snapshot(&self, value: Value, ctx: &CodecCtx<'_>) -> Result<Value> {
        if !ctx.bool_param("trim_padding")? {
            return Ok(value);
        }
        let pad = Self::pad_byte(ctx)?;
        let data = bytes_of(&value)?;
        let trimmed = if ctx.bool_param("pad_front")? {
            let start = data.iter().position(|&b| b != pad).unwrap_or(data.len());
            data[start..].to_vec()
        } else {
            let end = data.iter().rposition(|&b| b != pad).map_or(0, |i| i + 1);
            data[..end].to_vec()
        };
        Ok(Value::from_bytes(trimmed))
    }
}

/// A zero-terminated string. `max_length` counts the terminator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stringz;

impl Codec for Stringz {
    fn read(&self, io: &mut BitStream<'_>, ctx: &CodecCtx<'_>) -> Result<Value> {
        let max = ctx.usize_param("max_length")?;
        let mut data = Vec::new();
        loop {
            if max.is_some_and(|max| data.len() >= max) {
                break;
            }
            let byte = io.read_bytes(1)?[0];
            if byte == 0 {
                break;
            }
            data.push(byte);
        }
        Ok(Value::from_bytes(data))
    }

    fn write(&self, io: &mut BitStream<'_>, value: &Value, _ctx: &CodecCtx<'_>) -> Result<()> {
        let mut data = bytes_of(value)?;
        data.push(0);
        io.write_bytes(&data)?;
        Ok(())
    }

    fn num_bits(&self, value: &Value, _ctx: &CodecCtx<'_>) -> Result<u64> {
        Ok((bytes_of(value)?.len() as u64 + 1) * 8)
    }

    fn default_value(&self, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(Value::Str(String::new()))
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        Ok(Value::from_bytes(bytes_of(value)?))
    }

    /// Cuts at the first zero byte and leaves room for the terminator
    fn normalize(&self, value: Value, ctx: &CodecCtx<'_>) -> Result<Value> {
        let mut data = bytes_of(&value)?;
        if let Some(zero) = data.iter().position(|&b| b == 0) {
            data.truncate(zero);
        }
        if let Some(max) = ctx.usize_param("max_length")? {
            data.truncate(max.saturating_sub(1));
        }
        Ok(Value::from_bytes(data))
    }
}

fn string_type() -> TypeDef {
    TypeDef::codec(
        "string",
        ByteString,
        ParamRules::primitive()
            .optional(&["length", "read_length", "pad_byte", "pad_front", "trim_padding"]),
    )
}

fn stringz_type() -> TypeDef {
    TypeDef::codec("stringz", Stringz, ParamRules::primitive().optional(&["max_length"]))
}

crate::register_builtin_type!("string", string_type);
crate::register_builtin_type!("stringz", stringz_type);

#[cfg(test)]
mod tests {
    use crate::core::Value;
    use crate::schema::{Sanitizer, SchemaNode, TypeRegistry};
    use crate::types::Record;
    use std::sync::Arc;

    fn record(node: SchemaNode) -> Record {
        let sanitizer = Sanitizer::new(Arc::new(TypeRegistry::with_builtins()));
        Record::new(&sanitizer.sanitize(&node).unwrap()).unwrap()
    }

    #[test]
    fn test_fixed_length_pads_and_truncates() {
        let mut rec = record(SchemaNode::new("string").with("length", 5).with("pad_byte", "."));
        rec.assign(&Value::from("ab")).unwrap();
        assert_eq!(rec.snapshot().unwrap(), Value::from("ab..."));
        assert_eq!(rec.num_bytes().unwrap(), 5);

        rec.assign(&Value::from("abcdefg")).unwrap();
        assert_eq!(rec.to_bytes().unwrap(), b"abcde".to_vec());
    }

    #[test]
    fn test_pad_front_and_trim() {
        let mut rec = record(
            SchemaNode::new("string")
                .with("length", 4)
                .with("pad_byte", " ")
                .with("pad_front", true)
                .with("trim_padding", true),
        );
        rec.assign(&Value::from("ab")).unwrap();
        assert_eq!(rec.to_bytes().unwrap(), b"  ab".to_vec());
        assert_eq!(rec.snapshot().unwrap(), Value::from("ab"));
    }

    #[test]
    fn test_read_length_then_clamp() {
        let rec = {
            let sanitizer = Sanitizer::new(Arc::new(TypeRegistry::with_builtins()));
            let proto = sanitizer
                .sanitize(
                    &SchemaNode::new("string")
                        .with("read_length", 2)
                        .with("length", 4),
                )
                .unwrap();
            Record::read_from_bytes(&proto, b"hello").unwrap()
        };
        assert_eq!(rec.snapshot().unwrap(), Value::Str("he\0\0".into()));
        assert_eq!(rec.num_bytes().unwrap(), 4);
    }

    #[test]
    fn test_stringz() {
        let sanitizer = Sanitizer::new(Arc::new(TypeRegistry::with_builtins()));
        let proto = sanitizer.sanitize(&SchemaNode::new("stringz")).unwrap();
        let rec = Record::read_from_bytes(&proto, b"abc\0def").unwrap();
        assert_eq!(rec.snapshot().unwrap(), Value::from("abc"));
        assert_eq!(rec.num_bytes().unwrap(), 4);
        assert_eq!(rec.to_bytes().unwrap(), b"abc\0".to_vec());

        let limited = sanitizer
            .sanitize(&SchemaNode::new("stringz").with("max_length", 3))
            .unwrap();
        let rec = Record::read_from_bytes(&limited, b"abcdef").unwrap();
        assert_eq!(rec.snapshot().unwrap(), Value::from("ab"));
    }
}
