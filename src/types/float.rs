// IEEE 754 single and double precision codecs

use super::codec::{wrong_type, Codec, CodecCtx};
use crate::core::{Result, Value};
use crate::io::{BitStream, Endian};
use crate::schema::registry::{ParamRules, TypeDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Float {
    double: bool,
    endian: Endian,
}

impl Float {
    pub fn single(endian: Endian) -> Self {
        Self {
            double: false,
            endian,
        }
    }

    pub fn double(endian: Endian) -> Self {
        Self {
            double: true,
            endian,
        }
    }

    fn width(&self) -> usize {
        if self.double {
            8
        } else {
            4
        }
    }
}

impl Codec for Float {
    fn read(&self, io: &mut BitStream<'_>, _ctx: &CodecCtx<'_>) -> Result<Value> {
        let mut data = io.read_bytes(self.width())?;
        if self.endian.is_little() {
            data.reverse();
        }
        let value = if self.double {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data);
            f64::from_be_bytes(raw)
        } else {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&data);
            f32::from_be_bytes(raw) as f64
        };
        Ok(Value::Float(value))
    }

    fn write(&self, io: &mut BitStream<'_>, value: &Value, _ctx: &CodecCtx<'_>) -> Result<()> {
        let value = value.as_f64().ok_or_else(|| wrong_type("float", value))?;
        let mut data = if self.double {
            value.to_be_bytes().to_vec()
        } else {
            (value as f32).to_be_bytes().to_vec()
        };
        if self.endian.is_little() {
            data.reverse();
        }
        io.write_bytes(&data)?;
        Ok(())
    }

    fn num_bits(&self, _value: &Value, _ctx: &CodecCtx<'_>) -> Result<u64> {
        Ok(self.width() as u64 * 8)
    }

    fn default_value(&self, _ctx: &CodecCtx<'_>) -> Result<Value> {
        Ok(Value::Float(0.0))
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        let f = value.as_f64().ok_or_else(|| wrong_type("float", value))?;
        if self.double {
            Ok(Value::Float(f))
        } else {
            Ok(Value::Float(f as f32 as f64))
        }
    }
}

fn float_le() -> TypeDef {
    TypeDef::codec("float_le", Float::single(Endian::Little), ParamRules::primitive())
}

fn float_be() -> TypeDef {
    TypeDef::codec("float_be", Float::single(Endian::Big), ParamRules::primitive())
}

fn double_le() -> TypeDef {
    TypeDef::codec("double_le", Float::double(Endian::Little), ParamRules::primitive())
}

fn double_be() -> TypeDef {
    TypeDef::codec("double_be", Float::double(Endian::Big), ParamRules::primitive())
}

crate::register_builtin_type!("float_le", float_le);
crate::register_builtin_type!("float_be", float_be);
crate::register_builtin_type!("double_le", double_le);
crate::register_builtin_type!("double_be", double_be);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaNode, Sanitizer, TypeRegistry};
    use crate::types::Record;
    use std::sync::Arc;

    #[test]
    fn test_float_round_trip() {
        let sanitizer = Sanitizer::new(Arc::new(TypeRegistry::with_builtins()));
        let proto = sanitizer
            .sanitize(
                &SchemaNode::new("struct")
                    .with("endian", "little")
                    .field(SchemaNode::new("float").named("f"))
                    .field(SchemaNode::new("double").named("d").with("endian", "big")),
            )
            .unwrap();

        let data = [
            0x00, 0x00, 0xC0, 0x3F, // 1.5f32 little endian
            0x40, 0x09, 0x21, 0xFB, 0x54, 0x44, 0x2D, 0x18, // pi big endian
        ];
        let record = Record::read_from_bytes(&proto, &data).unwrap();
        assert_eq!(record.get("f").unwrap(), Value::Float(1.5));
        assert_eq!(record.get("d").unwrap(), Value::Float(std::f64::consts::PI));
        assert_eq!(record.to_bytes().unwrap(), data.to_vec());
    }

    #[test]
    fn test_single_precision_coerce() {
        let codec = Float::single(Endian::Big);
        assert_eq!(codec.coerce(&Value::Int(3)).unwrap(), Value::Float(3.0));
        assert_eq!(
            codec.coerce(&Value::Float(0.1)).unwrap(),
            Value::Float(0.1f32 as f64)
        );
        assert!(codec.coerce(&Value::Null).is_err());
    }
}
