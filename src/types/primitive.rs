// Scalar data objects backed by a codec

use super::codec::{Codec, CodecCtx};
use super::{round_to_byte, DataObject};
use crate::core::{Binding, Error, Eval, Param, Result, Scope, UsageError, ValidityError, Value};
use crate::io::BitStream;
use crate::schema::prototype::Prototype;
use std::any::Any;
use std::sync::Arc;

/// Loose equality used by assertions: numbers compare by value, strings and
/// byte strings by content
fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => a.as_f64() == b.as_f64(),
        _ => match (a.as_bytes(), b.as_bytes()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

#[derive(Debug)]
pub struct PrimitiveObj {
    proto: Arc<Prototype>,
    codec: Arc<dyn Codec>,
    /// Read or assigned value; None while clear
    value: Option<Value>,
}

impl PrimitiveObj {
    pub fn new(proto: Arc<Prototype>, codec: Arc<dyn Codec>) -> Self {
        Self {
            proto,
            codec,
            value: None,
        }
    }

    /// Resolution order: `value` parameter (unless reading), the read or
    /// assigned value, `initial_value`, then the type default.
    fn effective(&self, scope: &Scope<'_>) -> Result<Value> {
        let ctx = CodecCtx::new(&self.proto, scope);
        let raw = match (self.proto.param("value"), &self.value) {
            (Some(param), _) if !scope.is_reading() => Eval::new(scope).eval(param)?,
            (_, Some(value)) => value.clone(),
            _ => match self.proto.param("initial_value") {
                Some(param) => Eval::new(scope).eval(param)?,
                None => self.codec.default_value(&ctx)?,
            },
        };
        self.codec.normalize(self.codec.coerce(&raw)?, &ctx)
    }

    fn check_assertion(&self, scope: &Scope<'_>) -> Result<()> {
        let Some(expected) = self.proto.param("assert") else {
            return Ok(());
        };
        let actual = self.value(scope)?;
        let (holds, described) = match expected {
            Param::Literal(literal) => {
                let literal = self.codec.coerce(literal)?;
                (same(&actual, &literal), literal.to_string())
            }
            other => {
                let eval = Eval::with_overrides(scope, vec![("value", Binding::Value(actual.clone()))]);
                match eval.eval(other)? {
                    Value::Bool(b) => (b, "predicate to hold".to_string()),
                    result => (same(&actual, &result), result.to_string()),
                }
            }
        };

        if holds {
            return Ok(());
        }
        tracing::debug!("Assertion failed on {}: got {}", self.proto.type_name, actual);
        Err(Error::validity(ValidityError::AssertionFailed {
            value: actual.to_string(),
            expected: described,
        }))
    }
}

impl DataObject for PrimitiveObj {
    fn prototype(&self) -> &Arc<Prototype> {
        &self.proto
    }

    fn clear(&mut self) {
        self.value = None;
    }

    fn is_clear(&self) -> bool {
        self.value.is_none()
    }

    fn assign(&mut self, value: &Value, _scope: &Scope<'_>) -> Result<()> {
        if value.is_null() {
            return Err(UsageError::NullAssignment.into());
        }
        self.value = Some(self.codec.coerce(value)?);
        Ok(())
    }

    fn read(&mut self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        let ctx = CodecCtx::new(&self.proto, scope);
        let value = self.codec.read(io, &ctx)?;
        self.value = Some(value);
        self.check_assertion(scope)
    }

    fn write(&self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        if scope.is_reading() {
            return Err(UsageError::WriteDuringRead.into());
        }
        let value = self.effective(scope)?;
        let ctx = CodecCtx::new(&self.proto, scope);
        self.codec.write(io, &value, &ctx)
    }

    /// Byte codecs start on the next byte boundary
    fn begin_bit(&self, start: u64, _scope: &Scope<'_>) -> Result<u64> {
        Ok(if self.codec.aligns_to_byte() {
            round_to_byte(start)
        } else {
            start
        })
    }

    fn end_bit(&self, start: u64, scope: &Scope<'_>) -> Result<u64> {
        let value = self.effective(scope)?;
        let ctx = CodecCtx::new(&self.proto, scope);
        Ok(self.begin_bit(start, scope)? + self.codec.num_bits(&value, &ctx)?)
    }

    fn snapshot(&self, scope: &Scope<'_>) -> Result<Value> {
        let value = self.effective(scope)?;
        let ctx = CodecCtx::new(&self.proto, scope);
        self.codec.snapshot(value, &ctx)
    }

    fn is_scalar(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;
    use crate::schema::{Sanitizer, SchemaNode, TypeRegistry};
    use crate::types::Record;

    fn sanitize(node: SchemaNode) -> Arc<Prototype> {
        Sanitizer::new(Arc::new(TypeRegistry::with_builtins()))
            .sanitize(&node)
            .unwrap()
    }

    #[test]
    fn test_value_resolution_order() {
        let proto = sanitize(SchemaNode::new("uint8").with("initial_value", 9));
        let mut rec = Record::new(&proto).unwrap();
        assert_eq!(rec.snapshot().unwrap(), Value::Int(9));
        assert!(rec.is_clear());

        rec.assign(&Value::Int(3)).unwrap();
        assert_eq!(rec.snapshot().unwrap(), Value::Int(3));
        rec.clear();
        assert_eq!(rec.snapshot().unwrap(), Value::Int(9));

        let fixed = sanitize(SchemaNode::new("uint8").with("value", 5));
        let mut rec = Record::new(&fixed).unwrap();
        rec.assign(&Value::Int(1)).unwrap();
        assert_eq!(rec.snapshot().unwrap(), Value::Int(5));
        assert_eq!(rec.to_bytes().unwrap(), vec![5]);
    }

    #[test]
    fn test_value_param_ignored_while_reading() {
        let proto = sanitize(SchemaNode::new("uint8").with("value", 5));
        let rec = Record::read_from_bytes(&proto, &[7]).unwrap();
        // outside the read the parameter wins again
        assert_eq!(rec.snapshot().unwrap(), Value::Int(5));
    }

    #[test]
    fn test_assertions() {
        let literal = sanitize(SchemaNode::new("uint8").with("assert", 7));
        assert!(Record::read_from_bytes(&literal, &[7]).is_ok());
        let err = Record::read_from_bytes(&literal, &[8]).unwrap_err();
        assert!(matches!(
            err,
            Error::Validity {
                error: ValidityError::AssertionFailed { .. },
                ..
            }
        ));

        let predicate = sanitize(
            SchemaNode::new("uint8").with("assert", Param::parse("value % 2 == 0").unwrap()),
        );
        assert!(Record::read_from_bytes(&predicate, &[4]).is_ok());
        assert!(Record::read_from_bytes(&predicate, &[5]).is_err());
    }

    #[test]
    fn test_null_assignment_and_write_during_read() {
        let proto = sanitize(SchemaNode::new("uint8"));
        let mut rec = Record::new(&proto).unwrap();
        assert!(matches!(
            rec.assign(&Value::Null),
            Err(Error::Usage(UsageError::NullAssignment))
        ));

        let mut buf = Vec::new();
        let mut io = BitStream::unseekable_writer(&mut buf);
        let reading = Scope::root(Mode::Reading);
        assert!(matches!(
            rec.root().write(&mut io, &reading),
            Err(Error::Usage(UsageError::WriteDuringRead))
        ));
    }
}
