// Wrappers that run a nested object inside a stream transform

use super::{round_to_byte, slot_mut, with_slot, DataObject, Slot};
use crate::core::{Eval, Probe, Result, SchemaError, Scope, Seg, UsageError, Value};
use crate::io::{BitStream, SubRange};
use crate::schema::prototype::{Filter, Kind, Prototype};
use crate::schema::registry::{Builder, ParamRules, TypeDef};
use std::any::Any;
use std::sync::Arc;

/// `buffer` bounds its child to `length` bytes; `transformed` runs it
/// through a user transform.
#[derive(Debug)]
pub struct BufferObj {
    proto: Arc<Prototype>,
    inner: Arc<Prototype>,
    child: Slot,
}

impl BufferObj {
    pub fn new(proto: Arc<Prototype>, inner: Arc<Prototype>) -> Self {
        Self {
            proto,
            inner,
            child: None,
        }
    }

    fn filter(&self) -> Result<&Filter> {
        match &self.proto.kind {
            Kind::Buffer { filter, .. } => Ok(filter),
            _ => Err(SchemaError::Invalid(format!("'{}' is not a buffer", self.proto.type_name)).into()),
        }
    }

    fn with_child<R>(&self, f: impl FnOnce(&dyn DataObject) -> Result<R>) -> Result<R> {
        with_slot(&self.child, &self.inner, f)
    }

    fn child_mut(&mut self) -> Result<&mut Box<dyn DataObject>> {
        slot_mut(&mut self.child, &self.inner)
    }
}

impl DataObject for BufferObj {
    fn prototype(&self) -> &Arc<Prototype> {
        &self.proto
    }

    fn clear(&mut self) {
        self.child = None;
    }

    fn is_clear(&self) -> bool {
        self.child.as_ref().map_or(true, |child| child.is_clear())
    }

    fn assign(&mut self, value: &Value, scope: &Scope<'_>) -> Result<()> {
        if value.is_null() {
            return Err(UsageError::NullAssignment.into());
        }
        self.child_mut()?.assign(value, scope)
    }

    fn read(&mut self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        let proto = self.proto.clone();
        let filter = match &proto.kind {
            Kind::Buffer { filter, .. } => filter,
            _ => return Err(SchemaError::Invalid(format!("'{}' is not a buffer", proto.type_name)).into()),
        };
        let child = self.child_mut()?;
        match filter {
            Filter::SubRange(length) => {
                let length = Eval::new(scope).eval_u64(length)?;
                io.transform(SubRange::new(length), |io| child.read(io, scope))
            }
            Filter::Custom(factory) => {
                let transform = factory(&Eval::new(scope))?;
                io.splice(transform, |io| child.read(io, scope))
            }
        }
    }

    fn write(&self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        if scope.is_reading() {
            return Err(UsageError::WriteDuringRead.into());
        }
        match self.filter()? {
            Filter::SubRange(length) => {
                let length = Eval::new(scope).eval_u64(length)?;
                io.transform(SubRange::new(length), |io| {
                    self.with_child(|child| child.write(io, scope))
                })
            }
            Filter::Custom(factory) => {
                let transform = factory(&Eval::new(scope))?;
                io.splice(transform, |io| self.with_child(|child| child.write(io, scope)))
            }
        }
    }

    /// Splicing aligns the stream on entry and on exit
    fn begin_bit(&self, start: u64, _scope: &Scope<'_>) -> Result<u64> {
        Ok(round_to_byte(start))
    }

    /// A buffer always occupies `length` bytes
    fn end_bit(&self, start: u64, scope: &Scope<'_>) -> Result<u64> {
        let begin = round_to_byte(start);
        match self.filter()? {
            Filter::SubRange(length) => Ok(begin + Eval::new(scope).eval_u64(length)? * 8),
            Filter::Custom(_) => self
                .with_child(|child| child.end_bit(begin, scope))
                .map(round_to_byte),
        }
    }

    fn snapshot(&self, scope: &Scope<'_>) -> Result<Value> {
        self.with_child(|child| child.snapshot(scope))
    }

    fn value(&self, scope: &Scope<'_>) -> Result<Value> {
        self.with_child(|child| child.value(scope))
    }

    fn is_scalar(&self) -> bool {
        self.inner.is_scalar()
    }

    fn len(&self, scope: &Scope<'_>) -> Result<usize> {
        self.with_child(|child| child.len(scope))
    }

    fn element_value(&self, index: i64, scope: &Scope<'_>) -> Result<Value> {
        self.with_child(|child| child.element_value(index, scope))
    }

    fn lookup_spliced(&self, name: &str, probe: Probe, scope: &Scope<'_>) -> Result<Option<Value>> {
        self.with_child(|child| child.lookup_spliced(name, probe, scope))
    }

    fn field_names(&self) -> Vec<String> {
        self.child
            .as_ref()
            .map(|child| child.field_names())
            .or_else(|| self.inner.struct_spec().map(|spec| spec.visible_names()))
            .unwrap_or_default()
    }

    fn value_at(&self, path: &[Seg], scope: &Scope<'_>) -> Result<Value> {
        self.with_child(|child| child.value_at(path, scope))
    }

    fn assign_at(&mut self, path: &[Seg], value: &Value, scope: &Scope<'_>) -> Result<()> {
        self.child_mut()?.assign_at(path, value, scope)
    }

    fn bit_offset_of(&self, path: &[Seg], start: u64, scope: &Scope<'_>) -> Result<u64> {
        let begin = round_to_byte(start);
        match path {
            [] => Ok(begin),
            _ => self.with_child(|child| child.bit_offset_of(path, begin, scope)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn buffer_type() -> TypeDef {
    TypeDef::new("buffer", Builder::Buffer, ParamRules::new().mandatory(&["length", "type"]))
}

fn transformed_type() -> TypeDef {
    TypeDef::new(
        "transformed",
        Builder::Transformed,
        ParamRules::new().mandatory(&["transform", "type"]),
    )
}

crate::register_builtin_type!("buffer", buffer_type);
crate::register_builtin_type!("transformed", transformed_type);
