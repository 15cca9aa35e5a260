// Ordered named-field aggregates

use super::{slot_mut, DataObject, Slot};
use crate::core::scope::FieldsView;
use crate::core::{Eval, Probe, Result, SchemaError, Scope, Seg, UsageError, Value};
use crate::io::BitStream;
use crate::schema::prototype::{FieldRef, FieldSpec, Prototype, StructSpec};
use crate::schema::registry::{Builder, ParamRules, TypeDef};
use indexmap::IndexMap;
use std::any::Any;
use std::sync::Arc;

fn spec_of(proto: &Prototype) -> Result<&StructSpec> {
    proto
        .struct_spec()
        .ok_or_else(|| SchemaError::Invalid(format!("'{}' is not a struct", proto.type_name)).into())
}

/// Whether a field takes part in I/O, sizing and snapshots
fn is_active(field: &FieldSpec, frame: &Scope<'_>) -> Result<bool> {
    match field.proto.param("onlyif") {
        Some(condition) => Eval::new(frame).eval_bool(condition),
        None => Ok(true),
    }
}

/// Tags a validity error with the field it came from
fn within(field: &FieldSpec, err: crate::core::Error) -> crate::core::Error {
    match &field.name {
        Some(name) => err.within(name.clone()),
        None => err,
    }
}

#[derive(Debug)]
pub struct StructObj {
    proto: Arc<Prototype>,
    slots: Vec<Slot>,
}

impl StructObj {
    pub fn new(proto: Arc<Prototype>) -> Self {
        let n = proto.struct_spec().map_or(0, |spec| spec.fields.len());
        Self {
            proto,
            slots: (0..n).map(|_| None).collect(),
        }
    }

    /// Runs `f` on field `index` in a frame where every other field is visible
    fn with_field<R>(
        &self,
        index: usize,
        scope: &Scope<'_>,
        f: impl FnOnce(&FieldSpec, &dyn DataObject, &Scope<'_>) -> Result<R>,
    ) -> Result<R> {
        let spec = spec_of(&self.proto)?;
        let field = &spec.fields[index];
        let view = FieldsView {
            proto: &self.proto,
            spec,
            before: &self.slots[..index],
            hole: Some(index),
            after: &self.slots[index + 1..],
        };
        let frame = Scope::fields(view, scope);
        let transient;
        let obj: &dyn DataObject = match &self.slots[index] {
            Some(obj) => &**obj,
            None => {
                transient = field.proto.instantiate()?;
                &*transient
            }
        };
        f(field, obj, &frame)
    }

    /// Mutable form of [`StructObj::with_field`]; instantiates the field
    fn with_field_mut<R>(
        &mut self,
        index: usize,
        scope: &Scope<'_>,
        f: impl FnOnce(&FieldSpec, &mut dyn DataObject, &Scope<'_>) -> Result<R>,
    ) -> Result<R> {
        let proto = self.proto.clone();
        let spec = spec_of(&proto)?;
        let field = &spec.fields[index];
        let (before, rest) = self.slots.split_at_mut(index);
        let Some((slot, after)) = rest.split_first_mut() else {
            return Err(UsageError::UnknownField(index.to_string()).into());
        };
        let obj = slot_mut(slot, &field.proto)?;
        let view = FieldsView {
            proto: &proto,
            spec,
            before,
            hole: Some(index),
            after,
        };
        let frame = Scope::fields(view, scope);
        f(field, &mut **obj, &frame)
    }

    /// Position just past the active fields before `upto`, starting at `start`
    fn end_of_fields(&self, upto: usize, start: u64, scope: &Scope<'_>) -> Result<u64> {
        let mut pos = start;
        for index in 0..upto {
            pos = self.with_field(index, scope, move |field, obj, frame| {
                if !is_active(field, frame)? {
                    return Ok(pos);
                }
                obj.end_bit(pos, frame)
            })?;
        }
        Ok(pos)
    }

    fn locate(&self, name: &str) -> Result<FieldRef> {
        spec_of(&self.proto)?
            .locate(name)
            .ok_or_else(|| UsageError::UnknownField(name.to_string()).into())
    }
}

impl DataObject for StructObj {
    fn prototype(&self) -> &Arc<Prototype> {
        &self.proto
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    fn is_clear(&self) -> bool {
        self.slots.iter().flatten().all(|obj| obj.is_clear())
    }

    /// Clears, then assigns every named entry. Null entries are left clear.
    fn assign(&mut self, value: &Value, scope: &Scope<'_>) -> Result<()> {
        if value.is_null() {
            return Err(UsageError::NullAssignment.into());
        }
        let map = value.as_map().ok_or_else(|| UsageError::TypeMismatch {
            expected: "map",
            found: value.type_name().to_string(),
        })?;
        let proto = self.proto.clone();
        let spec = spec_of(&proto)?;
        if let Some(unknown) = map.keys().find(|key| spec.locate(key).is_none()) {
            return Err(UsageError::UnknownField(unknown.clone()).into());
        }

        self.clear();
        for (index, field) in spec.fields.iter().enumerate() {
            let part = match (&field.name, field.proto.struct_spec()) {
                (Some(name), _) => match map.get(name) {
                    Some(v) if !v.is_null() => v.clone(),
                    _ => continue,
                },
                (None, Some(inner)) => {
                    let sub: IndexMap<String, Value> = map
                        .iter()
                        .filter(|(key, v)| inner.locate(key).is_some() && !v.is_null())
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    if sub.is_empty() {
                        continue;
                    }
                    Value::Map(sub)
                }
                (None, None) => continue,
            };
            self.with_field_mut(index, scope, |field, obj, frame| {
                obj.assign(&part, frame).map_err(|e| within(field, e))
            })?;
        }
        Ok(())
    }

    fn read(&mut self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        for index in 0..self.slots.len() {
            self.with_field_mut(index, scope, |field, obj, frame| {
                if !is_active(field, frame)? {
                    return Ok(());
                }
                obj.read(io, frame).map_err(|e| within(field, e))
            })?;
        }
        Ok(())
    }

    fn write(&self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        for index in 0..self.slots.len() {
            self.with_field(index, scope, |field, obj, frame| {
                if !is_active(field, frame)? {
                    return Ok(());
                }
                obj.write(io, frame).map_err(|e| within(field, e))
            })?;
        }
        Ok(())
    }

    fn end_bit(&self, start: u64, scope: &Scope<'_>) -> Result<u64> {
        self.end_of_fields(self.slots.len(), start, scope)
    }

    /// Where the first active field begins
    fn begin_bit(&self, start: u64, scope: &Scope<'_>) -> Result<u64> {
        for index in 0..self.slots.len() {
            let begin = self.with_field(index, scope, |field, obj, frame| {
                if !is_active(field, frame)? {
                    return Ok(None);
                }
                obj.begin_bit(start, frame).map(Some)
            })?;
            if let Some(begin) = begin {
                return Ok(begin);
            }
        }
        Ok(start)
    }

    fn snapshot(&self, scope: &Scope<'_>) -> Result<Value> {
        let spec = spec_of(&self.proto)?;
        let mut out = IndexMap::new();
        for index in 0..self.slots.len() {
            let entry = self.with_field(index, scope, |field, obj, frame| {
                let visible = match &field.name {
                    Some(name) => !spec.is_hidden(name),
                    None => field.proto.struct_spec().is_some(),
                };
                if !visible || !is_active(field, frame)? {
                    return Ok(None);
                }
                obj.snapshot(frame).map(Some)
            })?;

            match (&spec.fields[index].name, entry) {
                (Some(name), Some(value)) => {
                    out.insert(name.clone(), value);
                }
                (None, Some(Value::Map(inner))) => out.extend(inner),
                _ => {}
            }
        }
        Ok(Value::Map(out))
    }

    fn lookup_spliced(&self, name: &str, probe: Probe, scope: &Scope<'_>) -> Result<Option<Value>> {
        let spec = spec_of(&self.proto)?;
        let frame = Scope::fields(FieldsView::whole(&self.proto, spec, &self.slots), scope);
        frame.lookup_local(name, probe)
    }

    fn field_names(&self) -> Vec<String> {
        self.proto
            .struct_spec()
            .map(StructSpec::visible_names)
            .unwrap_or_default()
    }

    fn value_at(&self, path: &[Seg], scope: &Scope<'_>) -> Result<Value> {
        match path {
            [] => self.value(scope),
            [Seg::Field(name), rest @ ..] => {
                let field_ref = self.locate(name)?;
                let next = if field_ref.spliced { path } else { rest };
                self.with_field(field_ref.index, scope, |_, obj, frame| obj.value_at(next, frame))
            }
            [seg, ..] => Err(UsageError::InvalidPath(seg.to_string()).into()),
        }
    }

    fn assign_at(&mut self, path: &[Seg], value: &Value, scope: &Scope<'_>) -> Result<()> {
        match path {
            [] => self.assign(value, scope),
            [Seg::Field(name), rest @ ..] => {
                let field_ref = self.locate(name)?;
                let next = if field_ref.spliced { path } else { rest };
                self.with_field_mut(field_ref.index, scope, |_, obj, frame| {
                    obj.assign_at(next, value, frame)
                })
            }
            [seg, ..] => Err(UsageError::InvalidPath(seg.to_string()).into()),
        }
    }

    fn bit_offset_of(&self, path: &[Seg], start: u64, scope: &Scope<'_>) -> Result<u64> {
        match path {
            [] => self.begin_bit(start, scope),
            [Seg::Field(name), rest @ ..] => {
                let field_ref = self.locate(name)?;
                let next = if field_ref.spliced { path } else { rest };
                let pos = self.end_of_fields(field_ref.index, start, scope)?;
                self.with_field(field_ref.index, scope, |_, obj, frame| {
                    obj.bit_offset_of(next, pos, frame)
                })
            }
            [seg, ..] => Err(UsageError::InvalidPath(seg.to_string()).into()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn struct_type() -> TypeDef {
    TypeDef::new(
        "struct",
        Builder::Struct,
        ParamRules::new().optional(&["fields", "hide"]).open(),
    )
}

crate::register_builtin_type!("struct", struct_type);
