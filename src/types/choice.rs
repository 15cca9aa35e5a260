// Tagged-selection unions

use super::{slot_mut, with_slot, DataObject, Slot};
use crate::core::{Error, Eval, Probe, Result, SchemaError, Scope, Seg, UsageError, ValidityError, Value};
use crate::io::BitStream;
use crate::schema::node::ChoiceKey;
use crate::schema::prototype::{Kind, Prototype};
use crate::schema::registry::{Builder, ParamRules, TypeDef};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// One alternative is live at a time, picked by evaluating `selection`
/// afresh on every access. Each alternative keeps its own state, so
/// switching back and forth does not lose values.
#[derive(Debug)]
pub struct ChoiceObj {
    proto: Arc<Prototype>,
    alternatives: Vec<RefCell<Slot>>,
    /// Alternative picked by the previous access
    last: Cell<Option<usize>>,
}

impl ChoiceObj {
    pub fn new(proto: Arc<Prototype>, count: usize) -> Self {
        Self {
            proto,
            alternatives: (0..count).map(|_| RefCell::new(None)).collect(),
            last: Cell::new(None),
        }
    }

    fn choices(&self) -> Result<(&[(ChoiceKey, Arc<Prototype>)], bool)> {
        match &self.proto.kind {
            Kind::Choice {
                choices,
                copy_on_change,
            } => Ok((choices, *copy_on_change)),
            _ => Err(SchemaError::Invalid(format!("'{}' is not a choice", self.proto.type_name)).into()),
        }
    }

    /// The selection is computed from the `selection` parameter
    pub fn set_selection(&mut self, _selection: &Value) -> Result<()> {
        Err(UsageError::SelectionIsComputed.into())
    }

    /// Evaluates `selection` and switches to the matching alternative
    pub fn selection(&self, scope: &Scope<'_>) -> Result<Value> {
        let param = self.proto.param("selection").ok_or_else(|| SchemaError::MissingParameter {
            type_name: self.proto.type_name.clone(),
            param: "selection".to_string(),
        })?;
        Eval::new(scope).eval(param)
    }

    fn current(&self, scope: &Scope<'_>) -> Result<usize> {
        let (choices, copy_on_change) = self.choices()?;
        let selection = self.selection(scope)?;
        let index = choices
            .iter()
            .position(|(key, _)| key.matches(&selection))
            .or_else(|| choices.iter().position(|(key, _)| *key == ChoiceKey::Default))
            .ok_or_else(|| Error::validity(ValidityError::InvalidSelection(selection.to_string())))?;

        if let Some(previous) = self.last.replace(Some(index)) {
            if copy_on_change && previous != index {
                self.copy_value(previous, index, scope)?;
            }
        }
        Ok(index)
    }

    /// Carries a scalar value over to a newly selected scalar alternative
    fn copy_value(&self, from: usize, to: usize, scope: &Scope<'_>) -> Result<()> {
        let value = match self.alternatives[from].try_borrow() {
            Ok(slot) => match slot.as_ref() {
                Some(obj) if obj.is_scalar() => obj.value(scope)?,
                _ => return Ok(()),
            },
            Err(_) => {
                tracing::warn!(
                    "Choice {} alternative {} is in use; value not copied to alternative {}",
                    self.proto.type_name, from, to
                );
                return Ok(());
            }
        };
        let (choices, _) = self.choices()?;
        let Ok(mut slot) = self.alternatives[to].try_borrow_mut() else {
            tracing::warn!(
                "Choice {} alternative {} is in use; value {} not copied into it",
                self.proto.type_name, to, value
            );
            return Ok(());
        };
        let obj = slot_mut(&mut *slot, &choices[to].1)?;
        if obj.is_scalar() {
            tracing::debug!("Copying {} into choice alternative {}", value, to);
            obj.assign(&value, scope)?;
        }
        Ok(())
    }

    fn with_current<R>(&self, scope: &Scope<'_>, f: impl FnOnce(&dyn DataObject) -> Result<R>) -> Result<R> {
        let index = self.current(scope)?;
        let (choices, _) = self.choices()?;
        let slot = self.alternatives[index].borrow();
        with_slot(&slot, &choices[index].1, f)
    }

    fn with_current_mut<R>(
        &mut self,
        scope: &Scope<'_>,
        f: impl FnOnce(&mut dyn DataObject) -> Result<R>,
    ) -> Result<R> {
        let index = self.current(scope)?;
        let proto = self.proto.clone();
        let alternative = match &proto.kind {
            Kind::Choice { choices, .. } => &choices[index].1,
            _ => return Err(SchemaError::Invalid(format!("'{}' is not a choice", proto.type_name)).into()),
        };
        let obj = slot_mut(self.alternatives[index].get_mut(), alternative)?;
        f(&mut **obj)
    }
}

impl DataObject for ChoiceObj {
    fn prototype(&self) -> &Arc<Prototype> {
        &self.proto
    }

    fn clear(&mut self) {
        self.alternatives.iter_mut().for_each(|slot| *slot.get_mut() = None);
        self.last.set(None);
    }

    fn is_clear(&self) -> bool {
        self.alternatives
            .iter()
            .all(|slot| slot.borrow().as_ref().map_or(true, |obj| obj.is_clear()))
    }

    fn assign(&mut self, value: &Value, scope: &Scope<'_>) -> Result<()> {
        if value.is_null() {
            return Err(UsageError::NullAssignment.into());
        }
        self.with_current_mut(scope, |obj| obj.assign(value, scope))
    }

    fn read(&mut self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        self.with_current_mut(scope, |obj| obj.read(io, scope))
    }

    fn write(&self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        self.with_current(scope, |obj| obj.write(io, scope))
    }

    /// Laid out as whichever alternative is selected
    fn end_bit(&self, start: u64, scope: &Scope<'_>) -> Result<u64> {
        self.with_current(scope, |obj| obj.end_bit(start, scope))
    }

    fn begin_bit(&self, start: u64, scope: &Scope<'_>) -> Result<u64> {
        self.with_current(scope, |obj| obj.begin_bit(start, scope))
    }

    fn snapshot(&self, scope: &Scope<'_>) -> Result<Value> {
        self.with_current(scope, |obj| obj.snapshot(scope))
    }

    fn value(&self, scope: &Scope<'_>) -> Result<Value> {
        self.with_current(scope, |obj| obj.value(scope))
    }

    fn len(&self, scope: &Scope<'_>) -> Result<usize> {
        self.with_current(scope, |obj| obj.len(scope))
    }

    fn element_value(&self, index: i64, scope: &Scope<'_>) -> Result<Value> {
        self.with_current(scope, |obj| obj.element_value(index, scope))
    }

    fn lookup_spliced(&self, name: &str, probe: Probe, scope: &Scope<'_>) -> Result<Option<Value>> {
        self.with_current(scope, |obj| obj.lookup_spliced(name, probe, scope))
    }

    fn value_at(&self, path: &[Seg], scope: &Scope<'_>) -> Result<Value> {
        self.with_current(scope, |obj| obj.value_at(path, scope))
    }

    fn assign_at(&mut self, path: &[Seg], value: &Value, scope: &Scope<'_>) -> Result<()> {
        self.with_current_mut(scope, |obj| obj.assign_at(path, value, scope))
    }

    fn bit_offset_of(&self, path: &[Seg], start: u64, scope: &Scope<'_>) -> Result<u64> {
        self.with_current(scope, |obj| obj.bit_offset_of(path, start, scope))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn choice_type() -> TypeDef {
    TypeDef::new(
        "choice",
        Builder::Choice,
        ParamRules::new()
            .mandatory(&["selection", "choices"])
            .optional(&["copy_on_change"]),
    )
}

crate::register_builtin_type!("choice", choice_type);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Param;
    use crate::schema::{Sanitizer, SchemaNode, TypeRegistry};
    use crate::types::Record;

    fn tagged(copy_on_change: bool) -> Arc<Prototype> {
        Sanitizer::new(Arc::new(TypeRegistry::with_builtins()))
            .sanitize(
                &SchemaNode::new("struct")
                    .with("endian", "little")
                    .field(SchemaNode::new("uint8").named("tag"))
                    .field(
                        SchemaNode::new("choice")
                            .named("body")
                            .with("selection", Param::reference("tag"))
                            .with("copy_on_change", copy_on_change)
                            .choice(1, SchemaNode::new("uint8"))
                            .choice(2, SchemaNode::new("uint16"))
                            .choice("x", SchemaNode::new("stringz")),
                    ),
            )
            .unwrap()
    }

    #[test]
    fn test_selection_picks_alternative() {
        let proto = tagged(false);
        let rec = Record::read_from_bytes(&proto, &[2, 0x34, 0x12]).unwrap();
        assert_eq!(rec.get("body").unwrap(), Value::Int(0x1234));
        assert_eq!(rec.num_bytes().unwrap(), 3);

        let err = Record::read_from_bytes(&proto, &[9, 0]).unwrap_err();
        assert_eq!(err.to_string(), "obj.body: selection 9 matches no declared choice");
    }

    #[test]
    fn test_alternatives_persist() {
        let proto = tagged(false);
        let mut rec = Record::new(&proto).unwrap();
        rec.set("tag", 1).unwrap();
        rec.set("body", 7).unwrap();
        rec.set("tag", 2).unwrap();
        rec.set("body", 300).unwrap();
        rec.set("tag", 1).unwrap();
        assert_eq!(rec.get("body").unwrap(), Value::Int(7));
        rec.set("tag", 2).unwrap();
        assert_eq!(rec.get("body").unwrap(), Value::Int(300));
    }

    #[test]
    fn test_copy_on_change() {
        let proto = tagged(true);
        let mut rec = Record::new(&proto).unwrap();
        rec.set("tag", 1).unwrap();
        rec.set("body", 42).unwrap();
        rec.set("tag", 2).unwrap();
        assert_eq!(rec.get("body").unwrap(), Value::Int(42));
        assert_eq!(rec.to_bytes().unwrap(), vec![2, 42, 0]);
    }

    #[test]
    fn test_default_alternative() {
        let proto = Sanitizer::new(Arc::new(TypeRegistry::with_builtins()))
            .sanitize(
                &SchemaNode::new("choice")
                    .with("selection", 5)
                    .choice(1, SchemaNode::new("uint8"))
                    .default_choice(SchemaNode::new("uint16be")),
            )
            .unwrap();
        let rec = Record::read_from_bytes(&proto, &[1, 2]).unwrap();
        assert_eq!(rec.snapshot().unwrap(), Value::Int(0x0102));
    }

    fn between_nibbles(selection: i32) -> Arc<Prototype> {
        Sanitizer::new(Arc::new(TypeRegistry::with_builtins()))
            .sanitize(
                &SchemaNode::new("struct")
                    .field(SchemaNode::new("bit4").named("a"))
                    .field(
                        SchemaNode::new("choice")
                            .named("c")
                            .with("selection", selection)
                            .choice(1, SchemaNode::new("uint8"))
                            .choice(2, SchemaNode::new("bit4")),
                    )
                    .field(SchemaNode::new("bit4").named("b")),
            )
            .unwrap()
    }

    #[test]
    fn test_size_follows_selected_alternative() {
        let mut rec = Record::new(&between_nibbles(1)).unwrap();
        rec.set("a", 0xA).unwrap();
        rec.set("c", 0x55).unwrap();
        rec.set("b", 0xB).unwrap();
        let bytes = rec.to_bytes().unwrap();
        assert_eq!(bytes, vec![0xA0, 0x55, 0xB0]);
        assert_eq!(rec.num_bytes().unwrap(), bytes.len() as u64);
        assert_eq!(rec.bit_offset("c").unwrap(), 8);
        assert_eq!(rec.bit_offset("b").unwrap(), 16);

        let mut rec = Record::new(&between_nibbles(2)).unwrap();
        rec.set("a", 0xA).unwrap();
        rec.set("c", 0x5).unwrap();
        rec.set("b", 0xB).unwrap();
        let bytes = rec.to_bytes().unwrap();
        assert_eq!(bytes, vec![0xA5, 0xB0]);
        assert_eq!(rec.num_bytes().unwrap(), bytes.len() as u64);
        assert_eq!(rec.bit_offset("c").unwrap(), 4);
    }

    #[test]
    fn test_copy_on_change_into_buffered_scalar() {
        let proto = Sanitizer::new(Arc::new(TypeRegistry::with_builtins()))
            .sanitize(
                &SchemaNode::new("struct")
                    .field(SchemaNode::new("uint8").named("tag"))
                    .field(
                        SchemaNode::new("choice")
                            .named("body")
                            .with("selection", Param::reference("tag"))
                            .with("copy_on_change", true)
                            .choice(1, SchemaNode::new("uint8"))
                            .choice(
                                2,
                                SchemaNode::new("buffer")
                                    .with("length", 2)
                                    .with("type", SchemaNode::new("uint8")),
                            ),
                    ),
            )
            .unwrap();
        let mut rec = Record::new(&proto).unwrap();
        rec.set("tag", 1).unwrap();
        rec.set("body", 9).unwrap();
        rec.set("tag", 2).unwrap();
        assert_eq!(rec.get("body").unwrap(), Value::Int(9));
        assert_eq!(rec.to_bytes().unwrap(), vec![2, 9, 0]);
    }

    #[test]
    fn test_copy_skipped_while_alternative_in_use() {
        let proto = Sanitizer::new(Arc::new(TypeRegistry::with_builtins()))
            .sanitize(
                &SchemaNode::new("choice")
                    .with("selection", 1)
                    .choice(1, SchemaNode::new("uint8"))
                    .choice(2, SchemaNode::new("uint16be")),
            )
            .unwrap();
        let mut rec = Record::new(&proto).unwrap();
        rec.set("", 7).unwrap();
        let choice = rec
            .root()
            .as_any()
            .downcast_ref::<ChoiceObj>()
            .expect("root is a choice");
        let scope = Scope::root(crate::core::Mode::Idle);

        {
            let _busy = choice.alternatives[1].borrow();
            choice.copy_value(0, 1, &scope).unwrap();
        }
        assert!(choice.alternatives[1].borrow().is_none());

        choice.copy_value(0, 1, &scope).unwrap();
        let copied = choice.alternatives[1].borrow();
        assert_eq!(copied.as_ref().unwrap().value(&scope).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_selection_cannot_be_set() {
        let proto = Sanitizer::new(Arc::new(TypeRegistry::with_builtins()))
            .sanitize(
                &SchemaNode::new("choice")
                    .with("selection", 1)
                    .choice(1, SchemaNode::new("uint8")),
            )
            .unwrap();
        let mut rec = Record::new(&proto).unwrap();
        let choice = rec
            .root_mut()
            .as_any_mut()
            .downcast_mut::<ChoiceObj>()
            .expect("root is a choice");
        assert!(matches!(
            choice.set_selection(&Value::Int(2)),
            Err(Error::Usage(UsageError::SelectionIsComputed))
        ));
    }
}
