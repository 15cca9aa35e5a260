// Evaluation scopes: the ancestor chain a parameter is resolved against

use super::error::{mismatch, EvalError, Result};
use super::eval::Eval;
use super::value::Value;
use crate::schema::prototype::{Prototype, StructSpec};
use crate::types::{with_slot, DataObject, Slot};

/// What the tree is doing while a scope is live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Reading,
    Writing,
}

/// The question asked about a resolved name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Value,
    Len,
    NumBytes,
    At(i64),
}

impl Probe {
    pub fn apply_value(&self, value: &Value) -> Result<Value> {
        match self {
            Probe::Value => Ok(value.clone()),
            Probe::Len => value
                .len()
                .map(Value::from)
                .ok_or_else(|| mismatch("collection", value)),
            Probe::NumBytes => value
                .as_bytes()
                .map(|b| Value::from(b.len()))
                .ok_or_else(|| mismatch("bytes", value)),
            Probe::At(index) => value.at(*index).cloned().ok_or_else(|| {
                EvalError::IndexOutOfRange {
                    index: *index,
                    len: value.len().unwrap_or(0),
                }
                .into()
            }),
        }
    }

    pub fn apply_object(&self, obj: &dyn DataObject, scope: &Scope<'_>) -> Result<Value> {
        match self {
            Probe::Value => obj.value(scope),
            Probe::Len => obj.len(scope).map(Value::from),
            Probe::NumBytes => obj.num_bits(scope).map(|bits| Value::from(bits.div_ceil(8))),
            Probe::At(index) => obj.element_value(*index, scope),
        }
    }
}

/// The fields of one struct as seen by its children.
///
/// While a field is being read or assigned it sits in the hole and cannot be
/// resolved by name; every other slot is visible.
pub struct FieldsView<'a> {
    pub(crate) proto: &'a Prototype,
    pub(crate) spec: &'a StructSpec,
    pub(crate) before: &'a [Slot],
    pub(crate) hole: Option<usize>,
    pub(crate) after: &'a [Slot],
}

impl<'a> FieldsView<'a> {
    /// View over every slot
    pub(crate) fn whole(proto: &'a Prototype, spec: &'a StructSpec, slots: &'a [Slot]) -> Self {
        Self {
            proto,
            spec,
            before: slots,
            hole: None,
            after: &[],
        }
    }

    fn slot(&self, index: usize) -> Option<&'a Slot> {
        match self.hole {
            Some(hole) if index == hole => None,
            Some(hole) if index > hole => self.after.get(index - hole - 1),
            _ => self.before.get(index),
        }
    }
}

enum Frame<'a> {
    Root,
    Fields(FieldsView<'a>),
    Element(usize),
}

/// One link of the ancestor chain.
///
/// Scopes are built on the stack as reads and writes descend the tree, so a
/// data object never stores a reference to its parent.
pub struct Scope<'a> {
    frame: Frame<'a>,
    parent: Option<&'a Scope<'a>>,
    mode: Mode,
}

impl Scope<'static> {
    pub fn root(mode: Mode) -> Self {
        Scope {
            frame: Frame::Root,
            parent: None,
            mode,
        }
    }
}

impl<'a> Scope<'a> {
    pub(crate) fn fields(view: FieldsView<'a>, parent: &'a Scope<'a>) -> Self {
        Scope {
            frame: Frame::Fields(view),
            parent: Some(parent),
            mode: parent.mode,
        }
    }

    pub(crate) fn element(index: usize, parent: &'a Scope<'a>) -> Self {
        Scope {
            frame: Frame::Element(index),
            parent: Some(parent),
            mode: parent.mode,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_reading(&self) -> bool {
        self.mode == Mode::Reading
    }

    /// Resolves `name` in this frame, then each ancestor in turn
    pub fn lookup(&self, name: &str, probe: Probe) -> Result<Option<Value>> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.lookup_local(name, probe)? {
                return Ok(Some(value));
            }
            match scope.parent {
                Some(parent) => scope = parent,
                None => return Ok(None),
            }
        }
    }

    /// Resolves `name` in this frame only
    pub(crate) fn lookup_local(&self, name: &str, probe: Probe) -> Result<Option<Value>> {
        match &self.frame {
            Frame::Root => Ok(None),
            Frame::Element(index) if name == "index" => {
                probe.apply_value(&Value::from(*index)).map(Some)
            }
            Frame::Element(_) => Ok(None),
            Frame::Fields(view) => self.lookup_field(view, name, probe),
        }
    }

    fn lookup_field(&self, view: &FieldsView<'_>, name: &str, probe: Probe) -> Result<Option<Value>> {
        if let Some(field_ref) = view.spec.names.get(name) {
            if let Some(slot) = view.slot(field_ref.index) {
                let field = &view.spec.fields[field_ref.index];
                return with_slot(slot, &field.proto, |obj| {
                    if field_ref.spliced {
                        obj.lookup_spliced(name, probe, self)
                    } else {
                        probe.apply_object(obj, self).map(Some)
                    }
                });
            }
        }

        // the struct's own parameters are evaluated where the struct lives
        if let (Some(param), Some(parent)) = (view.proto.param(name), self.parent) {
            let value = Eval::new(parent).eval(param)?;
            return probe.apply_value(&value).map(Some);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_frame_answers_index() {
        let root = Scope::root(Mode::Idle);
        let elem = Scope::element(4, &root);
        assert_eq!(
            elem.lookup("index", Probe::Value).unwrap(),
            Some(Value::Int(4))
        );
        assert_eq!(elem.lookup("other", Probe::Value).unwrap(), None);
        assert_eq!(elem.mode(), Mode::Idle);
    }

    #[test]
    fn test_probe_on_values() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(Probe::Len.apply_value(&list).unwrap(), Value::Int(2));
        assert_eq!(Probe::At(-1).apply_value(&list).unwrap(), Value::Int(2));
        assert!(Probe::At(5).apply_value(&list).is_err());
        assert_eq!(
            Probe::NumBytes.apply_value(&Value::Str("abc".into())).unwrap(),
            Value::Int(3)
        );
        assert!(Probe::NumBytes.apply_value(&Value::Int(1)).is_err());
    }
}
