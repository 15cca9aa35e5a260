// Homogeneous repeated lists

use super::DataObject;
use crate::core::{Binding, EvalError, Eval, Param, Result, Scope, Seg, UsageError, Value};
use crate::io::BitStream;
use crate::schema::prototype::{ArrayMode, Kind, Prototype};
use crate::schema::registry::{Builder, ParamRules, TypeDef};
use std::any::Any;
use std::sync::Arc;

type Elements = Vec<Box<dyn DataObject>>;

fn resolve_index(index: i64, len: usize) -> Result<usize> {
    let resolved = if index < 0 {
        len.checked_sub(index.unsigned_abs() as usize)
    } else {
        Some(index as usize).filter(|&i| i < len)
    };
    resolved.ok_or_else(|| EvalError::IndexOutOfRange { index, len }.into())
}

/// Position just past `elements` laid out from `start`
fn end_of(elements: &[Box<dyn DataObject>], start: u64, scope: &Scope<'_>) -> Result<u64> {
    elements
        .iter()
        .enumerate()
        .try_fold(start, |pos, (index, element)| {
            element.end_bit(pos, &Scope::element(index, scope))
        })
}

#[derive(Debug)]
pub struct ArrayObj {
    proto: Arc<Prototype>,
    element: Arc<Prototype>,
    /// None until read, assigned or extended
    elements: Option<Elements>,
}

impl ArrayObj {
    pub fn new(proto: Arc<Prototype>, element: Arc<Prototype>) -> Self {
        Self {
            proto,
            element,
            elements: None,
        }
    }

    fn mode(&self) -> &ArrayMode {
        match &self.proto.kind {
            Kind::Array { mode, .. } => mode,
            _ => &ArrayMode::Empty,
        }
    }

    /// Length of a cleared array: `initial_length`, or zero
    fn initial_len(&self, scope: &Scope<'_>) -> Result<usize> {
        match self.mode() {
            ArrayMode::Length(length) => Eval::new(scope).eval_usize(length),
            _ => Ok(0),
        }
    }

    fn fresh(&self, n: usize) -> Result<Elements> {
        (0..n).map(|_| self.element.instantiate()).collect()
    }

    /// Runs `f` over the elements, materializing transient ones for a
    /// cleared array
    fn with_elements<R>(&self, scope: &Scope<'_>, f: impl FnOnce(&[Box<dyn DataObject>]) -> Result<R>) -> Result<R> {
        match &self.elements {
            Some(elements) => f(elements),
            None => f(&self.fresh(self.initial_len(scope)?)?),
        }
    }

    fn elements_mut(&mut self, scope: &Scope<'_>) -> Result<&mut Elements> {
        if self.elements.is_none() {
            let initial = self.fresh(self.initial_len(scope)?)?;
            self.elements = Some(initial);
        }
        Ok(self.elements.get_or_insert_with(Vec::new))
    }

    /// Reads element `index` and appends it
    fn read_element(&mut self, index: usize, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        let mut element = self.element.instantiate()?;
        let frame = Scope::element(index, scope);
        element
            .read(io, &frame)
            .map_err(|e| e.within(format!("[{}]", index)))?;
        self.elements.get_or_insert_with(Vec::new).push(element);
        Ok(())
    }

    /// Evaluates `read_until` with `index`, `element` and `array` bound
    fn until_holds(&self, predicate: &Param, index: usize, scope: &Scope<'_>) -> Result<bool> {
        let Some(element) = self.elements.as_ref().and_then(|e| e.last()) else {
            return Ok(true);
        };
        let frame = Scope::element(index, scope);
        let eval = Eval::with_overrides(
            scope,
            vec![
                ("index", Binding::Value(Value::from(index))),
                ("element", Binding::Object(&**element, &frame)),
                ("array", Binding::Object(self, scope)),
            ],
        );
        eval.eval_bool(predicate)
    }
}

impl DataObject for ArrayObj {
    fn prototype(&self) -> &Arc<Prototype> {
        &self.proto
    }

    fn clear(&mut self) {
        self.elements = None;
    }

    fn is_clear(&self) -> bool {
        match &self.elements {
            None => true,
            Some(elements) => elements.iter().all(|e| e.is_clear()),
        }
    }

    fn assign(&mut self, value: &Value, scope: &Scope<'_>) -> Result<()> {
        if value.is_null() {
            return Err(UsageError::NullAssignment.into());
        }
        let items = value.as_list().ok_or_else(|| UsageError::TypeMismatch {
            expected: "list",
            found: value.type_name().to_string(),
        })?;

        let mut elements = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let mut element = self.element.instantiate()?;
            if !item.is_null() {
                let frame = Scope::element(index, scope);
                element
                    .assign(item, &frame)
                    .map_err(|e| e.within(format!("[{}]", index)))?;
            }
            elements.push(element);
        }
        self.elements = Some(elements);
        Ok(())
    }

    fn read(&mut self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        self.elements = Some(Vec::new());
        match self.mode().clone() {
            ArrayMode::Empty => {}
            ArrayMode::Length(length) => {
                let n = Eval::new(scope).eval_usize(&length)?;
                for index in 0..n {
                    self.read_element(index, io, scope)?;
                }
            }
            ArrayMode::Until(predicate) => {
                let mut index = 0;
                loop {
                    self.read_element(index, io, scope)?;
                    if self.until_holds(&predicate, index, scope)? {
                        break;
                    }
                    index += 1;
                }
            }
            ArrayMode::Eof => {
                let mut index = 0;
                loop {
                    match self.read_element(index, io, scope) {
                        Ok(()) => index += 1,
                        Err(e) if e.is_eof() => {
                            tracing::debug!("Array of {} ended at end of stream after {} elements", self.element.type_name, index);
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }

    fn write(&self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()> {
        self.with_elements(scope, |elements| {
            for (index, element) in elements.iter().enumerate() {
                let frame = Scope::element(index, scope);
                element
                    .write(io, &frame)
                    .map_err(|e| e.within(format!("[{}]", index)))?;
            }
            Ok(())
        })
    }

    fn end_bit(&self, start: u64, scope: &Scope<'_>) -> Result<u64> {
        self.with_elements(scope, |elements| end_of(elements, start, scope))
    }

    fn begin_bit(&self, start: u64, scope: &Scope<'_>) -> Result<u64> {
        self.with_elements(scope, |elements| match elements.first() {
            Some(first) => first.begin_bit(start, &Scope::element(0, scope)),
            None => Ok(start),
        })
    }

    fn snapshot(&self, scope: &Scope<'_>) -> Result<Value> {
        self.with_elements(scope, |elements| {
            elements
                .iter()
                .enumerate()
                .map(|(index, element)| element.snapshot(&Scope::element(index, scope)))
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        })
    }

    fn len(&self, scope: &Scope<'_>) -> Result<usize> {
        match &self.elements {
            Some(elements) => Ok(elements.len()),
            None => self.initial_len(scope),
        }
    }

    fn element_value(&self, index: i64, scope: &Scope<'_>) -> Result<Value> {
        self.with_elements(scope, |elements| {
            let i = resolve_index(index, elements.len())?;
            elements[i].value(&Scope::element(i, scope))
        })
    }

    /// Read-only indexing never extends the array
    fn value_at(&self, path: &[Seg], scope: &Scope<'_>) -> Result<Value> {
        match path {
            [] => self.value(scope),
            [Seg::Index(index), rest @ ..] => self.with_elements(scope, |elements| {
                let element = elements.get(*index).ok_or(EvalError::IndexOutOfRange {
                    index: *index as i64,
                    len: elements.len(),
                })?;
                element.value_at(rest, &Scope::element(*index, scope))
            }),
            [seg, ..] => Err(UsageError::InvalidPath(seg.to_string()).into()),
        }
    }

    /// Writing past the end extends the array with fresh elements
    fn assign_at(&mut self, path: &[Seg], value: &Value, scope: &Scope<'_>) -> Result<()> {
        match path {
            [] => self.assign(value, scope),
            [Seg::Index(index), rest @ ..] => {
                let element_proto = self.element.clone();
                let elements = self.elements_mut(scope)?;
                while elements.len() <= *index {
                    elements.push(element_proto.instantiate()?);
                }
                let frame = Scope::element(*index, scope);
                elements[*index].assign_at(rest, value, &frame)
            }
            [seg, ..] => Err(UsageError::InvalidPath(seg.to_string()).into()),
        }
    }

    fn bit_offset_of(&self, path: &[Seg], start: u64, scope: &Scope<'_>) -> Result<u64> {
        match path {
            [] => self.begin_bit(start, scope),
            [Seg::Index(index), rest @ ..] => self.with_elements(scope, |elements| {
                let target = elements.get(*index).ok_or(EvalError::IndexOutOfRange {
                    index: *index as i64,
                    len: elements.len(),
                })?;
                let pos = end_of(&elements[..*index], start, scope)?;
                target.bit_offset_of(rest, pos, &Scope::element(*index, scope))
            }),
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

fn array_type() -> TypeDef {
    TypeDef::new(
        "array",
        Builder::Array,
        ParamRules::new()
            .mandatory(&["type"])
            .optional(&["initial_length", "read_until"])
            .exclusive("initial_length", "read_until"),
    )
}

crate::register_builtin_type!("array", array_type);
