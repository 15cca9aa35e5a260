// Lazy parameter evaluation against a scope plus an override set

use super::error::{mismatch, EvalError, Result};
use super::param::Param;
use super::scope::{Probe, Scope};
use super::value::Value;
use crate::types::DataObject;

/// A name bound explicitly for one evaluation
pub enum Binding<'a> {
    Value(Value),
    /// A live object and the scope its parameters resolve in
    Object(&'a dyn DataObject, &'a Scope<'a>),
}

/// Evaluation context handed to deferred expressions.
///
/// Names resolve against the override set first, then the scope chain.
pub struct Eval<'a> {
    scope: &'a Scope<'a>,
    overrides: Vec<(&'a str, Binding<'a>)>,
}

impl<'a> Eval<'a> {
    pub fn new(scope: &'a Scope<'a>) -> Self {
        Self {
            scope,
            overrides: Vec::new(),
        }
    }

    pub fn with_overrides(scope: &'a Scope<'a>, overrides: Vec<(&'a str, Binding<'a>)>) -> Self {
        Self { scope, overrides }
    }

    pub fn scope(&self) -> &'a Scope<'a> {
        self.scope
    }

    pub fn eval(&self, param: &Param) -> Result<Value> {
        match param {
            Param::Literal(value) => Ok(value.clone()),
            Param::Ref(name) => self.get(name),
            Param::Expr(expr) => expr.call(self),
        }
    }

    fn probe(&self, name: &str, probe: Probe) -> Result<Value> {
        if let Some((_, binding)) = self.overrides.iter().find(|(n, _)| *n == name) {
            return match binding {
                Binding::Value(value) => probe.apply_value(value),
                Binding::Object(obj, scope) => probe.apply_object(*obj, scope),
            };
        }
        self.scope
            .lookup(name, probe)?
            .ok_or_else(|| EvalError::UnknownName(name.to_string()).into())
    }

    /// Current value of a named field, parameter or local
    pub fn get(&self, name: &str) -> Result<Value> {
        self.probe(name, Probe::Value)
    }

    pub fn int(&self, name: &str) -> Result<i128> {
        let value = self.get(name)?;
        value.as_int().ok_or_else(|| mismatch("int", &value))
    }

    pub fn u64(&self, name: &str) -> Result<u64> {
        let value = self.get(name)?;
        value.as_u64().ok_or_else(|| mismatch("unsigned int", &value))
    }

    pub fn usize(&self, name: &str) -> Result<usize> {
        let value = self.get(name)?;
        value.as_usize().ok_or_else(|| mismatch("unsigned int", &value))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.truthy())
    }

    /// Element count of a named array or string
    pub fn len(&self, name: &str) -> Result<usize> {
        let value = self.probe(name, Probe::Len)?;
        value.as_usize().ok_or_else(|| mismatch("length", &value))
    }

    /// Encoded size of a named object, rounded up to whole bytes
    pub fn num_bytes(&self, name: &str) -> Result<u64> {
        let value = self.probe(name, Probe::NumBytes)?;
        value.as_u64().ok_or_else(|| mismatch("size", &value))
    }

    /// Element `index` of a named array; negative indices count from the end
    pub fn at(&self, name: &str, index: i64) -> Result<Value> {
        self.probe(name, Probe::At(index))
    }

    /// Index of the array element being evaluated
    pub fn index(&self) -> Result<usize> {
        self.usize("index")
    }

    /// Evaluates `param` and requires an unsigned integer
    pub fn eval_usize(&self, param: &Param) -> Result<usize> {
        let value = self.eval(param)?;
        value.as_usize().ok_or_else(|| mismatch("unsigned int", &value))
    }

    pub fn eval_u64(&self, param: &Param) -> Result<u64> {
        let value = self.eval(param)?;
        value.as_u64().ok_or_else(|| mismatch("unsigned int", &value))
    }

    pub fn eval_bool(&self, param: &Param) -> Result<bool> {
        Ok(self.eval(param)?.truthy())
    }
}
