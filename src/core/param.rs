// Parameter values: literals, named references and deferred expressions

use super::error::Result;
use super::eval::Eval;
use super::value::Value;
use std::fmt;
use std::sync::Arc;

type ExprFn = dyn Fn(&Eval<'_>) -> Result<Value> + Send + Sync;

/// A deferred expression, evaluated fresh every time it is needed
#[derive(Clone)]
pub struct Expr(Arc<ExprFn>);

impl Expr {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Eval<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, eval: &Eval<'_>) -> Result<Value> {
        (self.0)(eval)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<expr>")
    }
}

/// A declared parameter value, resolved only at the moment of use
#[derive(Debug, Clone)]
pub enum Param {
    Literal(Value),
    Ref(String),
    Expr(Expr),
}

impl Param {
    pub fn lit(value: impl Into<Value>) -> Self {
        Param::Literal(value.into())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Param::Ref(name.into())
    }

    pub fn expr<F>(f: F) -> Self
    where
        F: Fn(&Eval<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Param::Expr(Expr::new(f))
    }

    /// Compiles a textual expression such as `len - 2`
    pub fn parse(text: &str) -> Result<Self> {
        crate::schema::expr::compile(text)
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Param::Literal(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Value> for Param {
    fn from(v: Value) -> Self {
        Param::Literal(v)
    }
}
