// Declarative schema nodes, before sanitization

use crate::core::{Eval, Param, Result, Value};
use crate::io::BoxedTransform;
use std::fmt;
use std::sync::Arc;

/// Builds the transform a `transformed` wrapper splices around its child
pub type TransformFactory = Arc<dyn Fn(&Eval<'_>) -> Result<BoxedTransform> + Send + Sync>;

/// Key of a choice alternative
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChoiceKey {
    Int(i128),
    Str(String),
    /// Taken when no other key matches
    Default,
}

impl ChoiceKey {
    /// Whether an evaluated selection picks this key
    pub fn matches(&self, selection: &Value) -> bool {
        match self {
            ChoiceKey::Int(i) => selection.as_int() == Some(*i),
            ChoiceKey::Str(s) => selection.as_str() == Some(s.as_str()),
            ChoiceKey::Default => false,
        }
    }
}

impl From<i64> for ChoiceKey {
    fn from(v: i64) -> Self {
        ChoiceKey::Int(v as i128)
    }
}

impl From<i32> for ChoiceKey {
    fn from(v: i32) -> Self {
        ChoiceKey::Int(v as i128)
    }
}

impl From<&str> for ChoiceKey {
    fn from(v: &str) -> Self {
        ChoiceKey::Str(v.to_string())
    }
}

/// A declared parameter before sanitization
#[derive(Clone)]
pub enum RawParam {
    Param(Param),
    Node(Box<SchemaNode>),
    Fields(Vec<SchemaNode>),
    Choices(Vec<(ChoiceKey, SchemaNode)>),
    Transform(TransformFactory),
    Names(Vec<String>),
}

impl RawParam {
    pub fn as_param(&self) -> Option<&Param> {
        match self {
            RawParam::Param(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        self.as_param().and_then(Param::as_literal)
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            RawParam::Param(_) => "param",
            RawParam::Node(_) => "node",
            RawParam::Fields(_) => "fields",
            RawParam::Choices(_) => "choices",
            RawParam::Transform(_) => "transform",
            RawParam::Names(_) => "names",
        }
    }
}

impl fmt::Debug for RawParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawParam::Param(p) => write!(f, "{:?}", p),
            RawParam::Node(n) => write!(f, "{:?}", n),
            RawParam::Fields(fields) => f.debug_list().entries(fields).finish(),
            RawParam::Choices(choices) => f.debug_list().entries(choices).finish(),
            RawParam::Names(names) => write!(f, "{:?}", names),
            other => f.write_str(other.kind()),
        }
    }
}

impl From<Param> for RawParam {
    fn from(p: Param) -> Self {
        RawParam::Param(p)
    }
}

impl From<Value> for RawParam {
    fn from(v: Value) -> Self {
        RawParam::Param(Param::Literal(v))
    }
}

impl From<SchemaNode> for RawParam {
    fn from(n: SchemaNode) -> Self {
        RawParam::Node(Box::new(n))
    }
}

impl From<&str> for RawParam {
    fn from(s: &str) -> Self {
        RawParam::Param(Param::lit(s))
    }
}

impl From<i64> for RawParam {
    fn from(v: i64) -> Self {
        RawParam::Param(Param::lit(v))
    }
}

impl From<i32> for RawParam {
    fn from(v: i32) -> Self {
        RawParam::Param(Param::lit(v))
    }
}

impl From<u64> for RawParam {
    fn from(v: u64) -> Self {
        RawParam::Param(Param::lit(v))
    }
}

impl From<bool> for RawParam {
    fn from(v: bool) -> Self {
        RawParam::Param(Param::lit(v))
    }
}

impl From<Vec<&str>> for RawParam {
    fn from(names: Vec<&str>) -> Self {
        RawParam::Names(names.into_iter().map(String::from).collect())
    }
}

/// `(type_name, field_name?, parameters)` as declared
#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub type_name: String,
    pub name: Option<String>,
    pub params: Vec<(String, RawParam)>,
}

impl SchemaNode {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: None,
            params: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets a parameter, replacing any earlier value for the key
    pub fn with(mut self, key: impl Into<String>, value: impl Into<RawParam>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<RawParam>) {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.params.push((key, value)),
        }
    }

    /// Appends a struct field
    pub fn field(mut self, node: SchemaNode) -> Self {
        match self.params.iter_mut().find(|(k, _)| k == "fields") {
            Some((_, RawParam::Fields(fields))) => fields.push(node),
            _ => self.set("fields", RawParam::Fields(vec![node])),
        }
        self
    }

    /// Adds a choice alternative
    pub fn choice(mut self, key: impl Into<ChoiceKey>, node: SchemaNode) -> Self {
        let key = key.into();
        match self.params.iter_mut().find(|(k, _)| k == "choices") {
            Some((_, RawParam::Choices(choices))) => choices.push((key, node)),
            _ => self.set("choices", RawParam::Choices(vec![(key, node)])),
        }
        self
    }

    /// Adds the default choice alternative
    pub fn default_choice(self, node: SchemaNode) -> Self {
        self.choice(ChoiceKey::Default, node)
    }

    /// Sets the transform factory of a `transformed` wrapper
    pub fn transform<F>(self, factory: F) -> Self
    where
        F: Fn(&Eval<'_>) -> Result<BoxedTransform> + Send + Sync + 'static,
    {
        self.with("transform", RawParam::Transform(Arc::new(factory)))
    }

    pub fn param(&self, key: &str) -> Option<&RawParam> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// True when parameters other than `ignored` are present
    pub fn has_params_besides(&self, ignored: &[&str]) -> bool {
        self.params.iter().any(|(k, _)| !ignored.contains(&k.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let node = SchemaNode::new("struct")
            .field(SchemaNode::new("uint8").named("a"))
            .field(SchemaNode::new("uint8").named("b"))
            .with("endian", "little")
            .with("endian", "big");

        match node.param("fields") {
            Some(RawParam::Fields(fields)) => assert_eq!(fields.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(node.params.len(), 2);
        assert_eq!(
            node.param("endian").and_then(|p| p.as_literal()),
            Some(&Value::Str("big".into()))
        );
        assert!(node.has_params_besides(&["endian"]));
    }

    #[test]
    fn test_choice_keys() {
        let node = SchemaNode::new("choice")
            .choice(1, SchemaNode::new("uint8"))
            .choice("x", SchemaNode::new("uint8"))
            .default_choice(SchemaNode::new("uint8"));
        match node.param("choices") {
            Some(RawParam::Choices(choices)) => {
                assert_eq!(choices.len(), 3);
                assert!(choices[0].0.matches(&Value::Int(1)));
                assert!(choices[1].0.matches(&Value::Str("x".into())));
                assert!(!choices[2].0.matches(&Value::Int(1)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
