// Sanitized, immutable prototypes that instantiate data objects

use super::node::{ChoiceKey, SchemaNode, TransformFactory};
use super::registry::TypeRegistry;
use super::sanitize::{PrototypeCache, Sanitizer};
use crate::core::{Param, Result, SchemaError};
use crate::types::codec::Codec;
use crate::types::DataObject;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// How an array decides how many elements to read
#[derive(Debug, Clone)]
pub enum ArrayMode {
    /// Neither `initial_length` nor `read_until` was given
    Empty,
    Length(Param),
    /// Stop once the predicate holds for the element just read
    Until(Param),
    /// Read until the stream runs out
    Eof,
}

/// The stream filter a buffer-like wrapper splices around its child
#[derive(Clone)]
pub enum Filter {
    /// Bound the child to `length` bytes
    SubRange(Param),
    Custom(TransformFactory),
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::SubRange(length) => f.debug_tuple("SubRange").field(length).finish(),
            Filter::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: Option<String>,
    pub proto: Arc<Prototype>,
}

/// Where a visible name lives: a direct field, or inside an anonymous struct
#[derive(Debug, Clone, Copy)]
pub struct FieldRef {
    pub index: usize,
    pub spliced: bool,
}

/// Field layout of a struct prototype
#[derive(Debug, Clone)]
pub struct StructSpec {
    pub fields: Vec<FieldSpec>,
    pub names: HashMap<String, FieldRef>,
    pub hidden: HashSet<String>,
}

impl StructSpec {
    /// Indexes the fields, splicing names of anonymous struct fields.
    pub fn new(fields: Vec<FieldSpec>, hidden: Vec<String>) -> std::result::Result<Self, SchemaError> {
        let mut names = HashMap::new();
        for (index, field) in fields.iter().enumerate() {
            let mut add = |name: &str, spliced: bool| {
                if names
                    .insert(name.to_string(), FieldRef { index, spliced })
                    .is_some()
                {
                    return Err(SchemaError::DuplicateField(name.to_string()));
                }
                Ok(())
            };
            match (&field.name, field.proto.struct_spec()) {
                (Some(name), _) => add(name, false)?,
                (None, Some(inner)) => {
                    for name in inner.names.keys() {
                        add(name, true)?;
                    }
                }
                (None, None) => {}
            }
        }

        Ok(Self {
            fields,
            names,
            hidden: hidden.into_iter().collect(),
        })
    }

    pub fn locate(&self, name: &str) -> Option<FieldRef> {
        self.names.get(name).copied()
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        self.hidden.contains(name)
    }

    /// Externally visible field names in declaration order
    pub fn visible_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        for field in &self.fields {
            match (&field.name, field.proto.struct_spec()) {
                (Some(name), _) if !self.is_hidden(name) => out.push(name.clone()),
                (None, Some(inner)) => out.extend(inner.visible_names()),
                _ => {}
            }
        }
        out
    }
}

/// A recursive occurrence of a named type, sanitized on first instantiation.
///
/// The resolved prototype usually encloses this one, so only a weak handle is
/// kept; the sanitizer cache and the instantiated objects own it.
pub struct Deferred {
    node: SchemaNode,
    namespace: String,
    registry: Arc<TypeRegistry>,
    cache: Weak<Mutex<PrototypeCache>>,
    resolved: once_cell::sync::OnceCell<Weak<Prototype>>,
}

impl Deferred {
    pub(crate) fn new(
        node: SchemaNode,
        namespace: String,
        registry: Arc<TypeRegistry>,
        cache: Weak<Mutex<PrototypeCache>>,
    ) -> Self {
        Self {
            node,
            namespace,
            registry,
            cache,
            resolved: once_cell::sync::OnceCell::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some_and(|proto| proto.strong_count() > 0)
    }

    /// The prototype this occurrence stands for. Sanitized again if every
    /// owner of the earlier resolution has gone.
    pub fn resolve(&self) -> Result<Arc<Prototype>> {
        if let Some(proto) = self.resolved.get().and_then(Weak::upgrade) {
            return Ok(proto);
        }

        tracing::debug!("Resolving deferred type {}", self.node.type_name);
        let cache = self.cache.upgrade().unwrap_or_default();
        let proto = Sanitizer::with_cache(self.registry.clone(), cache)
            .sanitize_in_namespace(&self.node, &self.namespace)?;
        if self.resolved.set(Arc::downgrade(&proto)).is_err() {
            tracing::trace!("Deferred type {} re-sanitized after its owners dropped", self.node.type_name);
        }
        Ok(proto)
    }
}

impl Clone for Deferred {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            namespace: self.namespace.clone(),
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            resolved: self.resolved.clone(),
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("type_name", &self.node.type_name)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Kind {
    Primitive {
        codec: Arc<dyn Codec>,
    },
    Struct(StructSpec),
    Array {
        element: Arc<Prototype>,
        mode: ArrayMode,
    },
    Choice {
        choices: Vec<(ChoiceKey, Arc<Prototype>)>,
        copy_on_change: bool,
    },
    Buffer {
        inner: Arc<Prototype>,
        filter: Filter,
    },
    Deferred(Deferred),
}

/// A validated `(type, parameters)` pair.
///
/// Prototypes are immutable and shared between every object built from them.
/// Byte alignment is left to the data objects, since an aggregate aligns
/// wherever its live content does.
#[derive(Debug, Clone)]
pub struct Prototype {
    pub type_name: String,
    pub params: IndexMap<String, Param>,
    pub kind: Kind,
}

impl Prototype {
    pub fn new(type_name: impl Into<String>, params: IndexMap<String, Param>, kind: Kind) -> Self {
        Self {
            type_name: type_name.into(),
            params,
            kind,
        }
    }

    /// Copy under another type name
    pub(crate) fn renamed(&self, type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            ..self.clone()
        }
    }

    /// Copy with extra use-site parameters
    pub(crate) fn with_params(&self, extra: Vec<(String, Param)>) -> Self {
        let mut proto = self.clone();
        proto.params.extend(extra);
        proto
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    /// True for types whose objects hold a single primitive value
    pub fn is_scalar(&self) -> bool {
        match &self.kind {
            Kind::Primitive { .. } => true,
            Kind::Buffer { inner, .. } => inner.is_scalar(),
            // a type nested in itself never bottoms out in one value
            Kind::Deferred(_) => false,
            Kind::Struct(_) | Kind::Array { .. } | Kind::Choice { .. } => false,
        }
    }

    pub fn struct_spec(&self) -> Option<&StructSpec> {
        match &self.kind {
            Kind::Struct(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.kind, Kind::Deferred(_))
    }

    /// Builds a fresh, cleared data object
    pub fn instantiate(self: &Arc<Self>) -> Result<Box<dyn DataObject>> {
        crate::types::instantiate(self)
    }
}
