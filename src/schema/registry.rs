// Type registry mapping schema type names to type definitions

use super::node::SchemaNode;
use crate::core::{SchemaError, Value};
use crate::io::Endian;
use crate::types::codec::Codec;
use crate::types::int::Int;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// How a registered type builds its prototype
#[derive(Debug, Clone)]
pub enum Builder {
    Codec(Arc<dyn Codec>),
    Struct,
    Array,
    Choice,
    Buffer,
    Transformed,
    /// A user type defined by a schema node, sanitized in `namespace`
    Named {
        node: SchemaNode,
        namespace: String,
    },
}

/// The parameter contract of a type
#[derive(Debug, Clone, Default)]
pub struct ParamRules {
    pub mandatory: Vec<&'static str>,
    pub optional: Vec<&'static str>,
    pub defaults: Vec<(&'static str, Value)>,
    pub exclusive: Vec<(&'static str, &'static str)>,
    /// Accept parameters outside the declared lists (struct user parameters)
    pub open: bool,
}

/// Parameters every type accepts
pub const COMMON_PARAMS: &[&str] = &["onlyif", "endian"];

impl ParamRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mandatory(mut self, names: &[&'static str]) -> Self {
        self.mandatory.extend_from_slice(names);
        self
    }

    pub fn optional(mut self, names: &[&'static str]) -> Self {
        self.optional.extend_from_slice(names);
        self
    }

    pub fn default_value(mut self, name: &'static str, value: impl Into<Value>) -> Self {
        self.defaults.push((name, value.into()));
        self
    }

    pub fn exclusive(mut self, first: &'static str, second: &'static str) -> Self {
        self.exclusive.push((first, second));
        self
    }

    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    /// Rules shared by every primitive
    pub fn primitive() -> Self {
        Self::new()
            .optional(&["value", "initial_value", "assert", "bit_aligned"])
            .exclusive("value", "initial_value")
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.open
            || COMMON_PARAMS.contains(&name)
            || self.mandatory.contains(&name)
            || self.optional.contains(&name)
            || self.defaults.iter().any(|(n, _)| *n == name)
    }
}

/// A registered type
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub builder: Builder,
    pub rules: ParamRules,
}

impl TypeDef {
    pub fn new(name: impl Into<String>, builder: Builder, rules: ParamRules) -> Self {
        Self {
            name: name.into(),
            builder,
            rules,
        }
    }

    pub fn codec(name: impl Into<String>, codec: impl Codec + 'static, rules: ParamRules) -> Self {
        Self::new(name, Builder::Codec(Arc::new(codec)), rules)
    }
}

/// A built-in type collected at registry construction
pub struct BuiltinType {
    pub name: &'static str,
    pub build: fn() -> TypeDef,
}

inventory::collect!(BuiltinType);

/// Helper macro to register a built-in type
#[macro_export]
macro_rules! register_builtin_type {
    ($name:expr, $build:path) => {
        inventory::submit! {
            $crate::schema::registry::BuiltinType {
                name: $name,
                build: $build,
            }
        }
    };
}

/// Context a lookup is made in
#[derive(Debug, Clone, Copy, Default)]
pub struct Hints<'a> {
    pub endian: Option<Endian>,
    pub namespace: &'a str,
}

lazy_static::lazy_static! {
    static ref ACRONYM_BOUNDARY: Regex = Regex::new(r"([A-Z]+)([A-Z][a-z])").unwrap();
    static ref CAMEL_BOUNDARY: Regex = Regex::new(r"([a-z\d])([A-Z])").unwrap();
    static ref INT_FAMILY: Regex = Regex::new(r"^(u?int)(\d+)(le|be)?$").unwrap();
    static ref BIT_FAMILY: Regex = Regex::new(r"^(s?bit)(\d+)(le)?$").unwrap();
    static ref INT_NAME: Regex = Regex::new(r"^u?int\d+$").unwrap();
    static ref BIT_NAME: Regex = Regex::new(r"^s?bit\d+$").unwrap();
}

/// Canonical form of a type name: `CamelCase` segments become `snake_case`,
/// qualified names keep their `::` separators.
pub fn normalize_name(name: &str) -> String {
    name.split("::")
        .map(|segment| {
            let s = ACRONYM_BOUNDARY.replace_all(segment.trim(), "${1}_${2}");
            CAMEL_BOUNDARY.replace_all(&s, "${1}_${2}").to_lowercase()
        })
        .collect::<Vec<_>>()
        .join("::")
}

fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", namespace, name)
    }
}

/// Endian-specific spelling of `name`, if the name takes one
fn with_endian(name: &str, endian: Endian) -> Option<String> {
    let (prefix, base) = match name.rsplit_once("::") {
        Some((ns, base)) => (format!("{}::", ns), base),
        None => (String::new(), name),
    };
    if INT_NAME.is_match(base) {
        Some(format!("{}{}{}", prefix, base, endian.suffix()))
    } else if BIT_NAME.is_match(base) {
        // bit fields are big endian unless asked otherwise
        endian
            .is_little()
            .then(|| format!("{}{}le", prefix, base))
    } else {
        Some(format!("{}{}_{}", prefix, base, endian.suffix()))
    }
}

/// Synthesizes a member of the integer or bit-field families
fn synthesize(name: &str) -> Option<TypeDef> {
    if let Some(caps) = INT_FAMILY.captures(name) {
        let signed = &caps[1] == "int";
        let bits: u32 = caps[2].parse().ok()?;
        if bits == 0 || bits % 8 != 0 || bits > 64 {
            return None;
        }
        let endian = match caps.get(3).map(|m| m.as_str()) {
            Some("le") if bits > 8 => Endian::Little,
            Some("be") if bits > 8 => Endian::Big,
            None if bits == 8 => Endian::Big,
            _ => return None,
        };
        return Some(TypeDef::codec(
            name,
            Int::bytes(bits, signed, endian),
            ParamRules::primitive(),
        ));
    }

    if let Some(caps) = BIT_FAMILY.captures(name) {
        let signed = &caps[1] == "sbit";
        let bits: u32 = caps[2].parse().ok()?;
        if bits == 0 || bits > 64 {
            return None;
        }
        let endian = if caps.get(3).is_some() {
            Endian::Little
        } else {
            Endian::Big
        };
        return Some(TypeDef::codec(
            name,
            Int::bits(bits, signed, endian),
            ParamRules::primitive(),
        ));
    }
    None
}

/// Maps normalized, namespace-qualified type names to definitions.
///
/// The registry is an explicit value: construct one, register user types on
/// it, and hand it to a [`super::Sanitizer`].
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<TypeDef>>>,
}

impl TypeRegistry {
    /// An empty registry. Integer and bit-field families are still synthesized.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in type
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for builtin in inventory::iter::<BuiltinType> {
            let def = (builtin.build)();
            registry.insert(builtin.name.to_string(), def);
        }
        registry
    }

    fn insert(&self, key: String, def: TypeDef) {
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        if types.insert(key.clone(), Arc::new(def)).is_some() {
            tracing::warn!("Type '{}' was registered twice; keeping the newer one", key);
        }
    }

    fn get(&self, key: &str) -> Option<Arc<TypeDef>> {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        types.get(key).cloned()
    }

    /// Registers `def` as `name` inside `namespace` ("" for global)
    pub fn register(&self, namespace: &str, name: &str, mut def: TypeDef) {
        let key = qualify(&normalize_name(namespace), &normalize_name(name));
        def.name = key.clone();
        tracing::debug!("Registering type {}", key);
        self.insert(key, def);
    }

    /// Registers a user type whose layout is `node`
    pub fn register_named(&self, namespace: &str, name: &str, node: SchemaNode) {
        let namespace = normalize_name(namespace);
        let def = TypeDef::new(
            name,
            Builder::Named {
                node,
                namespace: namespace.clone(),
            },
            ParamRules::new().open(),
        );
        self.register(&namespace, name, def);
    }

    pub fn is_registered(&self, namespace: &str, name: &str) -> bool {
        let key = qualify(&normalize_name(namespace), &normalize_name(name));
        self.get(&key).is_some()
    }

    /// Exact key lookup, synthesizing family members on first use
    fn resolve_key(&self, key: &str) -> Option<Arc<TypeDef>> {
        if let Some(def) = self.get(key) {
            return Some(def);
        }
        let def = synthesize(key)?;
        tracing::debug!("Synthesized type {}", key);
        let def = Arc::new(def);
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        Some(types.entry(key.to_string()).or_insert(def).clone())
    }

    fn find(&self, name: &str, hints: &Hints<'_>) -> Option<Arc<TypeDef>> {
        let namespace = normalize_name(hints.namespace);
        let mut scopes: Vec<&str> = Vec::new();
        let mut current = namespace.as_str();
        while !current.is_empty() {
            scopes.push(current);
            current = current.rsplit_once("::").map(|(outer, _)| outer).unwrap_or("");
        }
        scopes.push("");

        for scope in scopes {
            let candidate = qualify(scope, name);
            if let Some(endian) = hints.endian {
                if let Some(suffixed) = with_endian(&candidate, endian) {
                    if let Some(def) = self.resolve_key(&suffixed) {
                        return Some(def);
                    }
                }
            }
            if let Some(def) = self.resolve_key(&candidate) {
                return Some(def);
            }
        }
        None
    }

    /// Resolves a type name. Unadorned numeric names with no endian hint fail
    /// with [`SchemaError::EndianRequired`] rather than guessing.
    pub fn lookup(&self, name: &str, hints: &Hints<'_>) -> Result<Arc<TypeDef>, SchemaError> {
        let normalized = normalize_name(name);
        if let Some(def) = self.find(&normalized, hints) {
            return Ok(def);
        }

        if hints.endian.is_none() {
            let retry = Hints {
                endian: Some(Endian::Big),
                namespace: hints.namespace,
            };
            if self.find(&normalized, &retry).is_some() {
                return Err(SchemaError::EndianRequired(name.to_string()));
            }
        }
        Err(SchemaError::UnknownType(name.to_string()))
    }
}
