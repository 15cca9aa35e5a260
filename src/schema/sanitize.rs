// Parameter sanitization: schema nodes in, validated prototypes out

use super::node::{ChoiceKey, RawParam, SchemaNode};
use super::prototype::{ArrayMode, Deferred, FieldSpec, Filter, Kind, Prototype, StructSpec};
use super::registry::{normalize_name, Builder, Hints, TypeDef, TypeRegistry};
use crate::core::{Param, Result, SchemaError, Value};
use crate::io::Endian;
use crate::types::codec::{BitAligned, Codec};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub(crate) type CacheKey = (String, Option<Endian>);
pub(crate) type PrototypeCache = HashMap<CacheKey, Arc<Prototype>>;

/// Names a struct field may not take
pub const RESERVED_NAMES: &[&str] = &[
    "array", "clear", "element", "false", "index", "offset", "parent", "read", "self",
    "snapshot", "true", "value", "write",
];

/// Use-site parameters that place a field rather than configure its type
const PLACEMENT_PARAMS: &[&str] = &["onlyif"];

lazy_static::lazy_static! {
    static ref FIELD_NAME: Regex = Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap();
}

#[derive(Debug, Clone, Default)]
struct Ctx {
    namespace: String,
    endian: Option<Endian>,
    /// Named types currently being sanitized, outermost first
    active: Vec<String>,
}

fn invalid(type_name: &str, param: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidParameter {
        type_name: type_name.to_string(),
        param: param.to_string(),
        reason: reason.into(),
    }
}

fn node_endian(node: &SchemaNode) -> Result<Option<Endian>> {
    match node.param("endian") {
        None => Ok(None),
        Some(raw) => match raw.as_literal().and_then(Value::as_str) {
            Some(text) => text
                .parse::<Endian>()
                .map(Some)
                .map_err(|reason: String| invalid(&node.type_name, "endian", reason).into()),
            None => Err(invalid(&node.type_name, "endian", "must be \"big\" or \"little\"").into()),
        },
    }
}

fn literal_bool(raw: Option<RawParam>, type_name: &str, param: &str) -> Result<bool> {
    match raw {
        None => Ok(false),
        Some(raw) => raw
            .as_literal()
            .and_then(Value::as_bool)
            .ok_or_else(|| invalid(type_name, param, "must be a literal boolean").into()),
    }
}

fn expect_param(raw: RawParam, type_name: &str, param: &str) -> Result<Param> {
    match raw {
        RawParam::Param(p) => Ok(p),
        other => Err(invalid(type_name, param, format!("expected a value, found {}", other.kind())).into()),
    }
}

fn validate_field_name(name: &str) -> Result<()> {
    if !FIELD_NAME.is_match(name) {
        return Err(SchemaError::InvalidFieldName {
            name: name.to_string(),
            reason: "must be a lowercase identifier".to_string(),
        }
        .into());
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(SchemaError::ReservedName(name.to_string()).into());
    }
    Ok(())
}

/// Turns schema nodes into prototypes using an injected registry.
///
/// Named types used without use-site parameters are cached per inherited
/// endianness, so a recursive type is sanitized once no matter how deep the
/// data nests.
#[derive(Clone)]
pub struct Sanitizer {
    registry: Arc<TypeRegistry>,
    cache: Arc<Mutex<PrototypeCache>>,
}

impl Sanitizer {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_cache(registry, Arc::default())
    }

    pub(crate) fn with_cache(registry: Arc<TypeRegistry>, cache: Arc<Mutex<PrototypeCache>>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Number of named-type prototypes cached so far
    pub fn cached_types(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn sanitize(&self, node: &SchemaNode) -> Result<Arc<Prototype>> {
        self.sanitize_in_namespace(node, "")
    }

    /// Sanitizes `node` with type lookups starting in `namespace`
    pub fn sanitize_in_namespace(&self, node: &SchemaNode, namespace: &str) -> Result<Arc<Prototype>> {
        let ctx = Ctx {
            namespace: normalize_name(namespace),
            ..Ctx::default()
        };
        self.sanitize_node(node, &ctx)
    }

    fn sanitize_node(&self, node: &SchemaNode, ctx: &Ctx) -> Result<Arc<Prototype>> {
        let mut ctx = ctx.clone();
        if let Some(endian) = node_endian(node)? {
            ctx.endian = Some(endian);
        }

        let hints = Hints {
            endian: ctx.endian,
            namespace: &ctx.namespace,
        };
        let def = self.registry.lookup(&node.type_name, &hints)?;
        match &def.builder {
            Builder::Named { node: body, namespace } => {
                self.sanitize_named(&def, body, namespace, node, ctx)
            }
            _ => self.sanitize_builtin(&def, node, &ctx),
        }
    }

    fn sanitize_named(
        &self,
        def: &TypeDef,
        body: &SchemaNode,
        body_namespace: &str,
        use_site: &SchemaNode,
        mut ctx: Ctx,
    ) -> Result<Arc<Prototype>> {
        let mut placement = Vec::new();
        let mut type_node = SchemaNode::new(use_site.type_name.clone());
        for (key, raw) in &use_site.params {
            if PLACEMENT_PARAMS.contains(&key.as_str()) {
                placement.push((key.clone(), expect_param(raw.clone(), &def.name, key)?));
            } else {
                type_node.set(key.clone(), raw.clone());
            }
        }

        if ctx.active.iter().any(|name| *name == def.name) {
            if type_node.param("endian").is_none() {
                if let Some(endian) = ctx.endian {
                    type_node.set("endian", endian.to_string().as_str());
                }
            }
            tracing::debug!("Deferring recursive type {}", def.name);
            let deferred = Deferred::new(
                type_node,
                ctx.namespace.clone(),
                self.registry.clone(),
                Arc::downgrade(&self.cache),
            );
            let params = placement.into_iter().collect();
            return Ok(Arc::new(Prototype::new(
                def.name.clone(),
                params,
                Kind::Deferred(deferred),
            )));
        }

        let key = (def.name.clone(), ctx.endian);
        let cacheable = !type_node.has_params_besides(&["endian"]);
        let cached = if cacheable {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.get(&key).cloned()
        } else {
            None
        };

        let proto = match cached {
            Some(proto) => proto,
            None => {
                let mut merged = body.clone();
                merged.name = None;
                for (k, v) in type_node.params {
                    merged.set(k, v);
                }
                ctx.active.push(def.name.clone());
                ctx.namespace = body_namespace.to_string();

                tracing::debug!("Sanitizing type {}", def.name);
                let inner = self.sanitize_node(&merged, &ctx)?;
                let proto = Arc::new(inner.renamed(&def.name));
                if cacheable {
                    let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                    cache.insert(key, proto.clone());
                }
                proto
            }
        };

        if placement.is_empty() {
            Ok(proto)
        } else {
            Ok(Arc::new(proto.with_params(placement)))
        }
    }

    fn sanitize_builtin(&self, def: &TypeDef, node: &SchemaNode, ctx: &Ctx) -> Result<Arc<Prototype>> {
        let type_name = def.name.as_str();
        let rules = &def.rules;
        let mut raw: IndexMap<String, RawParam> = node.params.iter().cloned().collect();

        if let Some(asserted) = raw.shift_remove("asserted_value") {
            for other in ["value", "assert"] {
                if raw.contains_key(other) {
                    return Err(SchemaError::ConflictingParameters {
                        type_name: type_name.to_string(),
                        first: "asserted_value".to_string(),
                        second: other.to_string(),
                    }
                    .into());
                }
            }
            raw.insert("value".to_string(), asserted.clone());
            raw.insert("assert".to_string(), asserted);
        }

        for (name, value) in &rules.defaults {
            raw.entry(name.to_string())
                .or_insert_with(|| RawParam::from(value.clone()));
        }
        for name in &rules.mandatory {
            if !raw.contains_key(*name) {
                return Err(SchemaError::MissingParameter {
                    type_name: type_name.to_string(),
                    param: name.to_string(),
                }
                .into());
            }
        }
        for (first, second) in &rules.exclusive {
            if raw.contains_key(*first) && raw.contains_key(*second) {
                return Err(SchemaError::ConflictingParameters {
                    type_name: type_name.to_string(),
                    first: first.to_string(),
                    second: second.to_string(),
                }
                .into());
            }
        }
        if let Some(unknown) = raw.keys().find(|k| !rules.accepts(k)) {
            return Err(invalid(type_name, unknown, "unknown parameter").into());
        }

        let kind = match &def.builder {
            Builder::Codec(codec) => {
                let codec: Arc<dyn Codec> =
                    if literal_bool(raw.shift_remove("bit_aligned"), type_name, "bit_aligned")? {
                        Arc::new(BitAligned::new(codec.clone()))
                    } else {
                        codec.clone()
                    };
                Kind::Primitive { codec }
            }
            Builder::Struct => Kind::Struct(self.struct_spec(&mut raw, type_name, ctx)?),
            Builder::Array => {
                let element = self.inner_type(&mut raw, "type", type_name, ctx)?;
                let mode = if let Some(length) = raw.shift_remove("initial_length") {
                    ArrayMode::Length(expect_param(length, type_name, "initial_length")?)
                } else if let Some(until) = raw.shift_remove("read_until") {
                    let until = expect_param(until, type_name, "read_until")?;
                    match until.as_literal().and_then(Value::as_str) {
                        Some("eof") => ArrayMode::Eof,
                        _ => ArrayMode::Until(until),
                    }
                } else {
                    ArrayMode::Empty
                };
                Kind::Array { element, mode }
            }
            Builder::Choice => self.choice_kind(&mut raw, type_name, ctx)?,
            Builder::Buffer => {
                let inner = self.inner_type(&mut raw, "type", type_name, ctx)?;
                let length = raw
                    .shift_remove("length")
                    .ok_or_else(|| invalid(type_name, "length", "missing"))?;
                Kind::Buffer {
                    inner,
                    filter: Filter::SubRange(expect_param(length, type_name, "length")?),
                }
            }
            Builder::Transformed => {
                let inner = self.inner_type(&mut raw, "type", type_name, ctx)?;
                match raw.shift_remove("transform") {
                    Some(RawParam::Transform(factory)) => Kind::Buffer {
                        inner,
                        filter: Filter::Custom(factory),
                    },
                    _ => return Err(invalid(type_name, "transform", "expected a transform factory").into()),
                }
            }
            Builder::Named { .. } => {
                return Err(SchemaError::Invalid(format!("'{}' cannot be built directly", type_name)).into())
            }
        };

        let mut params = IndexMap::new();
        for (key, value) in raw {
            let param = expect_param(value, type_name, &key)?;
            params.insert(key, param);
        }
        tracing::trace!("Sanitized {} with {} runtime parameters", type_name, params.len());
        Ok(Arc::new(Prototype::new(type_name, params, kind)))
    }

    /// Sanitizes a nested type given by name or by node
    fn inner_type(
        &self,
        raw: &mut IndexMap<String, RawParam>,
        key: &str,
        type_name: &str,
        ctx: &Ctx,
    ) -> Result<Arc<Prototype>> {
        match raw.shift_remove(key) {
            Some(RawParam::Node(node)) => self.sanitize_node(&node, ctx),
            Some(RawParam::Param(Param::Literal(Value::Str(name)))) => {
                self.sanitize_node(&SchemaNode::new(name), ctx)
            }
            Some(_) => Err(invalid(type_name, key, "expected a type name or node").into()),
            None => Err(SchemaError::MissingParameter {
                type_name: type_name.to_string(),
                param: key.to_string(),
            }
            .into()),
        }
    }

    fn struct_spec(
        &self,
        raw: &mut IndexMap<String, RawParam>,
        type_name: &str,
        ctx: &Ctx,
    ) -> Result<StructSpec> {
        let fields = match raw.shift_remove("fields") {
            Some(RawParam::Fields(fields)) => fields,
            Some(_) => return Err(invalid(type_name, "fields", "expected a field list").into()),
            None => Vec::new(),
        };
        let hidden = match raw.shift_remove("hide") {
            None => Vec::new(),
            Some(RawParam::Names(names)) => names,
            Some(RawParam::Param(Param::Literal(Value::Str(name)))) => vec![name],
            Some(RawParam::Param(Param::Literal(Value::List(items)))) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(String::from)
                        .ok_or_else(|| invalid(type_name, "hide", "expected field names"))
                })
                .collect::<std::result::Result<_, _>>()?,
            Some(_) => return Err(invalid(type_name, "hide", "expected field names").into()),
        };

        let mut specs = Vec::with_capacity(fields.len());
        for field in &fields {
            if let Some(name) = &field.name {
                validate_field_name(name)?;
                if raw.contains_key(name) {
                    return Err(SchemaError::InvalidFieldName {
                        name: name.clone(),
                        reason: "shadows a parameter of the enclosing struct".to_string(),
                    }
                    .into());
                }
            }
            let proto = self.sanitize_node(field, ctx).map_err(|e| {
                tracing::debug!("Field {:?} of {} failed to sanitize", field.name, type_name);
                e
            })?;
            specs.push(FieldSpec {
                name: field.name.clone(),
                proto,
            });
        }
        Ok(StructSpec::new(specs, hidden)?)
    }

    fn choice_kind(
        &self,
        raw: &mut IndexMap<String, RawParam>,
        type_name: &str,
        ctx: &Ctx,
    ) -> Result<Kind> {
        let declared = match raw.shift_remove("choices") {
            Some(RawParam::Choices(choices)) => choices,
            _ => return Err(invalid(type_name, "choices", "expected a choice table").into()),
        };
        let copy_on_change = literal_bool(raw.shift_remove("copy_on_change"), type_name, "copy_on_change")?;

        let mut choices: Vec<(ChoiceKey, Arc<Prototype>)> = Vec::with_capacity(declared.len());
        for (key, node) in &declared {
            if choices.iter().any(|(k, _)| k == key) {
                return Err(invalid(type_name, "choices", format!("duplicate key {:?}", key)).into());
            }
            choices.push((key.clone(), self.sanitize_node(node, ctx)?));
        }
        Ok(Kind::Choice {
            choices,
            copy_on_change,
        })
    }
}
