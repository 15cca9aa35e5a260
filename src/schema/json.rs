// JSON schema documents
//
// A document names a root node and, optionally, user types:
//
//   {
//     "namespace": "demo",
//     "types": { "Point": { "type": "struct", "fields": [...] } },
//     "root": { "type": "array", "of": "point", "initial_length": "count" }
//   }
//
// Every key of a node other than `type` and `name` is a parameter; the inner
// type of array, buffer and transformed nodes is spelled `of`. String
// parameters are expressions (`"len - 2"`, `"'abc'"` for a string literal),
// except type names, `endian`, and `read_until: "eof"`.

use super::expr;
use super::node::{ChoiceKey, RawParam, SchemaNode, TransformFactory};
use super::prototype::Prototype;
use super::registry::TypeRegistry;
use super::sanitize::Sanitizer;
use crate::core::{Eval, Param, Result, SchemaError, Value};
use crate::io::{BoxedTransform, Xor};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// One declared node
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDoc {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub name: Option<String>,

    /// All remaining keys, in declaration order
    #[serde(flatten)]
    pub params: IndexMap<String, serde_json::Value>,
}

/// A complete schema file
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub types: IndexMap<String, NodeDoc>,

    pub root: NodeDoc,
}

fn invalid(msg: impl Into<String>) -> SchemaError {
    SchemaError::Invalid(msg.into())
}

impl NodeDoc {
    /// Builds the schema node this document declares
    pub fn to_node(&self) -> Result<SchemaNode> {
        let mut node = SchemaNode::new(&self.type_name);
        node.name = self.name.clone();
        for (key, value) in &self.params {
            let key = if key == "of" { "type" } else { key.as_str() };
            node.set(key, convert_param(key, value)?);
        }
        Ok(node)
    }

    fn from_json(value: &serde_json::Value) -> Result<SchemaNode> {
        let doc: NodeDoc = serde_json::from_value(value.clone())
            .map_err(|e| invalid(format!("bad node {}: {}", value, e)))?;
        doc.to_node()
    }
}

fn convert_param(key: &str, value: &serde_json::Value) -> Result<RawParam> {
    use serde_json::Value as Json;

    Ok(match (key, value) {
        ("fields", Json::Array(items)) => RawParam::Fields(
            items
                .iter()
                .map(NodeDoc::from_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        ("fields", other) => return Err(invalid(format!("'fields' must be a list, got {}", other)).into()),

        ("choices", Json::Object(map)) => {
            let mut choices = Vec::with_capacity(map.len());
            for (k, v) in map {
                choices.push((choice_key(k), NodeDoc::from_json(v)?));
            }
            RawParam::Choices(choices)
        }
        ("choices", other) => return Err(invalid(format!("'choices' must be an object, got {}", other)).into()),

        ("hide", Json::String(name)) => RawParam::Names(vec![name.clone()]),
        ("hide", Json::Array(names)) => RawParam::Names(
            names
                .iter()
                .map(|n| {
                    n.as_str()
                        .map(String::from)
                        .ok_or_else(|| invalid(format!("'hide' entries must be names, got {}", n)).into())
                })
                .collect::<Result<Vec<_>>>()?,
        ),

        ("transform", spec) => RawParam::Transform(transform_factory(spec)?),

        ("type", Json::Object(_)) => RawParam::Node(Box::new(NodeDoc::from_json(value)?)),
        ("type", Json::String(name)) => RawParam::Param(Param::lit(name.as_str())),
        ("endian", Json::String(endian)) => RawParam::Param(Param::lit(endian.as_str())),
        ("read_until", Json::String(text)) if text == "eof" => RawParam::Param(Param::lit("eof")),

        (_, Json::String(text)) => RawParam::Param(expr::compile(text)?),
        (_, other) => RawParam::Param(Param::Literal(Value::from(other.clone()))),
    })
}

fn choice_key(key: &str) -> ChoiceKey {
    if key == "default" {
        return ChoiceKey::Default;
    }
    let parsed = match key.strip_prefix("0x") {
        Some(hex) => i128::from_str_radix(hex, 16).ok(),
        None => key.parse::<i128>().ok(),
    };
    match parsed {
        Some(i) => ChoiceKey::Int(i),
        None => ChoiceKey::Str(key.to_string()),
    }
}

/// `{"xor": 255}`, `{"xor": [1, 2, 3]}` or `{"xor": "key"}`
fn transform_factory(spec: &serde_json::Value) -> Result<TransformFactory> {
    let Some(key) = spec.get("xor") else {
        return Err(invalid(format!("unknown transform {}", spec)).into());
    };
    let key: Vec<u8> = match key {
        serde_json::Value::Number(n) => {
            let byte = n
                .as_u64()
                .and_then(|b| u8::try_from(b).ok())
                .ok_or_else(|| invalid(format!("xor key {} is not a byte", n)))?;
            vec![byte]
        }
        serde_json::Value::String(s) => s.as_bytes().to_vec(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|b| {
                b.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| invalid(format!("xor key entry {} is not a byte", b)).into())
            })
            .collect::<Result<Vec<u8>>>()?,
        other => return Err(invalid(format!("bad xor key {}", other)).into()),
    };
    Ok(Arc::new(move |_: &Eval<'_>| -> Result<BoxedTransform> {
        Ok(BoxedTransform::new(Xor::new(key.clone())))
    }))
}

impl SchemaFile {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| invalid(format!("cannot parse schema: {}", e)).into())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading schema from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Registers the declared user types in this file's namespace
    pub fn register_types(&self, registry: &TypeRegistry) -> Result<()> {
        for (name, doc) in &self.types {
            registry.register_named(&self.namespace, name, doc.to_node()?);
        }
        Ok(())
    }

    pub fn root_node(&self) -> Result<SchemaNode> {
        self.root.to_node()
    }

    /// Registers the user types and sanitizes the root
    pub fn sanitize(&self, registry: Arc<TypeRegistry>) -> Result<Arc<Prototype>> {
        self.register_types(&registry)?;
        let root = self.root_node()?;
        Sanitizer::new(registry).sanitize_in_namespace(&root, &self.namespace)
    }
}

/// Parses a schema document against the built-in types
pub fn load_schema(text: &str) -> Result<Arc<Prototype>> {
    SchemaFile::from_json(text)?.sanitize(Arc::new(TypeRegistry::with_builtins()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;
    use crate::types::Record;

    const PACKET: &str = r#"{
        "namespace": "demo",
        "types": {
            "Point": {
                "type": "struct",
                "fields": [
                    { "type": "int8", "name": "x" },
                    { "type": "int8", "name": "y" }
                ]
            }
        },
        "root": {
            "type": "struct",
            "endian": "big",
            "hide": ["count"],
            "fields": [
                { "type": "uint8", "name": "count", "value": "len(points)" },
                { "type": "array", "name": "points", "of": "point", "initial_length": "count" },
                { "type": "uint8", "name": "tag" },
                { "type": "choice", "name": "body", "selection": "tag",
                  "choices": {
                      "1": { "type": "uint16" },
                      "0x2": { "type": "stringz" },
                      "default": { "type": "skip", "length": 1 }
                  } },
                { "type": "uint8", "name": "flags", "assert": "value & 0x80 == 0" },
                { "type": "string", "name": "note", "length": 3, "pad_byte": "'.'",
                  "onlyif": "flags & 1 == 1" }
            ]
        }
    }"#;

    #[test]
    fn test_load_and_read() {
        let proto = load_schema(PACKET).unwrap();
        let data = [2, 1, 2, 0xFF, 0xFE, 1, 0x01, 0x02, 1, b'h', b'i', b'.'];
        let rec = Record::read_from_bytes(&proto, &data).unwrap();
        assert_eq!(rec.get("points[1].x").unwrap(), Value::Int(-1));
        assert_eq!(rec.get("body").unwrap(), Value::Int(0x0102));
        assert_eq!(rec.get("note").unwrap(), Value::from("hi."));
        assert_eq!(rec.field_names(), vec!["points", "tag", "body", "flags", "note"]);
        assert_eq!(rec.to_bytes().unwrap(), data.to_vec());
    }

    #[test]
    fn test_assertion_from_expression() {
        let proto = load_schema(PACKET).unwrap();
        let err = Record::read_from_bytes(&proto, &[0, 3, 0x80]).unwrap_err();
        assert!(err.to_string().starts_with("obj.flags:"), "{}", err);
    }

    #[test]
    fn test_choice_keys() {
        assert_eq!(choice_key("default"), ChoiceKey::Default);
        assert_eq!(choice_key("-3"), ChoiceKey::Int(-3));
        assert_eq!(choice_key("0x10"), ChoiceKey::Int(16));
        assert_eq!(choice_key("abc"), ChoiceKey::Str("abc".into()));
    }

    #[test]
    fn test_unknown_parameter_is_rejected() {
        let err = load_schema(r#"{ "root": { "type": "uint8", "colour": 3 } }"#).unwrap_err();
        assert!(matches!(err, Error::Schema(_)), "{:?}", err);
    }

    #[test]
    fn test_xor_transform() {
        let proto = load_schema(
            r#"{ "root": { "type": "transformed", "transform": { "xor": [15] }, "of": "uint8" } }"#,
        )
        .unwrap();
        let rec = Record::read_from_bytes(&proto, &[0x0A]).unwrap();
        assert_eq!(rec.snapshot().unwrap(), Value::Int(5));

        assert!(transform_factory(&serde_json::json!({ "xor": "key" })).is_ok());
        assert!(transform_factory(&serde_json::json!({ "xor": 300 })).is_err());
        assert!(transform_factory(&serde_json::json!({ "rot13": 1 })).is_err());
    }

    #[test]
    fn test_bad_documents() {
        assert!(matches!(
            load_schema("{ not json"),
            Err(Error::Schema(SchemaError::Invalid(_)))
        ));
        assert!(load_schema(r#"{ "root": { "type": "struct", "fields": 3 } }"#).is_err());
        assert!(matches!(
            load_schema(r#"{ "root": { "type": "uint8", "value": "1 +" } }"#),
            Err(Error::Eval(_))
        ));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{ "root": { "type": "array", "of": "uint8", "read_until": "eof" } }"#,
        )
        .unwrap();
        let schema = SchemaFile::from_path(file.path()).unwrap();
        let proto = schema.sanitize(Arc::new(TypeRegistry::with_builtins())).unwrap();
        let rec = Record::read_from_bytes(&proto, &[4, 5, 6]).unwrap();
        assert_eq!(rec.snapshot().unwrap(), Value::List(vec![4.into(), 5.into(), 6.into()]));
    }
}
