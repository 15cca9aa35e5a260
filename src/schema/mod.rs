// Schema declaration, type registry and sanitization into prototypes

pub mod expr;
pub mod json;
pub mod node;
pub mod prototype;
pub mod registry;
pub mod sanitize;

pub use expr::compile;
pub use json::{load_schema, NodeDoc, SchemaFile};
pub use node::{ChoiceKey, RawParam, SchemaNode, TransformFactory};
pub use prototype::{ArrayMode, Filter, Kind, Prototype};
pub use registry::{Builder, ParamRules, TypeDef, TypeRegistry};
pub use sanitize::Sanitizer;
