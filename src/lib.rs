// bitform: declarative binary format codec
//
// Schemas are declared as `SchemaNode` trees (or JSON documents), sanitized
// once into shareable prototypes, and instantiated as data objects that read,
// write and size themselves against a bit-addressable stream.

pub mod core;
pub mod io;
pub mod schema;
pub mod types;

// Re-export commonly used types
pub use core::{Error, Param, Result, Value};
pub use io::{BitStream, Endian, StreamConfig, Transform};
pub use schema::{load_schema, SchemaFile, SchemaNode, Sanitizer, TypeRegistry};
pub use types::{DataObject, Record};

/// bitform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_prototypes_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<schema::Prototype>();
        assert_send_sync::<TypeRegistry>();

        let proto = Sanitizer::new(Arc::new(TypeRegistry::with_builtins()))
            .sanitize(&SchemaNode::new("uint16be"))
            .unwrap();
        let handle = {
            let proto = proto.clone();
            std::thread::spawn(move || Record::read_from_bytes(&proto, &[1, 2]).unwrap().snapshot().unwrap())
        };
        assert_eq!(handle.join().unwrap(), Value::Int(0x0102));
    }
}
