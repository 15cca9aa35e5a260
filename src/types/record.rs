// Top-level handle over a data object tree

use super::DataObject;
use crate::core::{parse_path, Mode, Result, Scope, Seg, Value};
use crate::io::BitStream;
use crate::schema::prototype::Prototype;
use std::io::Cursor;
use std::sync::Arc;

/// The outermost object of a schema.
///
/// Reads and writes run from here with a fresh root scope; sizes are rounded
/// up to whole bytes only at this level.
#[derive(Debug)]
pub struct Record {
    proto: Arc<Prototype>,
    root: Box<dyn DataObject>,
}

impl Record {
    pub fn new(proto: &Arc<Prototype>) -> Result<Self> {
        Ok(Self {
            proto: proto.clone(),
            root: proto.instantiate()?,
        })
    }

    /// Builds a record and reads it from `data`
    pub fn read_from_bytes(proto: &Arc<Prototype>, data: &[u8]) -> Result<Self> {
        let mut record = Self::new(proto)?;
        let mut io = BitStream::from_bytes(data);
        record.read(&mut io)?;
        Ok(record)
    }

    pub fn prototype(&self) -> &Arc<Prototype> {
        &self.proto
    }

    pub fn root(&self) -> &dyn DataObject {
        &*self.root
    }

    pub fn root_mut(&mut self) -> &mut dyn DataObject {
        &mut *self.root
    }

    /// Clears the tree and reads it from `io`. A trailing partial byte is
    /// dropped so the stream is left byte aligned.
    pub fn read(&mut self, io: &mut BitStream<'_>) -> Result<()> {
        self.root.clear();
        let scope = Scope::root(Mode::Reading);
        self.root.read(io, &scope)?;
        io.discard_bits();
        Ok(())
    }

    /// Writes the tree to `io`, zero-padding a trailing partial byte
    pub fn write(&self, io: &mut BitStream<'_>) -> Result<()> {
        let scope = Scope::root(Mode::Writing);
        self.root.write(io, &scope)?;
        io.flush_bits()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut io = BitStream::writer(Cursor::new(&mut buf))?;
            self.write(&mut io)?;
            io.close()?;
        }
        Ok(buf)
    }

    pub fn snapshot(&self) -> Result<Value> {
        self.root.snapshot(&Scope::root(Mode::Idle))
    }

    pub fn assign(&mut self, value: &Value) -> Result<()> {
        self.root.assign(value, &Scope::root(Mode::Idle))
    }

    /// Value at a path such as `header.items[2]`; "" is the whole record
    pub fn get(&self, path: &str) -> Result<Value> {
        self.root.value_at(&parse_path(path)?, &Scope::root(Mode::Idle))
    }

    /// Assigns at a path. Indexing past the end of an array extends it.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let path = parse_path(path)?;
        self.root
            .assign_at(&path, &value.into(), &Scope::root(Mode::Idle))
    }

    pub fn clear(&mut self) {
        self.root.clear();
    }

    pub fn is_clear(&self) -> bool {
        self.root.is_clear()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.root.field_names()
    }

    pub fn num_bits(&self) -> Result<u64> {
        self.root.end_bit(0, &Scope::root(Mode::Idle))
    }

    pub fn num_bytes(&self) -> Result<u64> {
        Ok(self.num_bits()?.div_ceil(8))
    }

    /// Bit offset of the object at `path` from the start of the record
    pub fn bit_offset(&self, path: &str) -> Result<u64> {
        self.root
            .bit_offset_of(&parse_path(path)?, 0, &Scope::root(Mode::Idle))
    }

    /// Byte offset of the object at `path` from the start of the record
    pub fn abs_offset(&self, path: &str) -> Result<u64> {
        Ok(self.bit_offset(path)? / 8)
    }

    /// Byte offset of the object at `path` from the start of its parent
    pub fn rel_offset(&self, path: &str) -> Result<u64> {
        let segs = parse_path(path)?;
        let scope = Scope::root(Mode::Idle);
        let parent: &[Seg] = segs.split_last().map_or(&[], |(_, parent)| parent);
        let own = self.root.bit_offset_of(&segs, 0, &scope)?;
        let base = self.root.bit_offset_of(parent, 0, &scope)?;
        Ok((own - base) / 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Error, Param, ValidityError};
    use crate::io::StreamConfig;
    use crate::schema::{Sanitizer, SchemaNode, TypeRegistry};
    use proptest::prelude::*;
    use std::io::{Seek, SeekFrom, Write};

    fn sanitizer() -> Sanitizer {
        Sanitizer::new(Arc::new(TypeRegistry::with_builtins()))
    }

    fn packet() -> SchemaNode {
        SchemaNode::new("struct")
            .with("endian", "little")
            .field(SchemaNode::new("uint16").named("magic").with("asserted_value", 0xCAFE))
            .field(
                SchemaNode::new("uint8")
                    .named("len")
                    .with("value", Param::parse("len(payload)").unwrap()),
            )
            .field(
                SchemaNode::new("string")
                    .named("payload")
                    .with("read_length", Param::reference("len")),
            )
            .field(SchemaNode::new("bit3").named("kind"))
            .field(SchemaNode::new("bit5").named("prio"))
            .field(
                SchemaNode::new("array")
                    .named("words")
                    .with("type", "int16")
                    .with("initial_length", 2),
            )
    }

    #[test]
    fn test_round_trip() {
        let proto = sanitizer().sanitize(&packet()).unwrap();
        let mut rec = Record::new(&proto).unwrap();
        rec.set("payload", "hey").unwrap();
        rec.set("kind", 5).unwrap();
        rec.set("prio", 17).unwrap();
        rec.set("words[1]", -2).unwrap();

        let bytes = rec.to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![0xFE, 0xCA, 3, b'h', b'e', b'y', 0b1000_1101, 0, 0, 0xFE, 0xFF]
        );
        assert_eq!(rec.num_bytes().unwrap(), bytes.len() as u64);

        let back = Record::read_from_bytes(&proto, &bytes).unwrap();
        assert_eq!(back.snapshot().unwrap(), rec.snapshot().unwrap());
        assert_eq!(back.get("len").unwrap(), Value::Int(3));
        assert_eq!(back.abs_offset("words[1]").unwrap(), 9);
        assert_eq!(back.rel_offset("words[1]").unwrap(), 2);
        assert_eq!(back.bit_offset("prio").unwrap(), 51);
    }

    #[test]
    fn test_snapshot_json() {
        let proto = sanitizer().sanitize(&packet()).unwrap();
        let mut rec = Record::new(&proto).unwrap();
        rec.set("payload", "ab").unwrap();
        let json = serde_json::to_string(&rec.snapshot().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"magic":51966,"len":2,"payload":"ab","kind":0,"prio":0,"words":[0,0]}"#
        );
    }

    #[test]
    fn test_assertion_failure_has_path() {
        let proto = sanitizer().sanitize(&packet()).unwrap();
        let err = Record::read_from_bytes(&proto, &[0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        match &err {
            Error::Validity { path, error } => {
                assert_eq!(path, &vec!["magic".to_string()]);
                assert!(matches!(error, ValidityError::AssertionFailed { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.to_string().starts_with("obj.magic:"));
    }

    #[test]
    fn test_nested_validity_path() {
        let proto = sanitizer()
            .sanitize(
                &SchemaNode::new("struct").field(
                    SchemaNode::new("array")
                        .named("items")
                        .with("initial_length", 3)
                        .with(
                            "type",
                            SchemaNode::new("struct")
                                .field(SchemaNode::new("uint8").named("v").with("assert", 1)),
                        ),
                ),
            )
            .unwrap();
        let err = Record::read_from_bytes(&proto, &[1, 1, 2]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "obj.items[2].v: value 2 failed assertion (expected 1)"
        );
    }

    #[test]
    fn test_recursive_bit_packed_type() {
        let registry = Arc::new(TypeRegistry::with_builtins());
        registry.register_named(
            "",
            "b_node",
            SchemaNode::new("struct")
                .field(SchemaNode::new("bit1").named("has_child"))
                .field(SchemaNode::new("bit3").named("v"))
                .field(
                    SchemaNode::new("b_node")
                        .named("child")
                        .with("onlyif", Param::reference("has_child")),
                ),
        );
        let proto = Sanitizer::new(registry)
            .sanitize(&SchemaNode::new("b_node"))
            .unwrap();

        let rec = Record::read_from_bytes(&proto, &[0b1001_0011]).unwrap();
        assert_eq!(rec.get("v").unwrap(), Value::Int(1));
        assert_eq!(rec.get("child.v").unwrap(), Value::Int(3));
        assert_eq!(rec.num_bytes().unwrap(), 1);
        assert_eq!(rec.to_bytes().unwrap(), vec![0b1001_0011]);
        assert_eq!(rec.bit_offset("child.v").unwrap(), 5);
    }

    #[test]
    fn test_recursive_schema_depth() {
        let handle = std::thread::Builder::new()
            .stack_size(8 * 1024 * 1024)
            .spawn(|| {
                let registry = Arc::new(TypeRegistry::with_builtins());
                registry.register_named(
                    "",
                    "TreeNode",
                    SchemaNode::new("struct")
                        .field(SchemaNode::new("uint8").named("val"))
                        .field(SchemaNode::new("uint8").named("has_child"))
                        .field(
                            SchemaNode::new("tree_node")
                                .named("child")
                                .with("onlyif", Param::reference("has_child")),
                        ),
                );
                let sanitizer = Sanitizer::new(registry);
                let proto = sanitizer.sanitize(&SchemaNode::new("TreeNode")).unwrap();

                let depth = 1000;
                let mut data = Vec::new();
                for i in 0..depth {
                    data.push((i % 256) as u8);
                    data.push(u8::from(i + 1 < depth));
                }
                let rec = Record::read_from_bytes(&proto, &data).unwrap();
                assert_eq!(rec.num_bytes().unwrap(), 2 * depth as u64);
                assert_eq!(rec.to_bytes().unwrap(), data);

                let path = format!("{}val", "child.".repeat(depth - 1));
                assert_eq!(rec.get(&path).unwrap(), Value::Int(((depth - 1) % 256) as i128));
                assert_eq!(sanitizer.cached_types(), 1);
            })
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_file_backed_streams() {
        let proto = sanitizer().sanitize(&packet()).unwrap();
        let mut rec = Record::new(&proto).unwrap();
        rec.set("payload", "file").unwrap();

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"HDR").unwrap();
        {
            let mut io = BitStream::writer(&mut file).unwrap();
            rec.write(&mut io).unwrap();
            assert_eq!(io.offset().unwrap(), rec.num_bytes().unwrap());
            io.close().unwrap();
        }

        file.seek(SeekFrom::Start(3)).unwrap();
        let mut io = BitStream::reader(&mut file).unwrap();
        let mut back = Record::new(&proto).unwrap();
        back.read(&mut io).unwrap();
        assert_eq!(back.get("payload").unwrap(), Value::from("file"));
        assert_eq!(io.bytes_remaining().unwrap(), 0);
    }

    #[test]
    fn test_unseekable_reader_with_small_chunks() {
        let proto = sanitizer()
            .sanitize(
                &SchemaNode::new("struct")
                    .field(SchemaNode::new("skip").with("length", 40))
                    .field(SchemaNode::new("uint8").named("x")),
            )
            .unwrap();
        let mut data = vec![0u8; 40];
        data.push(77);
        let mut io = BitStream::unseekable_reader(&data[..])
            .with_config(StreamConfig::new().with_chunk_size(3));
        let mut rec = Record::new(&proto).unwrap();
        rec.read(&mut io).unwrap();
        assert_eq!(rec.get("x").unwrap(), Value::Int(77));
    }

    /// A struct member in a generated layout
    #[derive(Debug, Clone)]
    enum Part {
        Bits(u32),
        Byte,
        Nested(Vec<Part>),
    }

    fn part() -> impl Strategy<Value = Part> {
        let leaf = prop_oneof![(1u32..8).prop_map(Part::Bits), Just(Part::Byte)];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop::collection::vec(inner, 1..4).prop_map(Part::Nested)
        })
    }

    fn layout(parts: &[Part]) -> SchemaNode {
        parts
            .iter()
            .enumerate()
            .fold(SchemaNode::new("struct"), |node, (index, part)| {
                let field = match part {
                    Part::Bits(n) => SchemaNode::new(format!("bit{}", n)),
                    Part::Byte => SchemaNode::new("uint8"),
                    Part::Nested(inner) => layout(inner),
                };
                node.field(field.named(format!("f{}", index)))
            })
    }

    proptest! {
        #[test]
        fn prop_mixed_layout_size_matches_encoding(parts in prop::collection::vec(part(), 1..6)) {
            let proto = sanitizer().sanitize(&layout(&parts)).unwrap();
            let rec = Record::new(&proto).unwrap();
            let bytes = rec.to_bytes().unwrap();
            prop_assert_eq!(rec.num_bytes().unwrap(), bytes.len() as u64);

            let back = Record::read_from_bytes(&proto, &bytes).unwrap();
            prop_assert_eq!(back.num_bytes().unwrap(), bytes.len() as u64);
            prop_assert_eq!(back.to_bytes().unwrap(), bytes);
        }

        #[test]
        fn prop_bit_fields_round_trip(a in 0u8..8, b in 0u16..4096, c in 0u8..32) {
            let proto = sanitizer()
                .sanitize(
                    &SchemaNode::new("struct")
                        .field(SchemaNode::new("bit3").named("a"))
                        .field(SchemaNode::new("bit12").named("b"))
                        .field(SchemaNode::new("bit5").named("c")),
                )
                .unwrap();
            let mut rec = Record::new(&proto).unwrap();
            rec.set("a", a).unwrap();
            rec.set("b", b).unwrap();
            rec.set("c", c).unwrap();
            let bytes = rec.to_bytes().unwrap();
            prop_assert_eq!(bytes.len(), 3);

            let back = Record::read_from_bytes(&proto, &bytes).unwrap();
            prop_assert_eq!(back.get("a").unwrap(), Value::from(a));
            prop_assert_eq!(back.get("b").unwrap(), Value::from(b));
            prop_assert_eq!(back.get("c").unwrap(), Value::from(c));
        }
    }
}
