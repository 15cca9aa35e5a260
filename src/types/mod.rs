// Data objects: runtime instances built from sanitized prototypes

pub mod array;
pub mod buffer;
pub mod choice;
pub mod codec;
pub mod float;
pub mod int;
pub mod misc;
pub mod primitive;
pub mod record;
pub mod string;
pub mod structs;

pub use array::ArrayObj;
pub use buffer::BufferObj;
pub use choice::ChoiceObj;
pub use codec::{BitAligned, Codec, CodecCtx};
pub use primitive::PrimitiveObj;
pub use record::Record;
pub use structs::StructObj;

use crate::core::{Probe, Result, Scope, Seg, UsageError, Value};
use crate::core::error::mismatch;
use crate::io::BitStream;
use crate::schema::prototype::{Kind, Prototype};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A child position that is instantiated on first use
pub type Slot = Option<Box<dyn DataObject>>;

/// The protocol every data object implements.
///
/// `scope` is always the scope the object's own parameters are evaluated in,
/// i.e. the frame of whatever contains it.
pub trait DataObject: fmt::Debug + Any {
    fn prototype(&self) -> &Arc<Prototype>;

    /// Resets to the freshly instantiated state
    fn clear(&mut self);

    fn is_clear(&self) -> bool;

    /// Sets the object from a plain value. Null is rejected.
    fn assign(&mut self, value: &Value, scope: &Scope<'_>) -> Result<()>;

    fn read(&mut self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()>;

    fn write(&self, io: &mut BitStream<'_>, scope: &Scope<'_>) -> Result<()>;

    /// Stream position, in bits, just past this object when it starts at
    /// absolute bit position `start`. Byte-aligned content rounds up from
    /// `start` exactly as the writer pads.
    fn end_bit(&self, start: u64, scope: &Scope<'_>) -> Result<u64>;

    /// Position of this object's first bit when it starts at `start`
    fn begin_bit(&self, start: u64, _scope: &Scope<'_>) -> Result<u64> {
        Ok(start)
    }

    /// Encoded size in bits, starting on a byte boundary
    fn num_bits(&self, scope: &Scope<'_>) -> Result<u64> {
        self.end_bit(0, scope)
    }

    fn snapshot(&self, scope: &Scope<'_>) -> Result<Value>;

    /// Value seen by expressions referring to this object
    fn value(&self, scope: &Scope<'_>) -> Result<Value> {
        self.snapshot(scope)
    }

    /// True for objects holding a single primitive value
    fn is_scalar(&self) -> bool {
        false
    }

    fn len(&self, scope: &Scope<'_>) -> Result<usize> {
        let value = self.value(scope)?;
        value.len().ok_or_else(|| mismatch("collection", &value))
    }

    fn element_value(&self, index: i64, scope: &Scope<'_>) -> Result<Value> {
        Probe::At(index).apply_value(&self.value(scope)?)
    }

    /// Resolves a name this object contributes to its parent's namespace
    fn lookup_spliced(&self, _name: &str, _probe: Probe, _scope: &Scope<'_>) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Externally visible child names
    fn field_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn value_at(&self, path: &[Seg], scope: &Scope<'_>) -> Result<Value> {
        match path {
            [] => self.value(scope),
            [seg, ..] => Err(UsageError::InvalidPath(seg.to_string()).into()),
        }
    }

    fn assign_at(&mut self, path: &[Seg], value: &Value, scope: &Scope<'_>) -> Result<()> {
        match path {
            [] => self.assign(value, scope),
            [seg, ..] => Err(UsageError::InvalidPath(seg.to_string()).into()),
        }
    }

    /// Absolute bit position of the object at `path`, given that this object
    /// starts at `start`
    fn bit_offset_of(&self, path: &[Seg], start: u64, scope: &Scope<'_>) -> Result<u64> {
        match path {
            [] => self.begin_bit(start, scope),
            [seg, ..] => Err(UsageError::InvalidPath(seg.to_string()).into()),
        }
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Builds a fresh, cleared object for `proto`
pub fn instantiate(proto: &Arc<Prototype>) -> Result<Box<dyn DataObject>> {
    Ok(match &proto.kind {
        Kind::Primitive { codec } => Box::new(PrimitiveObj::new(proto.clone(), codec.clone())),
        Kind::Struct(_) => Box::new(StructObj::new(proto.clone())),
        Kind::Array { element, .. } => Box::new(ArrayObj::new(proto.clone(), element.clone())),
        Kind::Choice { choices, .. } => Box::new(ChoiceObj::new(proto.clone(), choices.len())),
        Kind::Buffer { inner, .. } => Box::new(BufferObj::new(proto.clone(), inner.clone())),
        Kind::Deferred(deferred) => {
            let resolved = deferred.resolve()?;
            return instantiate(&resolved);
        }
    })
}

/// Runs `f` on the object in `slot`, or on a transient default when the
/// slot has not been instantiated yet.
pub(crate) fn with_slot<R>(
    slot: &Slot,
    proto: &Arc<Prototype>,
    f: impl FnOnce(&dyn DataObject) -> Result<R>,
) -> Result<R> {
    match slot {
        Some(obj) => f(&**obj),
        None => {
            let fresh = instantiate(proto)?;
            f(&*fresh)
        }
    }
}

/// The object in `slot`, instantiating it first if needed
pub(crate) fn slot_mut<'s>(slot: &'s mut Slot, proto: &Arc<Prototype>) -> Result<&'s mut Box<dyn DataObject>> {
    let obj = match slot.take() {
        Some(obj) => obj,
        None => instantiate(proto)?,
    };
    Ok(slot.insert(obj))
}

/// Rounds a bit count up to the next byte boundary
pub(crate) fn round_to_byte(bits: u64) -> u64 {
    bits.div_ceil(8) * 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_byte() {
        assert_eq!(round_to_byte(0), 0);
        assert_eq!(round_to_byte(1), 8);
        assert_eq!(round_to_byte(8), 8);
        assert_eq!(round_to_byte(13), 16);
    }
}
