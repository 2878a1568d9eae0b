//! # Marshaller Contract
//!
//! Every data structure variant implements [`Marshal`]: two tight passes, a
//! tight unmarshal, and a loose marshal/unmarshal pair. The registry stores
//! each variant behind the object-safe [`DataStreamMarshaller`] so the wire
//! format can dispatch on a type code read off the wire.
//!
//! ## Field ordering
//! The tight encoding has no field tags. Pass one records presence bits in
//! visiting order, pass two replays them in the same order while writing
//! bytes, and the decoder consumes them in the same order again. A variant's
//! field order is therefore part of the wire protocol and changes only with
//! a protocol version bump.
//!
//! ## Shared field encodings
//! | field            | tight bits              | tight bytes                   | loose bytes                     |
//! |------------------|-------------------------|-------------------------------|---------------------------------|
//! | base header      | response_required       | command_id (4)                | command_id (4), flag (1)        |
//! | bool             | value                   | none                          | value (1)                       |
//! | long             | width class (2 bits)    | 0, 2, 4 or 8                  | 8                               |
//! | string           | present, ascii          | len (2) + bytes               | present (1), len (2) + bytes    |
//! | byte sequence    | present                 | len (4) + bytes               | present (1), len (4) + bytes    |
//! | nested object    | present, nested bits    | type (1) + nested bytes       | present (1), type (1) + nested  |
//! | cached object    | full encoding follows   | index (2) [+ nested object]   | full (1), index (2) [+ nested]  |
//! | object array     | present                 | count (2) + nested objects    | present (1), count (2) + nested |

use std::marker::PhantomData;

use crate::core::boolean_stream::BooleanStream;
use crate::core::data_stream::{DataInput, DataOutput};
use crate::error::{ProtocolError, Result};
use crate::openwire::cache::NOT_CACHED;
use crate::openwire::command::{
    BaseCommand, BrokerError, DataStructure, StackTraceElement, StructureRef, Variant,
};
use crate::openwire::wire_format::OpenWireFormat;

/// Per-variant marshalling logic
pub trait Marshal: Variant + Default + Into<DataStructure> + Send + Sync + 'static {
    /// Pass one: record presence bits, return the byte count pass two writes
    fn tight_marshal1(&self, wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize>;

    /// Pass two: replay the bits from pass one and write the bytes
    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()>;

    fn tight_unmarshal(
        &mut self,
        wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()>;

    fn loose_marshal(&self, wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()>;

    fn loose_unmarshal(&mut self, wf: &mut OpenWireFormat, input: &mut DataInput<'_>)
        -> Result<()>;
}

/// Object-safe marshaller stored in the registry
pub trait DataStreamMarshaller: Send + Sync {
    fn data_structure_type(&self) -> u8;

    /// Zero-valued instance to populate while decoding
    fn create_object(&self) -> DataStructure;

    fn tight_marshal1(
        &self,
        wf: &mut OpenWireFormat,
        o: &DataStructure,
        bs: &mut BooleanStream,
    ) -> Result<usize>;

    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        o: &DataStructure,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()>;

    fn tight_unmarshal(
        &self,
        wf: &mut OpenWireFormat,
        o: &mut DataStructure,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()>;

    fn loose_marshal(
        &self,
        wf: &mut OpenWireFormat,
        o: &DataStructure,
        out: &mut DataOutput,
    ) -> Result<()>;

    fn loose_unmarshal(
        &self,
        wf: &mut OpenWireFormat,
        o: &mut DataStructure,
        input: &mut DataInput<'_>,
    ) -> Result<()>;
}

/// Adapts a concrete [`Marshal`] type to [`DataStreamMarshaller`]
pub struct TypedMarshaller<T>(PhantomData<fn() -> T>);

impl<T> TypedMarshaller<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

fn unexpected<T: Variant>(o: &DataStructure) -> ProtocolError {
    ProtocolError::UnexpectedType {
        expected: T::NAME,
        found: o.data_structure_type(),
    }
}

impl<T: Marshal> DataStreamMarshaller for TypedMarshaller<T> {
    fn data_structure_type(&self) -> u8 {
        T::TYPE
    }

    fn create_object(&self) -> DataStructure {
        T::default().into()
    }

    fn tight_marshal1(
        &self,
        wf: &mut OpenWireFormat,
        o: &DataStructure,
        bs: &mut BooleanStream,
    ) -> Result<usize> {
        T::as_variant(o)
            .ok_or_else(|| unexpected::<T>(o))?
            .tight_marshal1(wf, bs)
    }

    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        o: &DataStructure,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        T::as_variant(o)
            .ok_or_else(|| unexpected::<T>(o))?
            .tight_marshal2(wf, out, bs)
    }

    fn tight_unmarshal(
        &self,
        wf: &mut OpenWireFormat,
        o: &mut DataStructure,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        let found = o.data_structure_type();
        T::as_variant_mut(o)
            .ok_or(ProtocolError::UnexpectedType {
                expected: T::NAME,
                found,
            })?
            .tight_unmarshal(wf, input, bs)
    }

    fn loose_marshal(
        &self,
        wf: &mut OpenWireFormat,
        o: &DataStructure,
        out: &mut DataOutput,
    ) -> Result<()> {
        T::as_variant(o)
            .ok_or_else(|| unexpected::<T>(o))?
            .loose_marshal(wf, out)
    }

    fn loose_unmarshal(
        &self,
        wf: &mut OpenWireFormat,
        o: &mut DataStructure,
        input: &mut DataInput<'_>,
    ) -> Result<()> {
        let found = o.data_structure_type();
        T::as_variant_mut(o)
            .ok_or(ProtocolError::UnexpectedType {
                expected: T::NAME,
                found,
            })?
            .loose_unmarshal(wf, input)
    }
}

// ---------------------------------------------------------------------------
// Base command header
// ---------------------------------------------------------------------------

pub(crate) fn tight_marshal_base1(base: &BaseCommand, bs: &mut BooleanStream) -> Result<usize> {
    bs.write_boolean(base.response_required)?;
    Ok(4)
}

pub(crate) fn tight_marshal_base2(
    base: &BaseCommand,
    out: &mut DataOutput,
    bs: &mut BooleanStream,
) -> Result<()> {
    out.write_i32(base.command_id);
    bs.read_boolean()?;
    Ok(())
}

pub(crate) fn tight_unmarshal_base(
    base: &mut BaseCommand,
    input: &mut DataInput<'_>,
    bs: &mut BooleanStream,
) -> Result<()> {
    base.command_id = input.read_i32()?;
    base.response_required = bs.read_boolean()?;
    Ok(())
}

pub(crate) fn loose_marshal_base(base: &BaseCommand, out: &mut DataOutput) {
    out.write_i32(base.command_id);
    out.write_bool(base.response_required);
}

pub(crate) fn loose_unmarshal_base(base: &mut BaseCommand, input: &mut DataInput<'_>) -> Result<()> {
    base.command_id = input.read_i32()?;
    base.response_required = input.read_bool()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Cached objects
// ---------------------------------------------------------------------------

pub(crate) fn tight_marshal_cached1(
    wf: &mut OpenWireFormat,
    kind: FieldKind,
    o: Option<&StructureRef>,
    bs: &mut BooleanStream,
) -> Result<usize> {
    if let Some(o) = o {
        kind.check(o)?;
    }
    if !wf.is_cache_enabled() {
        return tight_marshal_nested1(wf, o.map(|o| o.as_ref()), bs);
    }
    // a null field is never cached; it travels as a full (null) encoding
    let cached = o.and_then(|o| wf.marshal_cache().index_of(o));
    bs.write_boolean(cached.is_none())?;
    if cached.is_some() {
        return Ok(2);
    }
    let rc = tight_marshal_nested1(wf, o.map(|o| o.as_ref()), bs)?;
    if let Some(o) = o {
        wf.marshal_cache_mut().put(o);
    }
    Ok(2 + rc)
}

pub(crate) fn tight_marshal_cached2(
    wf: &mut OpenWireFormat,
    o: Option<&StructureRef>,
    out: &mut DataOutput,
    bs: &mut BooleanStream,
) -> Result<()> {
    if !wf.is_cache_enabled() {
        return tight_marshal_nested2(wf, o.map(|o| o.as_ref()), out, bs);
    }
    let index = o
        .and_then(|o| wf.marshal_cache().index_of(o))
        .unwrap_or(NOT_CACHED);
    out.write_i16(index);
    if bs.read_boolean()? {
        tight_marshal_nested2(wf, o.map(|o| o.as_ref()), out, bs)?;
    }
    Ok(())
}

pub(crate) fn tight_unmarshal_cached(
    wf: &mut OpenWireFormat,
    input: &mut DataInput<'_>,
    bs: &mut BooleanStream,
) -> Result<Option<StructureRef>> {
    if !wf.is_cache_enabled() {
        return Ok(tight_unmarshal_nested(wf, input, bs)?.map(DataStructure::shared));
    }
    if bs.read_boolean()? {
        let index = input.read_i16()?;
        let object = tight_unmarshal_nested(wf, input, bs)?.map(DataStructure::shared);
        if let Some(object) = &object {
            wf.unmarshal_cache_mut().set(index, StructureRef::clone(object))?;
        }
        Ok(object)
    } else {
        let index = input.read_i16()?;
        wf.unmarshal_cache().get(index).map(Some)
    }
}

pub(crate) fn loose_marshal_cached(
    wf: &mut OpenWireFormat,
    kind: FieldKind,
    o: Option<&StructureRef>,
    out: &mut DataOutput,
) -> Result<()> {
    if let Some(o) = o {
        kind.check(o)?;
    }
    if !wf.is_cache_enabled() {
        return loose_marshal_nested(wf, o.map(|o| o.as_ref()), out);
    }
    match o.and_then(|o| wf.marshal_cache().index_of(o)) {
        Some(index) => {
            out.write_bool(false);
            out.write_i16(index);
        }
        None => {
            let index = match o {
                Some(o) => wf.marshal_cache_mut().put(o),
                None => NOT_CACHED,
            };
            out.write_bool(true);
            out.write_i16(index);
            loose_marshal_nested(wf, o.map(|o| o.as_ref()), out)?;
        }
    }
    Ok(())
}

pub(crate) fn loose_unmarshal_cached(
    wf: &mut OpenWireFormat,
    input: &mut DataInput<'_>,
) -> Result<Option<StructureRef>> {
    if !wf.is_cache_enabled() {
        return Ok(loose_unmarshal_nested(wf, input)?.map(DataStructure::shared));
    }
    if input.read_bool()? {
        let index = input.read_i16()?;
        let object = loose_unmarshal_nested(wf, input)?.map(DataStructure::shared);
        if let Some(object) = &object {
            wf.unmarshal_cache_mut().set(index, StructureRef::clone(object))?;
        }
        Ok(object)
    } else {
        let index = input.read_i16()?;
        wf.unmarshal_cache().get(index).map(Some)
    }
}

/// The type codes a cached field may hold
#[derive(Clone, Copy)]
pub(crate) struct FieldKind {
    pub name: &'static str,
    pub accept: fn(&DataStructure) -> bool,
}

impl FieldKind {
    fn check(self, o: &DataStructure) -> Result<()> {
        if (self.accept)(o) {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedType {
                expected: self.name,
                found: o.data_structure_type(),
            })
        }
    }
}

/// Check that a decoded cached field holds one of the accepted type codes
pub(crate) fn expect_kind(
    field: Option<StructureRef>,
    kind: FieldKind,
) -> Result<Option<StructureRef>> {
    if let Some(o) = &field {
        kind.check(o)?;
    }
    Ok(field)
}

// ---------------------------------------------------------------------------
// Nested objects
// ---------------------------------------------------------------------------

pub(crate) fn tight_marshal_nested1(
    wf: &mut OpenWireFormat,
    o: Option<&DataStructure>,
    bs: &mut BooleanStream,
) -> Result<usize> {
    bs.write_boolean(o.is_some())?;
    let Some(o) = o else {
        return Ok(0);
    };
    let marshaller = wf.registry().get(o.data_structure_type())?;
    wf.enter_nested()?;
    let rc = marshaller.tight_marshal1(wf, o, bs)?;
    wf.exit_nested();
    Ok(1 + rc)
}

pub(crate) fn tight_marshal_nested2(
    wf: &mut OpenWireFormat,
    o: Option<&DataStructure>,
    out: &mut DataOutput,
    bs: &mut BooleanStream,
) -> Result<()> {
    if !bs.read_boolean()? {
        return Ok(());
    }
    let o = o.ok_or(ProtocolError::InvalidData("Presence bit set for a null field"))?;
    let marshaller = wf.registry().get(o.data_structure_type())?;
    out.write_u8(o.data_structure_type());
    marshaller.tight_marshal2(wf, o, out, bs)
}

pub(crate) fn tight_unmarshal_nested(
    wf: &mut OpenWireFormat,
    input: &mut DataInput<'_>,
    bs: &mut BooleanStream,
) -> Result<Option<DataStructure>> {
    if !bs.read_boolean()? {
        return Ok(None);
    }
    let marshaller = wf.registry().get(input.read_u8()?)?;
    let mut object = marshaller.create_object();
    wf.enter_nested()?;
    marshaller.tight_unmarshal(wf, &mut object, input, bs)?;
    wf.exit_nested();
    Ok(Some(object))
}

pub(crate) fn loose_marshal_nested(
    wf: &mut OpenWireFormat,
    o: Option<&DataStructure>,
    out: &mut DataOutput,
) -> Result<()> {
    out.write_bool(o.is_some());
    let Some(o) = o else {
        return Ok(());
    };
    let marshaller = wf.registry().get(o.data_structure_type())?;
    out.write_u8(o.data_structure_type());
    wf.enter_nested()?;
    marshaller.loose_marshal(wf, o, out)?;
    wf.exit_nested();
    Ok(())
}

pub(crate) fn loose_unmarshal_nested(
    wf: &mut OpenWireFormat,
    input: &mut DataInput<'_>,
) -> Result<Option<DataStructure>> {
    if !input.read_bool()? {
        return Ok(None);
    }
    let marshaller = wf.registry().get(input.read_u8()?)?;
    let mut object = marshaller.create_object();
    wf.enter_nested()?;
    marshaller.loose_unmarshal(wf, &mut object, input)?;
    wf.exit_nested();
    Ok(Some(object))
}

// Typed nested objects: same wire layout, but the decoded type code must
// match `T`.

pub(crate) fn tight_marshal_typed1<T: Marshal>(
    wf: &mut OpenWireFormat,
    o: Option<&T>,
    bs: &mut BooleanStream,
) -> Result<usize> {
    bs.write_boolean(o.is_some())?;
    let Some(o) = o else {
        return Ok(0);
    };
    wf.enter_nested()?;
    let rc = o.tight_marshal1(wf, bs)?;
    wf.exit_nested();
    Ok(1 + rc)
}

pub(crate) fn tight_marshal_typed2<T: Marshal>(
    wf: &mut OpenWireFormat,
    o: Option<&T>,
    out: &mut DataOutput,
    bs: &mut BooleanStream,
) -> Result<()> {
    if !bs.read_boolean()? {
        return Ok(());
    }
    let o = o.ok_or(ProtocolError::InvalidData("Presence bit set for a null field"))?;
    out.write_u8(T::TYPE);
    o.tight_marshal2(wf, out, bs)
}

fn check_typed<T: Marshal>(found: u8) -> Result<()> {
    if found == T::TYPE {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedType {
            expected: T::NAME,
            found,
        })
    }
}

pub(crate) fn tight_unmarshal_typed<T: Marshal>(
    wf: &mut OpenWireFormat,
    input: &mut DataInput<'_>,
    bs: &mut BooleanStream,
) -> Result<Option<T>> {
    if !bs.read_boolean()? {
        return Ok(None);
    }
    check_typed::<T>(input.read_u8()?)?;
    let mut object = T::default();
    wf.enter_nested()?;
    object.tight_unmarshal(wf, input, bs)?;
    wf.exit_nested();
    Ok(Some(object))
}

pub(crate) fn loose_marshal_typed<T: Marshal>(
    wf: &mut OpenWireFormat,
    o: Option<&T>,
    out: &mut DataOutput,
) -> Result<()> {
    out.write_bool(o.is_some());
    if let Some(o) = o {
        out.write_u8(T::TYPE);
        wf.enter_nested()?;
        o.loose_marshal(wf, out)?;
        wf.exit_nested();
    }
    Ok(())
}

pub(crate) fn loose_unmarshal_typed<T: Marshal>(
    wf: &mut OpenWireFormat,
    input: &mut DataInput<'_>,
) -> Result<Option<T>> {
    if !input.read_bool()? {
        return Ok(None);
    }
    check_typed::<T>(input.read_u8()?)?;
    let mut object = T::default();
    wf.enter_nested()?;
    object.loose_unmarshal(wf, input)?;
    wf.exit_nested();
    Ok(Some(object))
}

// ---------------------------------------------------------------------------
// Object arrays
// ---------------------------------------------------------------------------

fn array_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| ProtocolError::InvalidData("Object array longer than 65535"))
}

pub(crate) fn tight_marshal_array1<T: Marshal>(
    wf: &mut OpenWireFormat,
    objects: Option<&[T]>,
    bs: &mut BooleanStream,
) -> Result<usize> {
    bs.write_boolean(objects.is_some())?;
    let Some(objects) = objects else {
        return Ok(0);
    };
    array_len(objects.len())?;
    let mut rc = 2;
    for o in objects {
        rc += tight_marshal_typed1(wf, Some(o), bs)?;
    }
    Ok(rc)
}

pub(crate) fn tight_marshal_array2<T: Marshal>(
    wf: &mut OpenWireFormat,
    objects: Option<&[T]>,
    out: &mut DataOutput,
    bs: &mut BooleanStream,
) -> Result<()> {
    if !bs.read_boolean()? {
        return Ok(());
    }
    let objects = objects.unwrap_or_default();
    out.write_u16(array_len(objects.len())?);
    for o in objects {
        tight_marshal_typed2(wf, Some(o), out, bs)?;
    }
    Ok(())
}

pub(crate) fn tight_unmarshal_array<T: Marshal>(
    wf: &mut OpenWireFormat,
    input: &mut DataInput<'_>,
    bs: &mut BooleanStream,
) -> Result<Option<Vec<T>>> {
    if !bs.read_boolean()? {
        return Ok(None);
    }
    let count = input.read_u16()?;
    let mut objects = Vec::new();
    for _ in 0..count {
        let o = tight_unmarshal_typed::<T>(wf, input, bs)?
            .ok_or(ProtocolError::InvalidData("Null element in object array"))?;
        objects.push(o);
    }
    Ok(Some(objects))
}

pub(crate) fn loose_marshal_array<T: Marshal>(
    wf: &mut OpenWireFormat,
    objects: Option<&[T]>,
    out: &mut DataOutput,
) -> Result<()> {
    out.write_bool(objects.is_some());
    if let Some(objects) = objects {
        out.write_u16(array_len(objects.len())?);
        for o in objects {
            loose_marshal_typed(wf, Some(o), out)?;
        }
    }
    Ok(())
}

pub(crate) fn loose_unmarshal_array<T: Marshal>(
    wf: &mut OpenWireFormat,
    input: &mut DataInput<'_>,
) -> Result<Option<Vec<T>>> {
    if !input.read_bool()? {
        return Ok(None);
    }
    let count = input.read_u16()?;
    let mut objects = Vec::new();
    for _ in 0..count {
        let o = loose_unmarshal_typed::<T>(wf, input)?
            .ok_or(ProtocolError::InvalidData("Null element in object array"))?;
        objects.push(o);
    }
    Ok(Some(objects))
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

pub(crate) fn tight_marshal_string1(value: Option<&str>, bs: &mut BooleanStream) -> Result<usize> {
    bs.write_boolean(value.is_some())?;
    let Some(value) = value else {
        return Ok(0);
    };
    if value.len() >= i16::MAX as usize {
        return Err(ProtocolError::StringTooLong(value.len()));
    }
    bs.write_boolean(value.is_ascii())?;
    Ok(value.len() + 2)
}

pub(crate) fn tight_marshal_string2(
    value: Option<&str>,
    out: &mut DataOutput,
    bs: &mut BooleanStream,
) -> Result<()> {
    if !bs.read_boolean()? {
        return Ok(());
    }
    // ascii and utf-8 strings share a layout; the bit only tells the reader
    // which validation to run
    bs.read_boolean()?;
    out.write_utf(value.unwrap_or_default())
}

pub(crate) fn tight_unmarshal_string(
    input: &mut DataInput<'_>,
    bs: &mut BooleanStream,
) -> Result<Option<String>> {
    if !bs.read_boolean()? {
        return Ok(None);
    }
    let ascii = bs.read_boolean()?;
    let value = input.read_utf()?;
    if ascii && !value.is_ascii() {
        return Err(ProtocolError::InvalidData("Non-ASCII bytes in ASCII string"));
    }
    Ok(Some(value))
}

pub(crate) fn loose_marshal_string(value: Option<&str>, out: &mut DataOutput) -> Result<()> {
    out.write_bool(value.is_some());
    match value {
        Some(value) => out.write_utf(value),
        None => Ok(()),
    }
}

pub(crate) fn loose_unmarshal_string(input: &mut DataInput<'_>) -> Result<Option<String>> {
    if input.read_bool()? {
        input.read_utf().map(Some)
    } else {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Longs
// ---------------------------------------------------------------------------

pub(crate) fn tight_marshal_long1(value: i64, bs: &mut BooleanStream) -> Result<usize> {
    let v = value as u64;
    let (high, low, size) = if v == 0 {
        (false, false, 0)
    } else if v & 0xFFFF_FFFF_FFFF_0000 == 0 {
        (false, true, 2)
    } else if v & 0xFFFF_FFFF_0000_0000 == 0 {
        (true, false, 4)
    } else {
        (true, true, 8)
    };
    bs.write_boolean(high)?;
    bs.write_boolean(low)?;
    Ok(size)
}

pub(crate) fn tight_marshal_long2(
    value: i64,
    out: &mut DataOutput,
    bs: &mut BooleanStream,
) -> Result<()> {
    match (bs.read_boolean()?, bs.read_boolean()?) {
        (true, true) => out.write_i64(value),
        (true, false) => out.write_i32(value as i32),
        (false, true) => out.write_i16(value as i16),
        (false, false) => {}
    }
    Ok(())
}

pub(crate) fn tight_unmarshal_long(input: &mut DataInput<'_>, bs: &mut BooleanStream) -> Result<i64> {
    let value = match (bs.read_boolean()?, bs.read_boolean()?) {
        (true, true) => input.read_i64()?,
        (true, false) => i64::from(input.read_i32()? as u32),
        (false, true) => i64::from(input.read_u16()?),
        (false, false) => 0,
    };
    Ok(value)
}

// ---------------------------------------------------------------------------
// Byte arrays
// ---------------------------------------------------------------------------

pub(crate) fn tight_marshal_bytes1(value: Option<&[u8]>, bs: &mut BooleanStream) -> Result<usize> {
    bs.write_boolean(value.is_some())?;
    Ok(value.map_or(0, |v| v.len() + 4))
}

pub(crate) fn tight_marshal_bytes2(
    value: Option<&[u8]>,
    out: &mut DataOutput,
    bs: &mut BooleanStream,
) -> Result<()> {
    if bs.read_boolean()? {
        let value = value.unwrap_or_default();
        out.write_i32(value.len() as i32);
        out.write_bytes(value);
    }
    Ok(())
}

pub(crate) fn tight_unmarshal_bytes(
    input: &mut DataInput<'_>,
    bs: &mut BooleanStream,
) -> Result<Option<Vec<u8>>> {
    if bs.read_boolean()? {
        Ok(Some(input.read_sized_bytes()?.to_vec()))
    } else {
        Ok(None)
    }
}

pub(crate) fn loose_marshal_bytes(value: Option<&[u8]>, out: &mut DataOutput) {
    out.write_bool(value.is_some());
    if let Some(value) = value {
        out.write_i32(value.len() as i32);
        out.write_bytes(value);
    }
}

pub(crate) fn loose_unmarshal_bytes(input: &mut DataInput<'_>) -> Result<Option<Vec<u8>>> {
    if input.read_bool()? {
        Ok(Some(input.read_sized_bytes()?.to_vec()))
    } else {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Throwables
// ---------------------------------------------------------------------------

fn stack_len(error: &BrokerError) -> Result<u16> {
    u16::try_from(error.stack_trace.len())
        .map_err(|_| ProtocolError::InvalidData("Stack trace longer than 65535 frames"))
}

pub(crate) fn tight_marshal_throwable1(
    wf: &mut OpenWireFormat,
    error: Option<&BrokerError>,
    bs: &mut BooleanStream,
) -> Result<usize> {
    bs.write_boolean(error.is_some())?;
    let Some(error) = error else {
        return Ok(0);
    };
    let mut rc = tight_marshal_string1(error.exception_class.as_deref(), bs)?;
    rc += tight_marshal_string1(error.message.as_deref(), bs)?;
    if wf.is_stack_trace_enabled() {
        stack_len(error)?;
        rc += 2;
        for element in &error.stack_trace {
            rc += tight_marshal_string1(element.class_name.as_deref(), bs)?;
            rc += tight_marshal_string1(element.method_name.as_deref(), bs)?;
            rc += tight_marshal_string1(element.file_name.as_deref(), bs)?;
            rc += 4;
        }
        wf.enter_nested()?;
        rc += tight_marshal_throwable1(wf, error.cause.as_deref(), bs)?;
        wf.exit_nested();
    }
    Ok(rc)
}

pub(crate) fn tight_marshal_throwable2(
    wf: &mut OpenWireFormat,
    error: Option<&BrokerError>,
    out: &mut DataOutput,
    bs: &mut BooleanStream,
) -> Result<()> {
    if !bs.read_boolean()? {
        return Ok(());
    }
    let error = error.ok_or(ProtocolError::InvalidData("Presence bit set for a null field"))?;
    tight_marshal_string2(error.exception_class.as_deref(), out, bs)?;
    tight_marshal_string2(error.message.as_deref(), out, bs)?;
    if wf.is_stack_trace_enabled() {
        out.write_u16(stack_len(error)?);
        for element in &error.stack_trace {
            tight_marshal_string2(element.class_name.as_deref(), out, bs)?;
            tight_marshal_string2(element.method_name.as_deref(), out, bs)?;
            tight_marshal_string2(element.file_name.as_deref(), out, bs)?;
            out.write_i32(element.line_number);
        }
        tight_marshal_throwable2(wf, error.cause.as_deref(), out, bs)?;
    }
    Ok(())
}

pub(crate) fn tight_unmarshal_throwable(
    wf: &mut OpenWireFormat,
    input: &mut DataInput<'_>,
    bs: &mut BooleanStream,
) -> Result<Option<BrokerError>> {
    if !bs.read_boolean()? {
        return Ok(None);
    }
    let mut error = BrokerError {
        exception_class: tight_unmarshal_string(input, bs)?,
        message: tight_unmarshal_string(input, bs)?,
        ..BrokerError::default()
    };
    if wf.is_stack_trace_enabled() {
        let frames = input.read_u16()?;
        for _ in 0..frames {
            error.stack_trace.push(StackTraceElement {
                class_name: tight_unmarshal_string(input, bs)?,
                method_name: tight_unmarshal_string(input, bs)?,
                file_name: tight_unmarshal_string(input, bs)?,
                line_number: input.read_i32()?,
            });
        }
        wf.enter_nested()?;
        error.cause = tight_unmarshal_throwable(wf, input, bs)?.map(Box::new);
        wf.exit_nested();
    }
    Ok(Some(error))
}

pub(crate) fn loose_marshal_throwable(
    wf: &mut OpenWireFormat,
    error: Option<&BrokerError>,
    out: &mut DataOutput,
) -> Result<()> {
    out.write_bool(error.is_some());
    let Some(error) = error else {
        return Ok(());
    };
    loose_marshal_string(error.exception_class.as_deref(), out)?;
    loose_marshal_string(error.message.as_deref(), out)?;
    if wf.is_stack_trace_enabled() {
        out.write_u16(stack_len(error)?);
        for element in &error.stack_trace {
            loose_marshal_string(element.class_name.as_deref(), out)?;
            loose_marshal_string(element.method_name.as_deref(), out)?;
            loose_marshal_string(element.file_name.as_deref(), out)?;
            out.write_i32(element.line_number);
        }
        wf.enter_nested()?;
        loose_marshal_throwable(wf, error.cause.as_deref(), out)?;
        wf.exit_nested();
    }
    Ok(())
}

pub(crate) fn loose_unmarshal_throwable(
    wf: &mut OpenWireFormat,
    input: &mut DataInput<'_>,
) -> Result<Option<BrokerError>> {
    if !input.read_bool()? {
        return Ok(None);
    }
    let mut error = BrokerError {
        exception_class: loose_unmarshal_string(input)?,
        message: loose_unmarshal_string(input)?,
        ..BrokerError::default()
    };
    if wf.is_stack_trace_enabled() {
        let frames = input.read_u16()?;
        for _ in 0..frames {
            error.stack_trace.push(StackTraceElement {
                class_name: loose_unmarshal_string(input)?,
                method_name: loose_unmarshal_string(input)?,
                file_name: loose_unmarshal_string(input)?,
                line_number: input.read_i32()?,
            });
        }
        wf.enter_nested()?;
        error.cause = loose_unmarshal_throwable(wf, input)?.map(Box::new);
        wf.exit_nested();
    }
    Ok(Some(error))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_long_width_classes() {
        for (value, size) in [
            (0i64, 0usize),
            (0xFFFF, 2),
            (0x1_0000, 4),
            (0xFFFF_FFFF, 4),
            (0x1_0000_0000, 8),
            (-1, 8),
        ] {
            let mut bs = BooleanStream::new();
            assert_eq!(tight_marshal_long1(value, &mut bs).unwrap(), size);

            let mut out = DataOutput::new();
            tight_marshal_long2(value, &mut out, &mut bs).unwrap();
            assert_eq!(out.len(), size);

            bs.reset();
            let bytes = out.freeze();
            let mut input = DataInput::new(&bytes);
            assert_eq!(tight_unmarshal_long(&mut input, &mut bs).unwrap(), value);
        }
    }

    #[test]
    fn test_string_bits_and_size() {
        let mut bs = BooleanStream::new();
        assert_eq!(tight_marshal_string1(None, &mut bs).unwrap(), 0);
        assert_eq!(tight_marshal_string1(Some("abc"), &mut bs).unwrap(), 5);
        assert_eq!(tight_marshal_string1(Some("héllo"), &mut bs).unwrap(), 8);
        // null: 1 bit, present: 2 bits each
        assert_eq!(bs.bits_written(), 5);

        let mut out = DataOutput::new();
        tight_marshal_string2(None, &mut out, &mut bs).unwrap();
        tight_marshal_string2(Some("abc"), &mut out, &mut bs).unwrap();
        tight_marshal_string2(Some("héllo"), &mut out, &mut bs).unwrap();
        assert_eq!(out.len(), 13);

        bs.reset();
        let bytes = out.freeze();
        let mut input = DataInput::new(&bytes);
        assert_eq!(tight_unmarshal_string(&mut input, &mut bs).unwrap(), None);
        assert_eq!(
            tight_unmarshal_string(&mut input, &mut bs).unwrap().as_deref(),
            Some("abc")
        );
        assert_eq!(
            tight_unmarshal_string(&mut input, &mut bs).unwrap().as_deref(),
            Some("héllo")
        );
    }

    #[test]
    fn test_tight_string_too_long() {
        let mut bs = BooleanStream::new();
        let long = "a".repeat(i16::MAX as usize);
        assert!(matches!(
            tight_marshal_string1(Some(&long), &mut bs),
            Err(ProtocolError::StringTooLong(_))
        ));
    }

    #[test]
    fn test_bytes_tight_layout() {
        let mut bs = BooleanStream::new();
        assert_eq!(tight_marshal_bytes1(Some(&[9, 8, 7]), &mut bs).unwrap(), 7);
        let mut out = DataOutput::new();
        tight_marshal_bytes2(Some(&[9, 8, 7]), &mut out, &mut bs).unwrap();
        assert_eq!(out.as_slice(), &[0, 0, 0, 3, 9, 8, 7]);
    }
}
