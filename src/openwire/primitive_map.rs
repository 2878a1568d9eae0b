//! Typed property map carried in the `WireFormatInfo` handshake.
//!
//! ```text
//! [count(4)] { [key: utf] [type(1)] [value] }*      count == -1 encodes a null map
//! ```

use std::collections::BTreeMap;

use crate::core::data_stream::{DataInput, DataOutput};
use crate::error::{constants, ProtocolError, Result};

pub type PrimitiveMap = BTreeMap<String, PrimitiveValue>;

const NULL: u8 = 0;
const BOOLEAN: u8 = 1;
const BYTE: u8 = 2;
const SHORT: u8 = 4;
const INTEGER: u8 = 5;
const LONG: u8 = 6;
const DOUBLE: u8 = 7;
const FLOAT: u8 = 8;
const STRING: u8 = 9;
const BYTE_ARRAY: u8 = 10;
const MAP: u8 = 11;
const LIST: u8 = 12;
const BIG_STRING: u8 = 13;

/// Nesting limit for maps and lists; the map arrives before negotiation
/// from an unauthenticated peer.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Map(PrimitiveMap),
    List(Vec<PrimitiveValue>),
}

impl PrimitiveValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PrimitiveValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Integral value widened to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PrimitiveValue::Byte(v) => Some(i64::from(*v)),
            PrimitiveValue::Short(v) => Some(i64::from(*v)),
            PrimitiveValue::Int(v) => Some(i64::from(*v)),
            PrimitiveValue::Long(v) => Some(*v),
            _ => None,
        }
    }
}

pub fn marshal_map(map: Option<&PrimitiveMap>, out: &mut DataOutput) -> Result<()> {
    marshal_map_at(map, out, 0)
}

fn marshal_map_at(map: Option<&PrimitiveMap>, out: &mut DataOutput, depth: usize) -> Result<()> {
    let Some(map) = map else {
        out.write_i32(-1);
        return Ok(());
    };
    out.write_i32(map.len() as i32);
    for (key, value) in map {
        out.write_utf(key)?;
        marshal_value(value, out, depth)?;
    }
    Ok(())
}

/// Encode a map into a standalone byte sequence
pub fn map_to_bytes(map: &PrimitiveMap) -> Result<Vec<u8>> {
    let mut out = DataOutput::new();
    marshal_map(Some(map), &mut out)?;
    Ok(out.into_bytes_mut().to_vec())
}

pub fn unmarshal_map(input: &mut DataInput<'_>) -> Result<Option<PrimitiveMap>> {
    unmarshal_map_at(input, 0)
}

fn unmarshal_map_at(input: &mut DataInput<'_>, depth: usize) -> Result<Option<PrimitiveMap>> {
    let count = input.read_i32()?;
    if count < 0 {
        return Ok(None);
    }
    let mut map = PrimitiveMap::new();
    for _ in 0..count {
        let key = input.read_utf()?;
        let value = unmarshal_value(input, depth)?;
        map.insert(key, value);
    }
    Ok(Some(map))
}

fn marshal_value(value: &PrimitiveValue, out: &mut DataOutput, depth: usize) -> Result<()> {
    match value {
        PrimitiveValue::Map(_) | PrimitiveValue::List(_) if depth >= MAX_DEPTH => {
            return Err(ProtocolError::InvalidData(constants::ERR_MAP_TOO_DEEP));
        }
        PrimitiveValue::Null => out.write_u8(NULL),
        PrimitiveValue::Boolean(v) => {
            out.write_u8(BOOLEAN);
            out.write_bool(*v);
        }
        PrimitiveValue::Byte(v) => {
            out.write_u8(BYTE);
            out.write_u8(*v as u8);
        }
        PrimitiveValue::Short(v) => {
            out.write_u8(SHORT);
            out.write_i16(*v);
        }
        PrimitiveValue::Int(v) => {
            out.write_u8(INTEGER);
            out.write_i32(*v);
        }
        PrimitiveValue::Long(v) => {
            out.write_u8(LONG);
            out.write_i64(*v);
        }
        PrimitiveValue::Float(v) => {
            out.write_u8(FLOAT);
            out.write_i32(v.to_bits() as i32);
        }
        PrimitiveValue::Double(v) => {
            out.write_u8(DOUBLE);
            out.write_i64(v.to_bits() as i64);
        }
        PrimitiveValue::String(v) if v.len() > u16::MAX as usize => {
            out.write_u8(BIG_STRING);
            out.write_i32(v.len() as i32);
            out.write_bytes(v.as_bytes());
        }
        PrimitiveValue::String(v) => {
            out.write_u8(STRING);
            out.write_utf(v)?;
        }
        PrimitiveValue::Bytes(v) => {
            out.write_u8(BYTE_ARRAY);
            out.write_i32(v.len() as i32);
            out.write_bytes(v);
        }
        PrimitiveValue::Map(v) => {
            out.write_u8(MAP);
            marshal_map_at(Some(v), out, depth + 1)?;
        }
        PrimitiveValue::List(items) => {
            out.write_u8(LIST);
            out.write_i32(items.len() as i32);
            for item in items {
                marshal_value(item, out, depth + 1)?;
            }
        }
    }
    Ok(())
}

fn unmarshal_value(input: &mut DataInput<'_>, depth: usize) -> Result<PrimitiveValue> {
    let value = match input.read_u8()? {
        NULL => PrimitiveValue::Null,
        BOOLEAN => PrimitiveValue::Boolean(input.read_bool()?),
        BYTE => PrimitiveValue::Byte(input.read_u8()? as i8),
        SHORT => PrimitiveValue::Short(input.read_i16()?),
        INTEGER => PrimitiveValue::Int(input.read_i32()?),
        LONG => PrimitiveValue::Long(input.read_i64()?),
        FLOAT => PrimitiveValue::Float(f32::from_bits(input.read_i32()? as u32)),
        DOUBLE => PrimitiveValue::Double(f64::from_bits(input.read_i64()? as u64)),
        STRING => PrimitiveValue::String(input.read_utf()?),
        BIG_STRING => {
            let raw = input.read_sized_bytes()?;
            let s = std::str::from_utf8(raw).map_err(|_| {
                ProtocolError::InvalidData(constants::ERR_STRING_NOT_UTF8)
            })?;
            PrimitiveValue::String(s.to_owned())
        }
        BYTE_ARRAY => PrimitiveValue::Bytes(input.read_sized_bytes()?.to_vec()),
        MAP | LIST if depth >= MAX_DEPTH => {
            return Err(ProtocolError::InvalidData(constants::ERR_MAP_TOO_DEEP));
        }
        MAP => PrimitiveValue::Map(unmarshal_map_at(input, depth + 1)?.unwrap_or_default()),
        LIST => {
            let count = input.read_i32()?.max(0);
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(unmarshal_value(input, depth + 1)?);
            }
            PrimitiveValue::List(items)
        }
        _ => return Err(ProtocolError::InvalidData("Unknown property value type")),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_map_roundtrip_all_types() {
        let mut nested = PrimitiveMap::new();
        nested.insert("inner".into(), PrimitiveValue::Short(-3));

        let mut map = PrimitiveMap::new();
        map.insert("TightEncodingEnabled".into(), PrimitiveValue::Boolean(true));
        map.insert("CacheSize".into(), PrimitiveValue::Int(1024));
        map.insert("MaxFrameSize".into(), PrimitiveValue::Long(1 << 40));
        map.insert("Ratio".into(), PrimitiveValue::Double(0.5));
        map.insert("Weight".into(), PrimitiveValue::Float(1.25));
        map.insert("Host".into(), PrimitiveValue::String("broker-1".into()));
        map.insert("Blob".into(), PrimitiveValue::Bytes(vec![1, 2, 3]));
        map.insert("Nothing".into(), PrimitiveValue::Null);
        map.insert("Nested".into(), PrimitiveValue::Map(nested));
        map.insert(
            "List".into(),
            PrimitiveValue::List(vec![PrimitiveValue::Byte(1), PrimitiveValue::Boolean(false)]),
        );

        let bytes = map_to_bytes(&map).unwrap();
        let mut input = DataInput::new(&bytes);
        let decoded = unmarshal_map(&mut input).unwrap().expect("map present");
        assert_eq!(decoded, map);
        assert!(!input.has_remaining());
    }

    #[test]
    fn test_null_map() {
        let mut out = DataOutput::new();
        marshal_map(None, &mut out).unwrap();
        let bytes = out.freeze();
        assert_eq!(unmarshal_map(&mut DataInput::new(&bytes)).unwrap(), None);
    }

    #[test]
    fn test_unknown_value_type_rejected() {
        // one entry, key "k", type 0x63
        let bytes = [0, 0, 0, 1, 0, 1, b'k', 0x63];
        assert!(matches!(
            unmarshal_map(&mut DataInput::new(&bytes)),
            Err(ProtocolError::InvalidData(_))
        ));
    }

    fn nested_maps(levels: usize) -> PrimitiveMap {
        let mut value = PrimitiveValue::Int(7);
        for _ in 0..levels {
            let mut inner = PrimitiveMap::new();
            inner.insert("n".into(), value);
            value = PrimitiveValue::Map(inner);
        }
        let mut root = PrimitiveMap::new();
        root.insert("root".into(), value);
        root
    }

    #[test]
    fn test_nesting_limit_matches_on_both_sides() {
        let deepest = nested_maps(MAX_DEPTH);
        let bytes = map_to_bytes(&deepest).unwrap();
        let decoded = unmarshal_map(&mut DataInput::new(&bytes)).unwrap();
        assert_eq!(decoded, Some(deepest));

        assert!(matches!(
            map_to_bytes(&nested_maps(MAX_DEPTH + 1)),
            Err(ProtocolError::InvalidData(constants::ERR_MAP_TOO_DEEP))
        ));
    }

    #[test]
    fn test_nested_lists_count_toward_the_limit() {
        let mut value = PrimitiveValue::Null;
        for _ in 0..=MAX_DEPTH {
            value = PrimitiveValue::List(vec![value]);
        }
        let mut map = PrimitiveMap::new();
        map.insert("list".into(), value);
        assert!(map_to_bytes(&map).is_err());
    }

    #[test]
    fn test_integral_widening() {
        assert_eq!(PrimitiveValue::Int(5).as_i64(), Some(5));
        assert_eq!(PrimitiveValue::Short(-1).as_i64(), Some(-1));
        assert_eq!(PrimitiveValue::String("5".into()).as_i64(), None);
        assert_eq!(PrimitiveValue::Boolean(true).as_bool(), Some(true));
    }
}
