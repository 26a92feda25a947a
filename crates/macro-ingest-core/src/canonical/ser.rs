// serde::Serializer producing CanonicalValue directly.
//
// Mirrors the shape serde_json gives Rust data (unit variants as strings,
// other variants as single-key maps) but, unlike serde_json::to_value, refuses
// NaN/inf instead of turning them into null.

use std::collections::BTreeMap;

use serde::ser::{self, Serialize};

use super::{CanonicalNumber, CanonicalValue};
use crate::error::SerializationError;

type Result<T> = std::result::Result<T, SerializationError>;

pub(super) struct CanonicalSerializer;

impl ser::Serializer for CanonicalSerializer {
    type Ok = CanonicalValue;
    type Error = SerializationError;

    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = VariantSeqBuilder;
    type SerializeMap = MapBuilder;
    type SerializeStruct = MapBuilder;
    type SerializeStructVariant = VariantMapBuilder;

    fn serialize_bool(self, v: bool) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<CanonicalValue> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<CanonicalValue> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<CanonicalValue> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Number(CanonicalNumber::Int(v)))
    }

    fn serialize_u8(self, v: u8) -> Result<CanonicalValue> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<CanonicalValue> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<CanonicalValue> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<CanonicalValue> {
        Ok(CanonicalValue::from(v))
    }

    fn serialize_f32(self, v: f32) -> Result<CanonicalValue> {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<CanonicalValue> {
        CanonicalValue::float(v)
    }

    fn serialize_char(self, v: char) -> Result<CanonicalValue> {
        Ok(CanonicalValue::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<CanonicalValue> {
        Ok(CanonicalValue::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Sequence(
            v.iter().map(|b| CanonicalValue::from(u64::from(*b))).collect(),
        ))
    }

    fn serialize_none(self) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<CanonicalValue> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<CanonicalValue> {
        Ok(CanonicalValue::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<CanonicalValue> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<CanonicalValue> {
        let mut entries = BTreeMap::new();
        entries.insert(variant.to_string(), value.serialize(CanonicalSerializer)?);
        Ok(CanonicalValue::Mapping(entries))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqBuilder> {
        Ok(SeqBuilder {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqBuilder> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SeqBuilder> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantSeqBuilder> {
        Ok(VariantSeqBuilder {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapBuilder> {
        Ok(MapBuilder {
            entries: BTreeMap::new(),
            pending_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<MapBuilder> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<VariantMapBuilder> {
        Ok(VariantMapBuilder {
            variant,
            entries: BTreeMap::new(),
        })
    }
}

pub(super) struct SeqBuilder {
    items: Vec<CanonicalValue>,
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = CanonicalValue;
    type Error = SerializationError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.items.push(value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Sequence(self.items))
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = CanonicalValue;
    type Error = SerializationError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<CanonicalValue> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = CanonicalValue;
    type Error = SerializationError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<CanonicalValue> {
        ser::SerializeSeq::end(self)
    }
}

pub(super) struct VariantSeqBuilder {
    variant: &'static str,
    items: Vec<CanonicalValue>,
}

impl ser::SerializeTupleVariant for VariantSeqBuilder {
    type Ok = CanonicalValue;
    type Error = SerializationError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.items.push(value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        let mut entries = BTreeMap::new();
        entries.insert(
            self.variant.to_string(),
            CanonicalValue::Sequence(self.items),
        );
        Ok(CanonicalValue::Mapping(entries))
    }
}

pub(super) struct MapBuilder {
    entries: BTreeMap<String, CanonicalValue>,
    pending_key: Option<String>,
}

impl ser::SerializeMap for MapBuilder {
    type Ok = CanonicalValue;
    type Error = SerializationError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<()> {
        self.pending_key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| SerializationError::Custom("map value without a key".into()))?;
        self.entries.insert(key, value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Mapping(self.entries))
    }
}

impl ser::SerializeStruct for MapBuilder {
    type Ok = CanonicalValue;
    type Error = SerializationError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.entries
            .insert(key.to_string(), value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        Ok(CanonicalValue::Mapping(self.entries))
    }
}

pub(super) struct VariantMapBuilder {
    variant: &'static str,
    entries: BTreeMap<String, CanonicalValue>,
}

impl ser::SerializeStructVariant for VariantMapBuilder {
    type Ok = CanonicalValue;
    type Error = SerializationError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.entries
            .insert(key.to_string(), value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<CanonicalValue> {
        let mut outer = BTreeMap::new();
        outer.insert(
            self.variant.to_string(),
            CanonicalValue::Mapping(self.entries),
        );
        Ok(CanonicalValue::Mapping(outer))
    }
}

/// Map keys: strings as-is, integers/bools/chars stringified, anything else refused.
struct KeySerializer;

fn unsupported_key<T>(kind: &'static str) -> Result<T> {
    Err(SerializationError::UnsupportedKey(kind))
}

impl ser::Serializer for KeySerializer {
    type Ok = String;
    type Error = SerializationError;

    type SerializeSeq = ser::Impossible<String, SerializationError>;
    type SerializeTuple = ser::Impossible<String, SerializationError>;
    type SerializeTupleStruct = ser::Impossible<String, SerializationError>;
    type SerializeTupleVariant = ser::Impossible<String, SerializationError>;
    type SerializeMap = ser::Impossible<String, SerializationError>;
    type SerializeStruct = ser::Impossible<String, SerializationError>;
    type SerializeStructVariant = ser::Impossible<String, SerializationError>;

    fn serialize_bool(self, v: bool) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i8(self, v: i8) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u8(self, v: u8) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_f32(self, _v: f32) -> Result<String> {
        unsupported_key("float")
    }

    fn serialize_f64(self, _v: f64) -> Result<String> {
        unsupported_key("float")
    }

    fn serialize_char(self, v: char) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_str(self, v: &str) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<String> {
        unsupported_key("bytes")
    }

    fn serialize_none(self) -> Result<String> {
        unsupported_key("none")
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<String> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<String> {
        unsupported_key("unit")
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<String> {
        unsupported_key("unit struct")
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<String> {
        Ok(variant.to_string())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<String> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<String> {
        unsupported_key("enum variant")
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        unsupported_key("sequence")
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        unsupported_key("tuple")
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        unsupported_key("tuple struct")
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        unsupported_key("tuple variant")
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        unsupported_key("map")
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        unsupported_key("struct")
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        unsupported_key("struct variant")
    }
}
