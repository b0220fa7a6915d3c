use crate::error::{Error, Result};

use serde::de::{
    self, Deserialize, DeserializeSeed, EnumAccess, IntoDeserializer, MapAccess, SeqAccess,
    VariantAccess, Visitor,
};

/// Deserializer over a borrowed byte slice.
///
/// The wire format is not self-describing: a string or byte array has no
/// length of its own, it uses the value of the `u8`/`u32` field decoded right
/// before it (see [`ShortStr`](crate::types::ShortStr)).
pub struct Deserializer<'de> {
    input: &'de [u8],
    last_len: Option<usize>,
    consumed: usize,
}

impl<'de> Deserializer<'de> {
    pub fn from_bytes(input: &'de [u8]) -> Self {
        Deserializer {
            input,
            last_len: None,
            consumed: 0,
        }
    }
}

/// Decode `T` from `input`, which must be consumed completely.
pub fn from_bytes<'a, T>(input: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    let mut deserializer = Deserializer::from_bytes(input);
    let t = T::deserialize(&mut deserializer)?;
    if deserializer.input.is_empty() {
        Ok(t)
    } else {
        Err(Error::Incomplete)
    }
}

/////////////////////////////////////////////////////////////////////////////
macro_rules! parse_be {
    ($($func:ident: $typ:ty),+) => {
        $(fn $func(&mut self) -> Result<$typ> {
            let bytes = self.take(std::mem::size_of::<$typ>())?;
            self.last_len = None;
            let mut raw = [0u8; std::mem::size_of::<$typ>()];
            raw.copy_from_slice(bytes);
            Ok(<$typ>::from_be_bytes(raw))
        })+
    };
}

impl<'de> Deserializer<'de> {
    fn take(&mut self, len: usize) -> Result<&'de [u8]> {
        if self.input.len() < len {
            return Err(Error::Eof);
        }
        let (head, tail) = self.input.split_at(len);
        self.input = tail;
        self.consumed += len;
        Ok(head)
    }

    fn parse_bool(&mut self) -> Result<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    parse_be! {
        parse_i8: i8,
        parse_i16: i16,
        parse_i32: i32,
        parse_i64: i64,
        parse_u16: u16,
        parse_u64: u64,
        parse_f32: f32,
        parse_f64: f64,
        parse_raw_u32: u32
    }

    // length field of a short string
    fn parse_u8(&mut self) -> Result<u8> {
        let v = self.take(1)?[0];
        self.last_len = Some(v as usize);
        Ok(v)
    }

    // length field of a long string or byte array
    fn parse_u32(&mut self) -> Result<u32> {
        let v = self.parse_raw_u32()?;
        self.last_len = Some(v as usize);
        Ok(v)
    }

    fn take_with_parsed_len(&mut self) -> Result<&'de [u8]> {
        let len = self.last_len.take().ok_or(Error::ExpectedLength)?;
        if self.input.len() < len {
            return Err(Error::Syntax);
        }
        self.take(len)
    }

    fn parse_str(&mut self) -> Result<&'de str> {
        let bytes = self.take_with_parsed_len()?;
        std::str::from_utf8(bytes).map_err(|err| Error::Message(err.to_string()))
    }
}

impl<'de, 'a> de::Deserializer<'de> for &'a mut Deserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        Err(Error::Message(
            "AMQP wire format is not self-describing".to_string(),
        ))
    }

    fn deserialize_bool<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_bool(self.parse_bool()?)
    }

    fn deserialize_i8<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i8(self.parse_i8()?)
    }

    fn deserialize_i16<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i16(self.parse_i16()?)
    }

    fn deserialize_i32<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i32(self.parse_i32()?)
    }

    fn deserialize_i64<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.parse_i64()?)
    }

    fn deserialize_u8<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_u8(self.parse_u8()?)
    }

    fn deserialize_u16<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_u16(self.parse_u16()?)
    }

    fn deserialize_u32<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_u32(self.parse_u32()?)
    }

    fn deserialize_u64<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_u64(self.parse_u64()?)
    }

    fn deserialize_f32<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_f32(self.parse_f32()?)
    }

    fn deserialize_f64<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_f64(self.parse_f64()?)
    }

    fn deserialize_char<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_borrowed_str(self.parse_str()?)
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_borrowed_bytes(self.take_with_parsed_len()?)
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_byte_buf(self.take_with_parsed_len()?.to_vec())
    }

    // presence of optional values is decided by the containing type
    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_some(self)
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let size = self.parse_raw_u32()? as usize;
        visitor.visit_seq(Elements::sized(self, size))
    }

    fn deserialize_tuple<V>(self, len: usize, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_seq(Elements::counted(self, len))
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_seq(Elements::counted(self, len))
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let size = self.parse_raw_u32()? as usize;
        visitor.visit_map(Elements::sized(self, size))
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_seq(Elements::counted(self, fields.len()))
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_enum(Tagged { de: self })
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        self.deserialize_any(visitor)
    }
}

/////////////////////////////////////////////////////////////////////////////
enum Bound {
    /// number of remaining elements, for structs and tuples
    Count(usize),
    /// number of remaining bytes, for field arrays and field tables
    Bytes(usize),
}

struct Elements<'a, 'de: 'a> {
    de: &'a mut Deserializer<'de>,
    bound: Bound,
}

impl<'a, 'de> Elements<'a, 'de> {
    fn counted(de: &'a mut Deserializer<'de>, len: usize) -> Self {
        Elements {
            de,
            bound: Bound::Count(len),
        }
    }

    fn sized(de: &'a mut Deserializer<'de>, size: usize) -> Self {
        Elements {
            de,
            bound: Bound::Bytes(size),
        }
    }

    fn has_next(&self) -> bool {
        match self.bound {
            Bound::Count(n) | Bound::Bytes(n) => n > 0,
        }
    }

    fn next<T>(&mut self, seed: T) -> Result<T::Value>
    where
        T: DeserializeSeed<'de>,
    {
        let start = self.de.consumed;
        let value = seed.deserialize(&mut *self.de)?;
        match &mut self.bound {
            Bound::Count(n) => *n -= 1,
            Bound::Bytes(n) => {
                let used = self.de.consumed - start;
                *n = n.checked_sub(used).ok_or(Error::Syntax)?;
            }
        }
        Ok(value)
    }
}

impl<'de, 'a> SeqAccess<'de> for Elements<'a, 'de> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: DeserializeSeed<'de>,
    {
        if self.has_next() {
            self.next(seed).map(Some)
        } else {
            Ok(None)
        }
    }
}

impl<'de, 'a> MapAccess<'de> for Elements<'a, 'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: DeserializeSeed<'de>,
    {
        if self.has_next() {
            self.next(seed).map(Some)
        } else {
            Ok(None)
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: DeserializeSeed<'de>,
    {
        self.next(seed)
    }
}

/////////////////////////////////////////////////////////////////////////////
/// Externally tagged enum, the tag is a single ASCII letter.
struct Tagged<'a, 'de: 'a> {
    de: &'a mut Deserializer<'de>,
}

impl<'de, 'a> EnumAccess<'de> for Tagged<'a, 'de> {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V>(self, seed: V) -> Result<(V::Value, Self::Variant)>
    where
        V: DeserializeSeed<'de>,
    {
        let tag = self.de.take(1)?[0];
        if !tag.is_ascii_alphabetic() {
            return Err(Error::InvalidVariant(tag));
        }
        let name = [tag];
        let name = std::str::from_utf8(&name).map_err(|_| Error::InvalidVariant(tag))?;
        let value = seed.deserialize(IntoDeserializer::<Error>::into_deserializer(name))?;
        Ok((value, self))
    }
}

impl<'de, 'a> VariantAccess<'de> for Tagged<'a, 'de> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<T>(self, seed: T) -> Result<T::Value>
    where
        T: DeserializeSeed<'de>,
    {
        seed.deserialize(self.de)
    }

    fn tuple_variant<V>(self, len: usize, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        de::Deserializer::deserialize_tuple(self.de, len, visitor)
    }

    fn struct_variant<V>(self, fields: &'static [&'static str], visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        de::Deserializer::deserialize_tuple(self.de, fields.len(), visitor)
    }
}

/////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use crate::{from_bytes, to_bytes, Error};
    use crate::types::*;
    use serde::Deserialize;

    #[test]
    fn test_struct() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Frame {
            type_id: Octect,
            channel_id: ShortUint,
            size: LongUint,
            payload: LongStr,
            end: Octect,
        }
        let input = vec![
            0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x04, b'A', b'B', b'C',
            b'D', 0xCE,
        ];
        let expected = Frame {
            type_id: 1,
            channel_id: 2,
            size: 8,
            payload: "ABCD".try_into().unwrap(),
            end: 0xCE,
        };
        assert_eq!(expected, from_bytes(&input).unwrap());
    }

    #[test]
    fn test_enum() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Values(FieldValue, FieldValue, FieldValue, FieldValue);

        let input = vec![b't', 0x01, b'u', 0x00, 0x09, b'f', 0x3F, 0xC0, 0, 0, b'V'];
        let expected = Values(
            FieldValue::t(true),
            FieldValue::u(9),
            FieldValue::f(1.5),
            FieldValue::V,
        );
        assert_eq!(expected, from_bytes(&input).unwrap());
    }

    #[test]
    fn test_invalid_variant() {
        let result: Result<FieldValue, _> = from_bytes(&[0x01, 0x00]);
        assert_eq!(Err(Error::InvalidVariant(0x01)), result);
    }

    #[test]
    fn test_map() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Frame {
            table: FieldTable,
        }

        let mut table = FieldTable::new();
        table.insert("A".try_into().unwrap(), FieldValue::t(true));
        table.insert("B".try_into().unwrap(), FieldValue::u(9));
        table.insert("C".try_into().unwrap(), FieldValue::f(1.5));

        let input = vec![
            0x00, 0x00, 0x00, 16, 0x01, b'A', b't', 0x01, 0x01, b'B', b'u', 0x00, 0x09, 0x01, b'C',
            b'f', 0x3F, 0xC0, 0, 0,
        ];
        let result: Frame = from_bytes(&input).unwrap();
        assert_eq!(Frame { table }, result);
    }

    #[test]
    fn test_nested_table_and_array() {
        let mut inner = FieldTable::new();
        inner.insert("k".try_into().unwrap(), FieldValue::S("v".try_into().unwrap()));

        let mut table = FieldTable::new();
        table.insert("nested".try_into().unwrap(), FieldValue::F(inner));
        table.insert(
            "list".try_into().unwrap(),
            FieldValue::A(vec![FieldValue::I(-7), FieldValue::T(1_600_000_000)].into()),
        );
        table.insert(
            "raw".try_into().unwrap(),
            FieldValue::x(vec![1, 2, 3].try_into().unwrap()),
        );

        let bytes = to_bytes(&table).unwrap();
        let decoded: FieldTable = from_bytes(&bytes).unwrap();
        assert_eq!(table, decoded);
    }

    #[test]
    fn test_incomplete() {
        #[derive(Deserialize, Debug)]
        struct Empty;
        let result: Result<Empty, _> = from_bytes(b"deadbeef");
        assert_eq!(Error::Incomplete, result.unwrap_err());
    }

    #[test]
    fn test_eof() {
        #[derive(Deserialize, Debug)]
        struct Frame(u32);
        let result: Result<Frame, _> = from_bytes(&[0x00]);
        assert_eq!(Error::Eof, result.unwrap_err());
    }

    #[test]
    fn test_missing_length() {
        #[derive(Deserialize, Debug)]
        struct Frame(u16, String);
        let result: Result<Frame, _> = from_bytes(&[0, 1, b'a']);
        assert_eq!(Error::ExpectedLength, result.unwrap_err());
    }

    #[test]
    fn test_length_beyond_input() {
        let result: Result<ShortStr, _> = from_bytes(&[9, b'a', b'b']);
        assert_eq!(Error::Syntax, result.unwrap_err());
    }

    #[test]
    fn test_table_size_mismatch() {
        // declared size 2 but the entry takes 4 bytes
        let input = vec![0x00, 0x00, 0x00, 2, 0x01, b'A', b't', 0x01];
        let result: Result<FieldTable, _> = from_bytes(&input);
        assert_eq!(Error::Syntax, result.unwrap_err());
    }

    #[test]
    fn test_borrowed_bytes() {
        #[derive(Deserialize)]
        struct Frame<'a> {
            _len: u8,
            bytes: &'a [u8],
        }

        let input = vec![0x04, b'b', b'e', b'e', b'f'];
        let result: Frame = from_bytes(&input).unwrap();
        assert_eq!(b"beef", result.bytes);
    }

    #[test]
    fn test_signed_and_float() {
        #[derive(Deserialize)]
        struct Frame {
            m_i8: i8,
            m_i16: i16,
            m_i32: i32,
            m_i64: i64,
            m_u64: u64,
            m_f64: f64,
            m_char: (u8, char),
        }

        let input = vec![
            0xff, // -1
            0xff, 0xfe, // -2
            0xff, 0xff, 0xff, 0xfd, // -3
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfc, // -4
            0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // 2^63
            0x3F, 0xF8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // 1.5
            0x03, 0xE2, 0x82, 0xAC, // (3, '€')
        ];
        let result: Frame = from_bytes(&input).unwrap();
        assert_eq!(-1, result.m_i8);
        assert_eq!(-2, result.m_i16);
        assert_eq!(-3, result.m_i32);
        assert_eq!(-4, result.m_i64);
        assert_eq!(9223372036854775808, result.m_u64);
        assert_eq!(1.5, result.m_f64);
        assert_eq!('€', result.m_char.1);
    }
}
