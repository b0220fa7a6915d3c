use crate::error::{Error, Result};
use bytes::BufMut;
use serde::{ser, Serialize};
use std::ops::DerefMut;

/// Serializer writing into any growable byte buffer, e.g. `Vec<u8>` or `BytesMut`.
pub struct Serializer<'a, W: BufMut> {
    output: &'a mut W,
}

impl<'a, W: BufMut> Serializer<'a, W> {
    pub fn new(output: &'a mut W) -> Self {
        Self { output }
    }
}

pub fn to_bytes<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();
    to_buffer(value, &mut buf)?;
    Ok(buf)
}

/// Append the encoded `value` to `buf`, return the number of bytes written.
pub fn to_buffer<T, W>(value: &T, buf: &mut W) -> Result<usize>
where
    T: Serialize + ?Sized,
    W: BufMut + DerefMut<Target = [u8]>,
{
    let start = buf.len();
    value.serialize(&mut Serializer::new(buf))?;
    Ok(buf.len() - start)
}

macro_rules! serialize_be {
    ($($func:ident: $typ:ty),+) => {
        $(fn $func(self, v: $typ) -> Result<()> {
            self.output.put_slice(&v.to_be_bytes());
            Ok(())
        })+
    };
}

impl<'a, 'b: 'a, W> ser::Serializer for &'a mut Serializer<'b, W>
where
    W: BufMut + DerefMut<Target = [u8]>,
{
    type Ok = ();
    type Error = Error;

    type SerializeSeq = Prefixed<'a, 'b, W>;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Prefixed<'a, 'b, W>;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.output.put_u8(v as u8);
        Ok(())
    }

    serialize_be! {
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_f32: f32,
        serialize_f64: f64
    }

    fn serialize_char(self, v: char) -> Result<()> {
        let mut tmp = [0u8; 4];
        self.serialize_str(v.encode_utf8(&mut tmp))
    }

    // length is written by the preceding field of the containing type
    fn serialize_str(self, v: &str) -> Result<()> {
        self.output.put_slice(v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        self.output.put_slice(v);
        Ok(())
    }

    // absent optional values take no space, presence is tracked by flags
    fn serialize_none(self) -> Result<()> {
        Ok(())
    }

    fn serialize_some<T>(self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<()> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        Ok(())
    }

    // variant name is the single letter field value tag
    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<()> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        variant.serialize(&mut *self)?;
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        Prefixed::begin(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        variant.serialize(&mut *self)?;
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Prefixed::begin(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        variant.serialize(&mut *self)?;
        Ok(self)
    }
}

macro_rules! impl_plain_compound {
    ($($trait:ident :: $func:ident),+) => {
        $(impl<'a, 'b: 'a, W> ser::$trait for &'a mut Serializer<'b, W>
        where
            W: BufMut + DerefMut<Target = [u8]>,
        {
            type Ok = ();
            type Error = Error;

            fn $func<T>(&mut self, value: &T) -> Result<()>
            where
                T: Serialize + ?Sized,
            {
                value.serialize(&mut **self)
            }

            fn end(self) -> Result<()> {
                Ok(())
            }
        })+
    };
}

impl_plain_compound! {
    SerializeTuple::serialize_element,
    SerializeTupleStruct::serialize_field,
    SerializeTupleVariant::serialize_field
}

impl<'a, 'b: 'a, W> ser::SerializeStruct for &'a mut Serializer<'b, W>
where
    W: BufMut + DerefMut<Target = [u8]>,
{
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, _key: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b: 'a, W> ser::SerializeStructVariant for &'a mut Serializer<'b, W>
where
    W: BufMut + DerefMut<Target = [u8]>,
{
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, _key: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

/////////////////////////////////////////////////////////////////////////////
/// Sequences and maps (field arrays and field tables) are prefixed by their
/// encoded size in bytes. Four bytes are reserved up front and patched in `end`.
pub struct Prefixed<'a, 'b: 'a, W: BufMut> {
    ser: &'a mut Serializer<'b, W>,
    start: usize,
}

impl<'a, 'b: 'a, W> Prefixed<'a, 'b, W>
where
    W: BufMut + DerefMut<Target = [u8]>,
{
    fn begin(ser: &'a mut Serializer<'b, W>) -> Result<Self> {
        let start = ser.output.len();
        ser.output.put_u32(0);
        Ok(Self { ser, start })
    }

    fn finish(self) -> Result<()> {
        let size = self.ser.output.len() - self.start - 4;
        let size = u32::try_from(size)
            .map_err(|_| Error::Message(format!("container too large: {} bytes", size)))?;
        self.ser.output[self.start..self.start + 4].copy_from_slice(&size.to_be_bytes());
        Ok(())
    }
}

impl<'a, 'b: 'a, W> ser::SerializeSeq for Prefixed<'a, 'b, W>
where
    W: BufMut + DerefMut<Target = [u8]>,
{
    type Ok = ();
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut *self.ser)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

impl<'a, 'b: 'a, W> ser::SerializeMap for Prefixed<'a, 'b, W>
where
    W: BufMut + DerefMut<Target = [u8]>,
{
    type Ok = ();
    type Error = Error;

    fn serialize_key<T>(&mut self, key: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        key.serialize(&mut *self.ser)
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut *self.ser)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

/////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use crate::to_bytes;
    use crate::types::*;
    use serde::Serialize;

    #[test]
    fn test_struct() {
        #[derive(Serialize)]
        struct Frame {
            type_id: Octect,
            channel_id: ShortUint,
            size: LongUint,
            payload: LongStr,
        }

        let frame = Frame {
            type_id: 1,
            channel_id: 2,
            size: 3,
            payload: "ABCD".try_into().unwrap(),
        };
        let expected = vec![
            0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04, b'A', b'B', b'C',
            b'D',
        ];
        assert_eq!(expected, to_bytes(&frame).unwrap());
    }

    #[test]
    fn test_field_table() {
        let mut table = FieldTable::new();
        table.insert("A".try_into().unwrap(), FieldValue::t(true));
        table.insert("B".try_into().unwrap(), FieldValue::u(9));
        table.insert("C".try_into().unwrap(), FieldValue::f(1.5));
        table.insert("D".try_into().unwrap(), FieldValue::V);

        let result = to_bytes(&table).unwrap();

        // entry order follows the hash map, so look up each entry by its name
        assert_eq!([0x00, 0x00, 0x00, 19], result[..4]);

        let a = result.iter().position(|v| v == &b'A').unwrap();
        assert_eq!([0x01, b'A', b't', 0x01], result[a - 1..a + 3]);

        let b = result.iter().position(|v| v == &b'B').unwrap();
        assert_eq!([0x01, b'B', b'u', 0x00, 0x09], result[b - 1..b + 4]);

        let c = result.iter().position(|v| v == &b'C').unwrap();
        assert_eq!([0x01, b'C', b'f', 0x3F, 0xC0, 0, 0], result[c - 1..c + 6]);

        let d = result.iter().position(|v| v == &b'D').unwrap();
        assert_eq!([0x01, b'D', b'V'], result[d - 1..d + 2]);

        assert_eq!(4 + 4 + 5 + 7 + 3, result.len());
    }

    #[test]
    fn test_field_array_prefix_is_byte_size() {
        let arr = FieldArray::from(vec![FieldValue::u(1), FieldValue::t(false)]);
        let result = to_bytes(&arr).unwrap();
        // 'u' + 2 bytes, 't' + 1 byte
        assert_eq!(vec![0, 0, 0, 5, b'u', 0, 1, b't', 0], result);
    }

    #[test]
    fn test_byte_array() {
        let value = FieldValue::x(vec![0xde, 0xad].try_into().unwrap());
        assert_eq!(vec![b'x', 0, 0, 0, 2, 0xde, 0xad], to_bytes(&value).unwrap());
    }
}
