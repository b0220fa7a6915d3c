//! AMQP 0-9-1 field types and domains, following the RabbitMQ flavour of the
//! protocol: <https://www.rabbitmq.com/amqp-0-9-1-errata.html#section_3>
use std::{
    collections::HashMap,
    convert::TryFrom,
    fmt,
    num::TryFromIntError,
    ops::Deref,
};

use serde::{Deserialize, Serialize};

pub type Bit = u8; // bits are packed into octets by the method types
pub type Octect = u8;
pub type Boolean = bool;
pub type ShortShortUint = u8;
pub type ShortShortInt = i8;
pub type ShortUint = u16;
pub type ShortInt = i16;
pub type LongUint = u32;
pub type LongInt = i32;
pub type LongLongUint = u64;
pub type LongLongInt = i64;
pub type TimeStamp = u64;
pub type Float = f32;
pub type Double = f64;

/////////////////////////////////////////////////////////////////////////////
/// String of at most 255 bytes, encoded with a one octet length.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Clone, Default)]
pub struct ShortStr(u8, String);

impl ShortStr {
    pub fn as_str(&self) -> &str {
        &self.1
    }
}

impl Deref for ShortStr {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.1
    }
}

impl fmt::Display for ShortStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.1)
    }
}

impl TryFrom<String> for ShortStr {
    type Error = TryFromIntError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let len = u8::try_from(s.len())?;
        Ok(Self(len, s))
    }
}

impl TryFrom<&str> for ShortStr {
    type Error = TryFromIntError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::try_from(s.to_owned())
    }
}

impl From<ShortStr> for String {
    fn from(s: ShortStr) -> Self {
        s.1
    }
}

/////////////////////////////////////////////////////////////////////////////
/// String encoded with a four octet length.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct LongStr(u32, String);

impl LongStr {
    pub fn as_str(&self) -> &str {
        &self.1
    }
}

impl Deref for LongStr {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.1
    }
}

impl fmt::Display for LongStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.1)
    }
}

impl TryFrom<String> for LongStr {
    type Error = TryFromIntError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let len = u32::try_from(s.len())?;
        Ok(Self(len, s))
    }
}

impl TryFrom<&str> for LongStr {
    type Error = TryFromIntError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::try_from(s.to_owned())
    }
}

impl From<LongStr> for String {
    fn from(s: LongStr) -> Self {
        s.1
    }
}

/////////////////////////////////////////////////////////////////////////////
/// Scale octet followed by a signed long.
///
/// The errata text and the grammar disagree on the signedness of the value,
/// RabbitMQ treats it as signed.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub struct DecimalValue(pub Octect, pub LongInt);

impl fmt::Display for DecimalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({}, {})", self.0, self.1)
    }
}

/////////////////////////////////////////////////////////////////////////////
/// RabbitMQ specific byte array field value (`x`).
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct ByteArray(LongUint, #[serde(with = "serde_bytes_ng")] Vec<u8>);

impl ByteArray {
    pub fn as_bytes(&self) -> &[u8] {
        &self.1
    }
}

impl TryFrom<Vec<u8>> for ByteArray {
    type Error = TryFromIntError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        let len = LongUint::try_from(bytes.len())?;
        Ok(Self(len, bytes))
    }
}

impl From<ByteArray> for Vec<u8> {
    fn from(arr: ByteArray) -> Self {
        arr.1
    }
}

impl fmt::Display for ByteArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X?}", self.1)
    }
}

/////////////////////////////////////////////////////////////////////////////
/// Array of field values, prefixed on the wire by its size in bytes.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct FieldArray(Vec<FieldValue>);

impl FieldArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, v: FieldValue) {
        self.0.push(v);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldValue> {
        self.0.iter()
    }
}

impl From<Vec<FieldValue>> for FieldArray {
    fn from(values: Vec<FieldValue>) -> Self {
        Self(values)
    }
}

impl From<FieldArray> for Vec<FieldValue> {
    fn from(arr: FieldArray) -> Self {
        arr.0
    }
}

impl fmt::Display for FieldArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {}", v)?;
        }
        f.write_str(" ]")
    }
}

/////////////////////////////////////////////////////////////////////////////
// 0-9-1   RabbitMQ   Type
// ----------------------------------------------------
//   t       t        Boolean
//   b       b        Signed 8-bit
//   B       B        Unsigned 8-bit
//   U       s        Signed 16-bit
//   u       u        Unsigned 16-bit
//   I       I        Signed 32-bit
//   i       i        Unsigned 32-bit
//   L       l        Signed 64-bit
//   f       f        32-bit float
//   d       d        64-bit float
//   D       D        Decimal
//   S       S        Long string
//   A       A        Array
//   T       T        Timestamp (u64)
//   F       F        Nested table
//   V       V        Void
//           x        Byte array
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[allow(non_camel_case_types)]
pub enum FieldValue {
    t(Boolean),
    b(ShortShortInt),
    B(ShortShortUint),
    s(ShortInt),
    u(ShortUint),
    I(LongInt),
    i(LongUint),
    l(LongLongInt),
    f(Float),
    d(Double),
    D(DecimalValue),
    S(LongStr),
    A(FieldArray),
    T(TimeStamp),
    F(FieldTable),
    V,
    x(ByteArray),
}

macro_rules! impl_from_for_field_value {
    ($($typ:ty => $variant:ident),+) => {
        $(impl From<$typ> for FieldValue {
            fn from(v: $typ) -> Self {
                FieldValue::$variant(v)
            }
        })+
    };
}

impl_from_for_field_value! {
    bool => t,
    i8 => b,
    u8 => B,
    i16 => s,
    u16 => u,
    i32 => I,
    u32 => i,
    i64 => l,
    f32 => f,
    f64 => d,
    DecimalValue => D,
    LongStr => S,
    FieldArray => A,
    FieldTable => F,
    ByteArray => x
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::t(v) => write!(f, "{}", v),
            FieldValue::b(v) => write!(f, "{}", v),
            FieldValue::B(v) => write!(f, "{}", v),
            FieldValue::s(v) => write!(f, "{}", v),
            FieldValue::u(v) => write!(f, "{}", v),
            FieldValue::I(v) => write!(f, "{}", v),
            FieldValue::i(v) => write!(f, "{}", v),
            FieldValue::l(v) => write!(f, "{}", v),
            FieldValue::f(v) => write!(f, "{}", v),
            FieldValue::d(v) => write!(f, "{}", v),
            FieldValue::D(v) => write!(f, "{}", v),
            FieldValue::S(v) => write!(f, "{}", v),
            FieldValue::A(v) => write!(f, "{}", v),
            FieldValue::T(v) => write!(f, "{}", v),
            FieldValue::F(v) => write!(f, "{}", v),
            FieldValue::V => f.write_str("()"),
            FieldValue::x(v) => write!(f, "{}", v),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
pub type FieldName = ShortStr;

/// Field table, prefixed on the wire by its size in bytes.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct FieldTable(HashMap<FieldName, FieldValue>);

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, k: FieldName, v: FieldValue) -> Option<FieldValue> {
        self.0.insert(k, v)
    }

    pub fn remove(&mut self, k: &FieldName) -> Option<FieldValue> {
        self.0.remove(k)
    }

    pub fn get(&self, k: &FieldName) -> Option<&FieldValue> {
        self.0.get(k)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::collections::hash_map::Iter<'_, FieldName, FieldValue> {
        self.0.iter()
    }
}

impl fmt::Display for FieldTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {}: {}", k, v)?;
        }
        f.write_str(" }")
    }
}

/////////////////////////////////////////////////////////////////////////////
// AMQP domains
pub type AmqpChannelId = ShortUint; // channel number in the frame header
pub type AmqpClassId = ShortUint;
pub type AmqpMethodId = ShortUint;

pub type AmqpConsumerTag = ShortStr;
pub type AmqpDeliveryTag = LongLongUint;
pub type AmqpExchangeName = ShortStr;
pub type AmqpMessageCount = LongUint;
pub type AmqpPath = ShortStr;
pub type AmqpPeerProperties = FieldTable;
pub type AmqpQueueName = ShortStr;
pub type AmqpReplyCode = ShortUint;
pub type AmqpReplyText = ShortStr;
pub type AmqpTable = FieldTable;
pub type AmqpTimeStamp = TimeStamp;

/////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_str_limit() {
        assert!(ShortStr::try_from("a".repeat(255)).is_ok());
        assert!(ShortStr::try_from("a".repeat(256)).is_err());
    }

    #[test]
    fn test_table_display() {
        let mut table = FieldTable::new();
        table.insert(
            "Cash".try_into().unwrap(),
            FieldValue::D(DecimalValue(3, 123456)),
        );

        assert_eq!("{ Cash: Decimal(3, 123456) }", format!("{}", table));
    }

    #[test]
    fn test_field_array_display() {
        let field_arr = FieldArray::from(vec![
            FieldValue::t(true),
            FieldValue::D(DecimalValue(3, 123456)),
        ]);
        assert_eq!("[ true, Decimal(3, 123456) ]", format!("{}", field_arr));
        assert_eq!("[ ]", format!("{}", FieldArray::new()));
    }
}
