use std::fmt;

use amqp_wire::types::{FieldTable, LongLongUint, Octect, ShortStr, ShortUint, TimeStamp};
use serde::{
    de::{self, Visitor},
    ser::{self, SerializeStruct},
    Deserialize, Serialize,
};

use super::Frame;

/// Non-persistent delivery mode.
pub const DELIVERY_MODE_TRANSIENT: Octect = 1;
/// Persistent delivery mode.
pub const DELIVERY_MODE_PERSISTENT: Octect = 2;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContentHeader {
    pub common: ContentHeaderCommon,
    pub basic_properties: BasicProperties,
}

impl ContentHeader {
    pub fn new(common: ContentHeaderCommon, basic_properties: BasicProperties) -> Self {
        Self {
            common,
            basic_properties,
        }
    }

    pub fn body_size(&self) -> LongLongUint {
        self.common.body_size
    }

    pub fn into_frame(self) -> Frame {
        Frame::ContentHeader(self)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ContentHeaderCommon {
    pub class: ShortUint,
    pub weight: ShortUint,
    pub body_size: LongLongUint,
}

mod flag {
    use amqp_wire::types::ShortUint;
    pub const CONTENT_TYPE: ShortUint = 1 << 15;
    pub const CONTENT_ENCODING: ShortUint = 1 << 14;
    pub const HEADERS: ShortUint = 1 << 13;
    pub const DELIVERY_MODE: ShortUint = 1 << 12;
    pub const PRIORITY: ShortUint = 1 << 11;
    pub const CORRELATION_ID: ShortUint = 1 << 10;
    pub const REPLY_TO: ShortUint = 1 << 9;
    pub const EXPIRATION: ShortUint = 1 << 8;
    pub const MESSAGE_ID: ShortUint = 1 << 7;
    pub const TIMESTAMP: ShortUint = 1 << 6;
    pub const TYPE: ShortUint = 1 << 5;
    pub const USER_ID: ShortUint = 1 << 4;
    pub const APP_ID: ShortUint = 1 << 3;
    pub const CLUSTER_ID: ShortUint = 1 << 2;
}

/// Properties of the basic content class.
///
/// The property flags are derived from the fields that are set, so only
/// present properties go on the wire. String properties longer than 255
/// bytes fail at encoding time.
///
/// ```
/// # use amqp_engine::frame::BasicProperties;
/// let props = BasicProperties::default()
///     .with_content_type("application/json")
///     .with_persistence(true)
///     .finish();
/// assert_eq!(Some(2), props.delivery_mode());
/// ```
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BasicProperties {
    content_type: Option<String>,
    content_encoding: Option<String>,
    headers: Option<FieldTable>,
    delivery_mode: Option<Octect>,
    priority: Option<Octect>,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    expiration: Option<String>,
    message_id: Option<String>,
    timestamp: Option<TimeStamp>,
    typ: Option<String>,
    user_id: Option<String>,
    app_id: Option<String>,
    cluster_id: Option<String>,
}

macro_rules! impl_property_accessors {
    ($($field:ident, $setter:ident;)+) => {
        $(
            pub fn $field(&self) -> Option<&str> {
                self.$field.as_deref()
            }

            pub fn $setter(&mut self, value: &str) -> &mut Self {
                self.$field = Some(value.to_owned());
                self
            }
        )+
    };
}

impl BasicProperties {
    impl_property_accessors! {
        content_type, with_content_type;
        content_encoding, with_content_encoding;
        correlation_id, with_correlation_id;
        reply_to, with_reply_to;
        expiration, with_expiration;
        message_id, with_message_id;
        typ, with_type;
        user_id, with_user_id;
        app_id, with_app_id;
        cluster_id, with_cluster_id;
    }

    pub fn headers(&self) -> Option<&FieldTable> {
        self.headers.as_ref()
    }

    pub fn with_headers(&mut self, headers: FieldTable) -> &mut Self {
        self.headers = Some(headers);
        self
    }

    pub fn delivery_mode(&self) -> Option<Octect> {
        self.delivery_mode
    }

    pub fn with_delivery_mode(&mut self, mode: Octect) -> &mut Self {
        self.delivery_mode = Some(mode);
        self
    }

    pub fn with_persistence(&mut self, persistent: bool) -> &mut Self {
        let mode = if persistent {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        };
        self.with_delivery_mode(mode)
    }

    pub fn priority(&self) -> Option<Octect> {
        self.priority
    }

    pub fn with_priority(&mut self, priority: Octect) -> &mut Self {
        self.priority = Some(priority);
        self
    }

    pub fn timestamp(&self) -> Option<TimeStamp> {
        self.timestamp
    }

    pub fn with_timestamp(&mut self, timestamp: TimeStamp) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }

    pub fn property_flags(&self) -> ShortUint {
        let mut flags = 0;
        let mut mark = |present: bool, bit: ShortUint| {
            if present {
                flags |= bit;
            }
        };
        mark(self.content_type.is_some(), flag::CONTENT_TYPE);
        mark(self.content_encoding.is_some(), flag::CONTENT_ENCODING);
        mark(self.headers.is_some(), flag::HEADERS);
        mark(self.delivery_mode.is_some(), flag::DELIVERY_MODE);
        mark(self.priority.is_some(), flag::PRIORITY);
        mark(self.correlation_id.is_some(), flag::CORRELATION_ID);
        mark(self.reply_to.is_some(), flag::REPLY_TO);
        mark(self.expiration.is_some(), flag::EXPIRATION);
        mark(self.message_id.is_some(), flag::MESSAGE_ID);
        mark(self.timestamp.is_some(), flag::TIMESTAMP);
        mark(self.typ.is_some(), flag::TYPE);
        mark(self.user_id.is_some(), flag::USER_ID);
        mark(self.app_id.is_some(), flag::APP_ID);
        mark(self.cluster_id.is_some(), flag::CLUSTER_ID);
        flags
    }
}

fn short_str<E: ser::Error>(value: &Option<String>) -> Result<Option<ShortStr>, E> {
    value
        .as_deref()
        .map(ShortStr::try_from)
        .transpose()
        .map_err(E::custom)
}

impl Serialize for BasicProperties {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("BasicProperties", 15)?;
        state.serialize_field("property_flags", &self.property_flags())?;
        state.serialize_field("content_type", &short_str(&self.content_type)?)?;
        state.serialize_field("content_encoding", &short_str(&self.content_encoding)?)?;
        state.serialize_field("headers", &self.headers)?;
        state.serialize_field("delivery_mode", &self.delivery_mode)?;
        state.serialize_field("priority", &self.priority)?;
        state.serialize_field("correlation_id", &short_str(&self.correlation_id)?)?;
        state.serialize_field("reply_to", &short_str(&self.reply_to)?)?;
        state.serialize_field("expiration", &short_str(&self.expiration)?)?;
        state.serialize_field("message_id", &short_str(&self.message_id)?)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("typ", &short_str(&self.typ)?)?;
        state.serialize_field("user_id", &short_str(&self.user_id)?)?;
        state.serialize_field("app_id", &short_str(&self.app_id)?)?;
        state.serialize_field("cluster_id", &short_str(&self.cluster_id)?)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for BasicProperties {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        const FIELDS: &[&str] = &[
            "property_flags",
            "content_type",
            "content_encoding",
            "headers",
            "delivery_mode",
            "priority",
            "correlation_id",
            "reply_to",
            "expiration",
            "message_id",
            "timestamp",
            "typ",
            "user_id",
            "app_id",
            "cluster_id",
        ];

        struct BasicPropertiesVisitor;

        impl<'de> Visitor<'de> for BasicPropertiesVisitor {
            type Value = BasicProperties;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("struct BasicProperties")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let flags: ShortUint = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;

                // reads the next property if its flag is set
                fn read<'de, A, T>(
                    seq: &mut A,
                    flags: ShortUint,
                    bit: ShortUint,
                    index: usize,
                ) -> Result<Option<T>, A::Error>
                where
                    A: de::SeqAccess<'de>,
                    T: Deserialize<'de>,
                {
                    if flags & bit == 0 {
                        return Ok(None);
                    }
                    seq.next_element::<T>()?
                        .map(Some)
                        .ok_or_else(|| de::Error::invalid_length(index, &"a present property"))
                }
                let string = |v: Option<ShortStr>| v.map(String::from);

                Ok(BasicProperties {
                    content_type: string(read(&mut seq, flags, flag::CONTENT_TYPE, 1)?),
                    content_encoding: string(read(&mut seq, flags, flag::CONTENT_ENCODING, 2)?),
                    headers: read(&mut seq, flags, flag::HEADERS, 3)?,
                    delivery_mode: read(&mut seq, flags, flag::DELIVERY_MODE, 4)?,
                    priority: read(&mut seq, flags, flag::PRIORITY, 5)?,
                    correlation_id: string(read(&mut seq, flags, flag::CORRELATION_ID, 6)?),
                    reply_to: string(read(&mut seq, flags, flag::REPLY_TO, 7)?),
                    expiration: string(read(&mut seq, flags, flag::EXPIRATION, 8)?),
                    message_id: string(read(&mut seq, flags, flag::MESSAGE_ID, 9)?),
                    timestamp: read(&mut seq, flags, flag::TIMESTAMP, 10)?,
                    typ: string(read(&mut seq, flags, flag::TYPE, 11)?),
                    user_id: string(read(&mut seq, flags, flag::USER_ID, 12)?),
                    app_id: string(read(&mut seq, flags, flag::APP_ID, 13)?),
                    cluster_id: string(read(&mut seq, flags, flag::CLUSTER_ID, 14)?),
                })
            }
        }
        deserializer.deserialize_struct("BasicProperties", FIELDS, BasicPropertiesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use amqp_wire::{
        from_bytes, to_bytes,
        types::{FieldTable, FieldValue},
    };

    use super::BasicProperties;

    #[test]
    fn test_empty_properties() {
        let props = BasicProperties::default();
        assert_eq!(0, props.property_flags());
        assert_eq!(vec![0, 0], to_bytes(&props).unwrap());
    }

    #[test]
    fn test_sparse_properties() {
        let mut headers = FieldTable::new();
        headers.insert(
            "k".try_into().unwrap(),
            FieldValue::S("v".try_into().unwrap()),
        );
        let props = BasicProperties::default()
            .with_content_type("text/plain")
            .with_headers(headers)
            .with_persistence(true)
            .with_timestamp(1_700_000_000)
            .with_cluster_id("c1")
            .finish();
        assert_eq!(0b1011_0000_0100_0100, props.property_flags());

        let bytes = to_bytes(&props).unwrap();
        let decoded: BasicProperties = from_bytes(&bytes).unwrap();
        assert_eq!(props, decoded);
        assert_eq!(Some("text/plain"), decoded.content_type());
        assert_eq!(None, decoded.reply_to());
        assert_eq!(Some(1_700_000_000), decoded.timestamp());
    }

    #[test]
    fn test_oversized_property_fails_encoding() {
        let props = BasicProperties::default()
            .with_message_id(&"m".repeat(256))
            .finish();
        assert!(to_bytes(&props).is_err());
    }
}
