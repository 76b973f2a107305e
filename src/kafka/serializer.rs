use crate::Result;
use bytes::Bytes;
use serde::Serialize;
use std::marker::PhantomData;

/// Turns a record value into the bytes written to the topic.
pub trait MessageSerializer<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<Bytes>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    Json,
    #[default]
    JsonCompact,
}

pub struct JsonSerializer<T> {
    format: SerializationFormat,
    _record: PhantomData<fn(&T)>,
}

impl<T> JsonSerializer<T> {
    pub fn new(format: SerializationFormat) -> Self {
        Self {
            format,
            _record: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new(SerializationFormat::default())
    }
}

impl<T: Serialize> MessageSerializer<T> for JsonSerializer<T> {
    fn serialize(&self, value: &T) -> Result<Bytes> {
        let encoded = match self.format {
            SerializationFormat::Json => serde_json::to_vec_pretty(value)?,
            SerializationFormat::JsonCompact => serde_json::to_vec(value)?,
        };
        Ok(Bytes::from(encoded))
    }
}

/// Writes string values as their UTF-8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl<T: AsRef<str>> MessageSerializer<T> for StringSerializer {
    fn serialize(&self, value: &T) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(value.as_ref().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_formats() {
        let value = json!({"id": 1, "status": "created"});

        let compact = JsonSerializer::new(SerializationFormat::JsonCompact)
            .serialize(&value)
            .unwrap();
        assert_eq!(&compact[..], br#"{"id":1,"status":"created"}"#);

        let pretty = JsonSerializer::new(SerializationFormat::Json)
            .serialize(&value)
            .unwrap();
        let pretty = std::str::from_utf8(&pretty).unwrap();
        assert!(pretty.contains("\"status\": \"created\""));
        assert!(pretty.contains('\n'));
    }

    #[test]
    fn test_string_serializer_passes_text_through() {
        let bytes = StringSerializer.serialize(&"héllo".to_string()).unwrap();
        assert_eq!(&bytes[..], "héllo".as_bytes());
    }
}
