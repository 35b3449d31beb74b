// src/serialization/codec.rs
//! Message codec
//!
//! Wire form: one compact JSON object per message with the fields in the
//! order `id, sender, recipient, content, timestamp`. Decoding ignores
//! unknown fields and rejects duplicate known fields.

use crate::backend::{global_resolver, Backend, BackendResolver, Component};
use crate::utils::errors::{EngineError, Result};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{info, trace};

const FIELDS: [&str; 5] = ["id", "sender", "recipient", "content", "timestamp"];

/// Agent message. Fields are fixed once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    id: String,
    sender: String,
    recipient: String,
    content: String,
    /// Epoch seconds
    timestamp: i64,
}

impl Message {
    /// Message stamped with the current epoch second
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::with_timestamp(id, sender, recipient, content, chrono::Utc::now().timestamp())
    }

    pub fn with_timestamp(
        id: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
            timestamp,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Canonical JSON text
    pub fn to_json(&self) -> Result<String> {
        NativeCodec.encode(self)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        NativeCodec.decode(text)
    }
}

trait CodecBackend: Send + Sync {
    fn encode(&self, message: &Message) -> Result<String>;
    fn decode(&self, text: &str) -> Result<Message>;
}

fn malformed(e: impl fmt::Display) -> EngineError {
    metrics::counter!("accelerate_codec_failures_total").increment(1);
    EngineError::MalformedMessage(e.to_string())
}

/// Typed serde path
struct NativeCodec;

impl CodecBackend for NativeCodec {
    fn encode(&self, message: &Message) -> Result<String> {
        serde_json::to_string(message).map_err(malformed)
    }

    fn decode(&self, text: &str) -> Result<Message> {
        // The derived impl would also accept a positional array
        if !text.trim_start().starts_with('{') {
            return Err(malformed("expected a JSON object"));
        }
        serde_json::from_str(text).map_err(malformed)
    }
}

/// Field-by-field path over dynamic JSON values
struct FallbackCodec;

impl CodecBackend for FallbackCodec {
    fn encode(&self, message: &Message) -> Result<String> {
        let mut object = Map::new();
        object.insert("id".into(), Value::String(message.id.clone()));
        object.insert("sender".into(), Value::String(message.sender.clone()));
        object.insert("recipient".into(), Value::String(message.recipient.clone()));
        object.insert("content".into(), Value::String(message.content.clone()));
        object.insert("timestamp".into(), Value::from(message.timestamp));
        Ok(Value::Object(object).to_string())
    }

    fn decode(&self, text: &str) -> Result<Message> {
        let StrictObject(object) = serde_json::from_str(text).map_err(malformed)?;
        Self::message_from(object)
    }
}

impl FallbackCodec {
    fn message_from(object: Map<String, Value>) -> Result<Message> {
        let text = |key: &str| -> Result<String> {
            match object.get(key) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(other) => Err(malformed(format!(
                    "field `{}` must be a string, got {}",
                    key, other
                ))),
                None => Err(malformed(format!("missing field `{}`", key))),
            }
        };

        let timestamp = match object.get("timestamp") {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| malformed(format!("field `timestamp` must be an integer, got {}", n)))?,
            Some(other) => {
                return Err(malformed(format!(
                    "field `timestamp` must be an integer, got {}",
                    other
                )))
            }
            None => return Err(malformed("missing field `timestamp`")),
        };

        Ok(Message {
            id: text("id")?,
            sender: text("sender")?,
            recipient: text("recipient")?,
            content: text("content")?,
            timestamp,
        })
    }
}

/// JSON object that refuses a repeated message field
struct StrictObject(Map<String, Value>);

impl<'de> Deserialize<'de> for StrictObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ObjectVisitor;

        impl<'de> Visitor<'de> for ObjectVisitor {
            type Value = StrictObject;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<StrictObject, A::Error> {
                let mut object = Map::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    if FIELDS.contains(&key.as_str()) && object.contains_key(&key) {
                        return Err(de::Error::custom(format!("duplicate field `{}`", key)));
                    }
                    object.insert(key, value);
                }
                Ok(StrictObject(object))
            }
        }

        deserializer.deserialize_map(ObjectVisitor)
    }
}

/// Message codec
pub struct MessageCodec {
    backend: Backend,
    inner: Box<dyn CodecBackend>,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::with_resolver(global_resolver())
    }

    pub fn with_resolver(resolver: &BackendResolver) -> Self {
        Self::with_backend(resolver.resolve(Component::Serialization))
    }

    pub fn with_backend(backend: Backend) -> Self {
        let inner: Box<dyn CodecBackend> = match backend {
            Backend::Native => Box::new(NativeCodec),
            Backend::Fallback => Box::new(FallbackCodec),
        };
        info!("Message codec ready ({} backend)", backend);
        Self { backend, inner }
    }

    pub fn implementation(&self) -> Backend {
        self.backend
    }

    pub fn encode(&self, message: &Message) -> Result<String> {
        self.inner.encode(message)
    }

    pub fn decode(&self, text: &str) -> Result<Message> {
        trace!("Decoding message ({} bytes)", text.len());
        self.inner.decode(text)
    }

    pub fn encode_batch(&self, messages: &[Message]) -> Vec<Result<String>> {
        messages.iter().map(|m| self.encode(m)).collect()
    }

    pub fn decode_batch<S: AsRef<str>>(&self, texts: &[S]) -> Vec<Result<Message>> {
        texts.iter().map(|t| self.decode(t.as_ref())).collect()
    }

    /// Encode as one JSON array of message objects
    pub fn encode_array(&self, messages: &[Message]) -> Result<String> {
        let parts = messages
            .iter()
            .map(|m| self.encode(m))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("[{}]", parts.join(",")))
    }

    /// Decode a JSON array of message objects. The outer text must be an
    /// array; each element goes through [`decode`](Self::decode) on its own.
    pub fn decode_array(&self, text: &str) -> Result<Vec<Result<Message>>> {
        let elements: Vec<Box<RawValue>> = serde_json::from_str(text).map_err(malformed)?;
        Ok(elements
            .iter()
            .map(|element| self.decode(element.get()))
            .collect())
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::ErrorKind;
    use proptest::prelude::*;

    fn codecs() -> Vec<MessageCodec> {
        vec![
            MessageCodec::with_backend(Backend::Native),
            MessageCodec::with_backend(Backend::Fallback),
        ]
    }

    fn sample() -> Message {
        Message::with_timestamp("m1", "alice", "bob", "hello \"world\"\n", 1_700_000_000)
    }

    #[test]
    fn test_canonical_encoding() {
        for codec in codecs() {
            assert_eq!(
                codec.encode(&sample()).unwrap(),
                r#"{"id":"m1","sender":"alice","recipient":"bob","content":"hello \"world\"\n","timestamp":1700000000}"#
            );
        }
    }

    #[test]
    fn test_round_trip() {
        for codec in codecs() {
            let text = codec.encode(&sample()).unwrap();
            assert_eq!(codec.decode(&text).unwrap(), sample());
        }
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        for codec in codecs() {
            let text = r#"{"timestamp":5,"extra":[1,2],"content":"c","recipient":"r","sender":"s","id":"i"}"#;
            let message = codec.decode(text).unwrap();
            assert_eq!(message, Message::with_timestamp("i", "s", "r", "c", 5));
        }
    }

    #[test]
    fn test_malformed_inputs() {
        let bad = [
            "",
            "not json",
            "[]",
            r#"["i","s","r","c",1]"#,
            r#"{"id":"i","sender":"s","recipient":"r","content":"c"}"#,
            r#"{"id":1,"sender":"s","recipient":"r","content":"c","timestamp":1}"#,
            r#"{"id":"i","sender":"s","recipient":"r","content":"c","timestamp":"1"}"#,
            r#"{"id":"i","sender":"s","recipient":"r","content":"c","timestamp":1.5}"#,
            r#"{"id":"i","sender":null,"recipient":"r","content":"c","timestamp":1}"#,
            r#"{"id":"i","id":"j","sender":"s","recipient":"r","content":"c","timestamp":1}"#,
            r#"{"id":"i","sender":"s","recipient":"r","content":"c","timestamp":1} trailing"#,
        ];
        for codec in codecs() {
            for text in bad {
                let err = codec.decode(text).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::MalformedMessage, "input: {}", text);
            }
        }
    }

    #[test]
    fn test_batches_report_per_element() {
        for codec in codecs() {
            let good = codec.encode(&sample()).unwrap();
            let results = codec.decode_batch(&[good.as_str(), "{}", good.as_str()]);
            assert_eq!(results.len(), 3);
            assert!(results[0].is_ok());
            assert!(results[1].is_err());
            assert_eq!(results[2].as_ref().unwrap(), &sample());

            let encoded = codec.encode_batch(&[sample(), sample()]);
            assert_eq!(encoded.len(), 2);
            assert!(encoded.iter().all(|r| r.as_ref().unwrap() == &good));
        }
    }

    #[test]
    fn test_array_form() {
        for codec in codecs() {
            let messages = vec![sample(), Message::with_timestamp("m2", "b", "a", "", -1)];
            let text = codec.encode_array(&messages).unwrap();
            assert!(text.starts_with('['));

            let decoded: Vec<Message> = codec
                .decode_array(&text)
                .unwrap()
                .into_iter()
                .collect::<Result<_>>()
                .unwrap();
            assert_eq!(decoded, messages);

            let mixed = codec.decode_array(r#"[{"id":"x"}, 3]"#).unwrap();
            assert_eq!(mixed.len(), 2);
            assert!(mixed.iter().all(|r| r.is_err()));

            assert!(codec.decode_array("{}").is_err());
            assert_eq!(codec.encode_array(&[]).unwrap(), "[]");
        }
    }

    #[test]
    fn test_array_elements_decode_like_single_messages() {
        let elements = [
            r#"{"id":"i","id":"j","sender":"s","recipient":"r","content":"c","timestamp":1}"#,
            r#"{"id":"i","sender":"s","recipient":"r","content":"c","timestamp":1,"timestamp":2}"#,
            r#"{"id":"i","sender":"s","recipient":"r","content":"c","timestamp":1.5}"#,
            r#"["i","s","r","c",1]"#,
            r#"{"id":"i","sender":"s","recipient":"r","content":"c","timestamp":1,"x":0,"x":1}"#,
        ];
        for codec in codecs() {
            let text = format!("[{}]", elements.join(","));
            let decoded = codec.decode_array(&text).unwrap();
            assert_eq!(decoded.len(), elements.len());

            for (element, result) in elements.iter().zip(&decoded) {
                match (codec.decode(element), result) {
                    (Ok(single), Ok(from_array)) => assert_eq!(&single, from_array),
                    (Err(_), Err(e)) => assert_eq!(e.kind(), ErrorKind::MalformedMessage),
                    (single, from_array) => {
                        panic!("{}: {:?} vs {:?}", element, single, from_array)
                    }
                }
            }
            assert!(decoded[0].is_err());
            assert!(decoded[4].is_ok());
        }
    }

    #[test]
    fn test_message_helpers() {
        let before = chrono::Utc::now().timestamp();
        let message = Message::new("id", "a", "b", "hi");
        assert!(message.timestamp() >= before);
        assert_eq!(Message::from_json(&message.to_json().unwrap()).unwrap(), message);
    }

    proptest! {
        #[test]
        fn prop_round_trip_and_backends_agree(
            id in ".*",
            sender in ".*",
            recipient in ".*",
            content in ".*",
            timestamp in any::<i64>(),
        ) {
            let message = Message::with_timestamp(id, sender, recipient, content, timestamp);
            let native = MessageCodec::with_backend(Backend::Native);
            let fallback = MessageCodec::with_backend(Backend::Fallback);

            let a = native.encode(&message).unwrap();
            let b = fallback.encode(&message).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(native.decode(&a).unwrap(), message.clone());
            prop_assert_eq!(fallback.decode(&b).unwrap(), message);
        }
    }
}
