//! RawMessage / BoxedMessage
//!
//! - RawMessage: bus から受け取ったままの形（body + broker properties）
//! - BoxedMessage: callback に渡す形（decode 済み payload + properties）

use serde::{Deserialize, Serialize};

use super::codec;

/// Bus-side identity / retry metadata, kept opaque by the worker.
pub type BrokerProperties = serde_json::Map<String, serde_json::Value>;

/// Well-known broker property keys.
pub mod props {
    pub const MESSAGE_ID: &str = "MessageId";
    pub const LOCK_TOKEN: &str = "LockToken";
    pub const LOCKED_UNTIL_UTC: &str = "LockedUntilUtc";
    pub const SEQUENCE_NUMBER: &str = "SequenceNumber";
    pub const DELIVERY_COUNT: &str = "DeliveryCount";
    pub const ENQUEUED_TIME_UTC: &str = "EnqueuedTimeUtc";
}

/// A message exactly as the bus handed it over.
///
/// The worker keeps this around for the whole cycle because `delete_message`
/// needs the original broker properties (lock token etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    body: String,
    broker_properties: BrokerProperties,
}

impl RawMessage {
    pub fn new(body: impl Into<String>, broker_properties: BrokerProperties) -> Self {
        Self {
            body: body.into(),
            broker_properties,
        }
    }

    /// Builds a message from raw bytes; invalid UTF-8 is replaced lossily.
    pub fn from_bytes(body: &[u8], broker_properties: BrokerProperties) -> Self {
        Self::new(String::from_utf8_lossy(body), broker_properties)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn broker_properties(&self) -> &BrokerProperties {
        &self.broker_properties
    }

    /// `MessageId` property, if the bus set one. Only used for log context.
    pub fn message_id(&self) -> Option<&str> {
        self.property_str(props::MESSAGE_ID)
    }

    pub fn lock_token(&self) -> Option<&str> {
        self.property_str(props::LOCK_TOKEN)
    }

    fn property_str(&self, key: &str) -> Option<&str> {
        self.broker_properties.get(key).and_then(|v| v.as_str())
    }
}

/// Decoded payload handed to the callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Body parsed as JSON.
    Structured(serde_json::Value),
    /// Body that did not parse; kept byte-for-byte.
    Raw(String),
}

impl Payload {
    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Structured(v) => Some(v),
            Payload::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Payload::Structured(_) => None,
            Payload::Raw(s) => Some(s),
        }
    }

    /// Deserialize a structured payload into `T`.
    ///
    /// Raw payloads are tried as a JSON string value, so a handler expecting
    /// `String` still gets the text.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Payload::Structured(v) => T::deserialize(v),
            Payload::Raw(s) => T::deserialize(serde_json::Value::String(s.clone())),
        }
    }
}

/// The callback-facing view of one received message.
///
/// Lives for exactly one cycle: built right before the callback runs and
/// dropped once it settles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxedMessage {
    payload: Payload,
    properties: BrokerProperties,
}

impl BoxedMessage {
    pub fn from_raw(raw: &RawMessage) -> Self {
        Self {
            payload: codec::decode(raw.body()),
            properties: raw.broker_properties().clone(),
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn properties(&self) -> &BrokerProperties {
        &self.properties
    }

    pub fn into_parts(self) -> (Payload, BrokerProperties) {
        (self.payload, self.properties)
    }
}
