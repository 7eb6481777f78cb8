use std::{borrow::Cow, fmt};

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::Kind;

/// Payload of an envelope. Command output and paths are text, file contents
/// written by other tools may come back as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Bytes(Vec<u8>),
}

impl Body {
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Body::Text(s) => Cow::Borrowed(s),
            Body::Bytes(b) => String::from_utf8_lossy(b),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Body::Text(s) => s,
            Body::Bytes(b) => match String::from_utf8(b) {
                Ok(s) => s,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Body::Text(s) => s.is_empty(),
            Body::Bytes(b) => b.is_empty(),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Text(String::new())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::Bytes(b)
    }
}

impl Serialize for Body {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Body::Text(s) => serializer.serialize_str(s),
            Body::Bytes(b) => serializer.serialize_bytes(b),
        }
    }
}

struct BodyVisitor;

impl<'de> Visitor<'de> for BodyVisitor {
    type Value = Body;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string or a byte array")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Body, E> {
        Ok(Body::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Body, E> {
        Ok(Body::Text(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Body, E> {
        Ok(Body::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Body, E> {
        Ok(Body::Bytes(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Body, E> {
        Ok(Body::default())
    }

    fn visit_none<E: de::Error>(self) -> Result<Body, E> {
        Ok(Body::default())
    }
}

impl<'de> Deserialize<'de> for Body {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(BodyVisitor)
    }
}

/// The `id` of a broadcast. Older backends send the numeric connection id.
struct OriginVisitor;

impl<'de> Visitor<'de> for OriginVisitor {
    type Value = Option<String>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a client id as string or unsigned integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v.to_string()))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_any(OriginVisitor)
    }
}

fn deserialize_origin<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    d.deserialize_any(OriginVisitor)
}

/// The unit of communication in both directions, encoded as a msgpack map
/// with the keys `type`, `body`, `msg_id` and `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: Body,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    msg_id: Option<String>,
    #[serde(
        rename = "id",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_origin"
    )]
    origin: Option<String>,
}

impl Envelope {
    pub fn new(kind: Kind, body: impl Into<Body>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            body: body.into(),
            msg_id: None,
            origin: None,
        }
    }

    pub fn cmd(command: impl Into<String>) -> Self {
        Self::new(Kind::Cmd, command.into())
    }

    pub fn broadcast(body: impl Into<Body>) -> Self {
        Self::new(Kind::Broadcast, body)
    }

    /// A reply carrying the same `msg_id` as `self`.
    pub fn reply(&self, kind: Kind, body: impl Into<Body>) -> Self {
        Self {
            msg_id: self.msg_id.clone(),
            ..Self::new(kind, body)
        }
    }

    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn kind(&self) -> Kind {
        Kind::from(self.kind.as_str())
    }

    pub fn type_str(&self) -> &str {
        &self.kind
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.msg_id.as_deref()
    }

    pub fn set_msg_id(&mut self, msg_id: impl Into<String>) {
        self.msg_id = Some(msg_id.into());
    }

    /// Client id of whoever sent a broadcast.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn set_origin(&mut self, origin: impl Into<String>) {
        self.origin = Some(origin.into());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reply_keeps_msg_id() {
        let req = Envelope::cmd("ls").with_msg_id("s1");
        let rep = req.reply(Kind::CmdResult, "[]");
        assert_eq!(rep.msg_id(), Some("s1"));
        assert_eq!(rep.kind(), Kind::CmdResult);
        assert_eq!(rep.origin(), None);
    }

    #[test]
    fn test_bytes_body_as_text() {
        let body = Body::Bytes(b"hello".to_vec());
        assert_eq!(body.as_text(), "hello");
        assert_eq!(body.into_text(), "hello");
        assert!(Body::default().is_empty());
    }
}
