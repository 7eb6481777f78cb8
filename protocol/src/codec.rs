use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::Envelope;

#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode envelope at byte {offset}: {source}")]
    Decode {
        offset: usize,
        #[source]
        source: rmp_serde::decode::Error,
    },
    #[error("frame has {0} trailing bytes after the envelope")]
    Trailing(usize),
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, MessageError> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

/// Concatenates several envelopes into one frame.
pub fn encode_batch<'a, I>(envelopes: I) -> Result<Vec<u8>, MessageError>
where
    I: IntoIterator<Item = &'a Envelope>,
{
    let mut buf = Vec::new();
    for env in envelopes {
        env.serialize(&mut rmp_serde::Serializer::new(&mut buf).with_struct_map())?;
    }
    Ok(buf)
}

/// Decodes a frame that must contain exactly one envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope, MessageError> {
    let mut frames = decode_multi(bytes);
    let env = match frames.next() {
        Some(res) => res?,
        None => {
            return Err(MessageError::Decode {
                offset: 0,
                source: rmp_serde::decode::Error::LengthMismatch(0),
            })
        }
    };
    match bytes.len() - frames.offset {
        0 => Ok(env),
        n => Err(MessageError::Trailing(n)),
    }
}

pub fn decode_multi(bytes: &[u8]) -> FrameDecoder<'_> {
    FrameDecoder {
        bytes,
        offset: 0,
        failed: false,
    }
}

/// Yields the envelopes of a frame in order. The first malformed envelope is
/// yielded as an error and ends the iteration, the bytes after it are lost.
pub struct FrameDecoder<'a> {
    bytes: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> FrameDecoder<'a> {
    /// Number of bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for FrameDecoder<'a> {
    type Item = Result<Envelope, MessageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }

        let mut cursor = Cursor::new(&self.bytes[self.offset..]);
        let res = {
            let mut de = rmp_serde::Deserializer::new(&mut cursor);
            Envelope::deserialize(&mut de)
        };

        match res {
            Ok(env) => {
                self.offset += cursor.position() as usize;
                Some(Ok(env))
            }
            Err(source) => {
                self.failed = true;
                Some(Err(MessageError::Decode {
                    offset: self.offset,
                    source,
                }))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Body, Kind};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn test_batched_frame() {
        let envs = vec![
            Envelope::new(Kind::CmdResult, "a").with_msg_id("s1"),
            Envelope::new(Kind::HmrReload, "/index.html"),
            Envelope::broadcast("hi").with_origin("c7"),
        ];
        let frame = encode_batch(&envs).unwrap();
        let decoded: Vec<Envelope> = decode_multi(&frame).collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded, envs);
    }

    #[test]
    fn test_garbage_mid_frame_keeps_earlier_envelopes() {
        let first = Envelope::new(Kind::CmdResult, "ok").with_msg_id("s1");
        let mut frame = encode(&first).unwrap();
        frame.extend_from_slice(&[0xc1, 0x00, 0x01]);
        frame.extend(encode(&Envelope::new(Kind::HmrReload, "/x")).unwrap());

        let mut it = decode_multi(&frame);
        assert_eq!(it.next().unwrap().unwrap(), first);
        assert!(matches!(
            it.next(),
            Some(Err(MessageError::Decode { .. }))
        ));
        assert!(it.next().is_none());
    }

    #[test]
    fn test_decode_rejects_trailing() {
        let frame = encode_batch(&[Envelope::cmd("a"), Envelope::cmd("b")]).unwrap();
        assert!(matches!(decode(&frame), Err(MessageError::Trailing(_))));
        assert!(decode(&[]).is_err());
    }

    #[derive(Serialize)]
    struct LegacyBroadcast<'a> {
        #[serde(rename = "type")]
        kind: &'a str,
        body: &'a str,
        id: u64,
    }

    #[test]
    fn test_numeric_origin_and_missing_body() {
        let legacy = rmp_serde::to_vec_named(&LegacyBroadcast {
            kind: "broadcast",
            body: "hello",
            id: 3,
        })
        .unwrap();
        let env = decode(&legacy).unwrap();
        assert_eq!(env.kind(), Kind::Broadcast);
        assert_eq!(env.origin(), Some("3"));
        assert_eq!(env.msg_id(), None);

        let mut bare = BTreeMap::new();
        bare.insert("type", "hmr::reload");
        let env = decode(&rmp_serde::to_vec_named(&bare).unwrap()).unwrap();
        assert_eq!(env.body(), &Body::default());
    }

    #[test]
    fn test_bytes_body_survives() {
        let env = Envelope::new(Kind::CmdResult, vec![0u8, 159, 146, 150]).with_msg_id("s2");
        let back = decode(&encode(&env).unwrap()).unwrap();
        assert_eq!(back.body(), &Body::Bytes(vec![0u8, 159, 146, 150]));
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let env = decode(&encode(&Envelope::new(Kind::from("x::y"), "")).unwrap()).unwrap();
        assert_eq!(env.kind(), Kind::Other("x::y".to_string()));
        assert_eq!(env.type_str(), "x::y");
    }
}
