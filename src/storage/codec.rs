//! Event encoding.
//!
//! The engine treats encoded events as opaque bytes; the only contract is that
//! `decode(encode(e)) == e`.

use crate::core::Result;
use crate::transaction::change::EventRecord;

pub trait EventCodec: Send + Sync {
    fn encode(&self, event: &EventRecord) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<EventRecord>;
}

/// Compact binary encoding (default).
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackCodec;

impl EventCodec for MessagePackCodec {
    fn encode(&self, event: &EventRecord) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(event)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<EventRecord> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Human-readable encoding, handy when inspecting a store by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl EventCodec for JsonCodec {
    fn encode(&self, event: &EventRecord) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(event)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<EventRecord> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActorId, Address, EngineError, Value};
    use crate::transaction::change::Effect;

    fn sample() -> EventRecord {
        EventRecord {
            revision: 12,
            index: 1,
            actor: Some(ActorId::new("bob")),
            effect: Effect::Change {
                target: Address::field("m", "o", "f"),
                old_revision: 4,
                old_value: Some(Value::Text("before".into())),
                new_value: Some(Value::Float(2.5)),
            },
            in_transaction: true,
        }
    }

    #[test]
    fn test_both_codecs_preserve_events() {
        let codecs: Vec<Box<dyn EventCodec>> = vec![Box::new(MessagePackCodec), Box::new(JsonCodec)];
        for codec in codecs {
            let bytes = codec.encode(&sample()).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), sample());
        }
    }

    #[test]
    fn test_corrupt_bytes_are_codec_errors() {
        assert!(matches!(
            MessagePackCodec.decode(&[0xc1]),
            Err(EngineError::Codec(_))
        ));
        assert!(matches!(
            JsonCodec.decode(b"{not json"),
            Err(EngineError::Codec(_))
        ));
    }
}
