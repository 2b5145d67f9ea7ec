//! Canonical serialization used by both `sign` and `verify` (spec §4.3,
//! §9 "Signature canonicalization"). `serde_json::Value`'s object type is a
//! `BTreeMap` by default (the `preserve_order` feature is not enabled in
//! this crate), so building the value below and serializing it already
//! yields sorted-key, whitespace-free JSON — no extra canonicalization pass
//! is needed beyond constructing the `Value` ourselves field by field.

use crate::types::{Message, Signature};

/// Serializes `message` as it looked when `signatures` (a prefix of, or
/// equal to, `message.signatures`) was the tail a signer last saw — i.e.
/// with the `signatures` field replaced by `signatures`. Both `sign` and
/// `verify` call this with the appropriate prefix.
pub fn canonical_with_signatures(message: &Message, signatures: &[Signature]) -> Vec<u8> {
    let value = serde_json::json!({
        "address": message.address,
        "app_id": message.app_id,
        "data": message.data,
        "destination": &message.destination,
        "id": message.id,
        "signatures": signatures,
        "ttl": message.ttl,
        "type": message.kind,
    });
    serde_json::to_vec(&value).expect("canonical message is always serializable")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Destination;

    fn sample() -> Message {
        Message {
            id: "m1".into(),
            address: "addr-a".into(),
            app_id: "chat".into(),
            ttl: 6,
            kind: "text".into(),
            destination: Destination::Wildcard,
            data: serde_json::json!({"b": 1, "a": 2}),
            signatures: vec![],
        }
    }

    #[test]
    fn is_deterministic_across_calls() {
        let m = sample();
        let a = canonical_with_signatures(&m, &m.signatures);
        let b = canonical_with_signatures(&m, &m.signatures);
        assert_eq!(a, b);
    }

    #[test]
    fn changes_with_any_field() {
        let m = sample();
        let base = canonical_with_signatures(&m, &m.signatures);
        let mut m2 = m.clone();
        m2.ttl = 5;
        assert_ne!(base, canonical_with_signatures(&m2, &m2.signatures));
        let mut m3 = m.clone();
        m3.kind = "other".into();
        assert_ne!(base, canonical_with_signatures(&m3, &m3.signatures));
    }

    #[test]
    fn sorts_keys_regardless_of_field_declaration_order() {
        let m = sample();
        let bytes = canonical_with_signatures(&m, &m.signatures);
        let text = String::from_utf8(bytes).unwrap();
        // "address" must precede "app_id", which precedes "data", etc.
        let pos = |k: &str| text.find(k).unwrap();
        assert!(pos("\"address\"") < pos("\"app_id\""));
        assert!(pos("\"app_id\"") < pos("\"data\""));
        assert!(pos("\"data\"") < pos("\"destination\""));
        assert!(pos("\"destination\"") < pos("\"id\""));
        assert!(pos("\"id\"") < pos("\"signatures\""));
        assert!(pos("\"signatures\"") < pos("\"ttl\""));
        assert!(pos("\"ttl\"") < pos("\"type\""));
    }
}
