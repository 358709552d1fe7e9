//! Property-based tests for protocol components.
//!
//! These tests verify protocol invariants hold for arbitrary inputs:
//!
//! - Frame building and parsing preserve payload and padding
//! - Padding always lands on the boundary regardless of payload size
//! - Frame parsing never panics on arbitrary bytes
//! - Envelope encoding round-trips

use proptest::prelude::*;

use murmur_crypto::{Nonce, SymmetricKey};

use crate::envelope::Envelope;
use crate::limits::PADDING_UNIT;
use crate::message::{MessageParams, ReceivedMessage, SentMessage};
use crate::topic::Topic;

fn sym_params(payload: Vec<u8>, padding: Option<Vec<u8>>) -> MessageParams {
    MessageParams {
        src: None,
        dst: None,
        key_sym: Some(SymmetricKey::generate()),
        topic: Topic::from([0xAA, 0xBB, 0xCC, 0xDD]),
        ttl: 50,
        payload,
        padding,
        pow_target: 0.0,
        pow_time: 0,
    }
}

proptest! {
    /// Any payload survives framing and parsing unchanged.
    #[test]
    fn frame_roundtrip_preserves_payload(
        payload in proptest::collection::vec(any::<u8>(), 0..2048)
    ) {
        let params = sym_params(payload.clone(), None);
        let key = params.key_sym.clone().unwrap();
        let envelope = SentMessage::new(&params).unwrap().wrap(&params, 1_700_000_000).unwrap();

        let plaintext = envelope.open_symmetric(&key).unwrap();
        let msg = ReceivedMessage::parse(&envelope, &plaintext).unwrap();
        prop_assert_eq!(msg.payload, payload);
    }

    /// Caller-supplied padding comes back byte-for-byte.
    #[test]
    fn frame_roundtrip_preserves_padding(
        payload in proptest::collection::vec(any::<u8>(), 0..256),
        padding in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let params = sym_params(payload, Some(padding.clone()));
        let key = params.key_sym.clone().unwrap();
        let envelope = SentMessage::new(&params).unwrap().wrap(&params, 1_700_000_000).unwrap();

        let plaintext = envelope.open_symmetric(&key).unwrap();
        let msg = ReceivedMessage::parse(&envelope, &plaintext).unwrap();
        prop_assert_eq!(msg.padding, padding);
    }

    /// Generated padding always fills the frame to the unit boundary.
    #[test]
    fn generated_padding_lands_on_boundary(
        payload in proptest::collection::vec(any::<u8>(), 0..2048)
    ) {
        let params = sym_params(payload, None);
        let key = params.key_sym.clone().unwrap();
        let envelope = SentMessage::new(&params).unwrap().wrap(&params, 1_700_000_000).unwrap();

        let plaintext = envelope.open_symmetric(&key).unwrap();
        prop_assert_eq!(plaintext.len() % PADDING_UNIT, 0);
    }

    /// Parsing arbitrary plaintext bytes never panics; it either yields a
    /// frame or rejects quietly.
    #[test]
    fn parse_never_panics(
        plaintext in proptest::collection::vec(any::<u8>(), 0..512)
    ) {
        let envelope = Envelope::new(0, 50, Topic::default(), None, vec![]);
        let _ = ReceivedMessage::parse(&envelope, &plaintext);
    }

    /// Envelope wire encoding round-trips, including the key-class marker.
    #[test]
    fn envelope_encoding_roundtrip(
        data in proptest::collection::vec(any::<u8>(), 0..1024),
        symmetric in any::<bool>(),
        expiry in any::<u64>(),
        ttl in any::<u32>(),
        nonce in any::<u64>(),
    ) {
        let aead_nonce = symmetric.then(Nonce::generate);
        let mut envelope = Envelope::new(expiry, ttl, Topic::from([1, 2, 3, 4]), aead_nonce, data);
        envelope.nonce = nonce;

        let restored = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(restored.is_symmetric(), symmetric);
        prop_assert_eq!(restored.hash(), envelope.hash());
        prop_assert!((restored.pow() - envelope.pow()).abs() < f64::EPSILON);
    }
}
