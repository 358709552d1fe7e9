//! Plaintext message framing on either side of the cipher.
//!
//! Before encryption a message is framed as:
//!
//! ```text
//! +------------------+
//! | flags            | 1 byte   - bit 0: signature block present
//! +------------------+
//! | payload length   | 4 bytes  - little endian
//! +------------------+
//! | payload          | Variable
//! +------------------+
//! | padding          | Variable - random fill to a 256-byte boundary
//! +------------------+
//! | signer + sig     | 96 bytes - only when flag bit 0 is set
//! +------------------+
//! ```
//!
//! The signature covers everything before the signature block, under a
//! domain separator. The signer's public key travels next to the signature
//! inside the encrypted frame, so the network never sees who signed.
//! Padding hides the true payload size from anyone who can observe
//! ciphertext lengths; the recipient discards it after parsing.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::trace;

use murmur_crypto::{
    signing, Hash256, Signature, SigningKeyPair, SigningPublicKey, SymmetricKey, X25519PublicKey,
};

use crate::envelope::{seal_asymmetric_payload, seal_symmetric_payload, Envelope};
use crate::error::{ProtocolError, Result};
use crate::limits::{MAX_MESSAGE_SIZE, PADDING_UNIT};
use crate::topic::Topic;

/// Flag bit marking a trailing signature block.
const SIGNATURE_FLAG: u8 = 0b0000_0001;

/// Frame header: flags byte plus payload length.
const FRAME_HEADER_SIZE: usize = 1 + 4;

/// Trailing signature block: signer public key plus signature.
const SIGNATURE_BLOCK_SIZE: usize = signing::PUBLIC_KEY_SIZE + signing::SIGNATURE_SIZE;

/// Domain separator for message signatures.
const MESSAGE_SIGNING_DOMAIN: &[u8] = b"MURMUR-MESSAGE-SIGNATURE-v1";

/// Parameters for building an outgoing message.
///
/// Exactly one of `key_sym` / `dst` must be set; the request layer
/// validates this before construction.
pub struct MessageParams {
    /// Signing key pair, when the sender wants to be identifiable to the
    /// recipient.
    pub src: Option<SigningKeyPair>,
    /// Recipient public key for asymmetric envelopes.
    pub dst: Option<X25519PublicKey>,
    /// Topic key for symmetric envelopes.
    pub key_sym: Option<SymmetricKey>,
    /// Routing topic.
    pub topic: Topic,
    /// Time-to-live in seconds.
    pub ttl: u32,
    /// Message payload.
    pub payload: Vec<u8>,
    /// Caller-supplied padding; random boundary padding when `None`.
    pub padding: Option<Vec<u8>>,
    /// Proof-of-work target the envelope must reach.
    pub pow_target: f64,
    /// Time budget for proof-of-work sealing, in seconds.
    pub pow_time: u32,
}

/// An outgoing message frame, ready to be signed, encrypted and sealed.
pub struct SentMessage {
    raw: Vec<u8>,
}

impl SentMessage {
    /// Build the plaintext frame for `params`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::OversizedPayload` if the framed message
    /// cannot fit in an envelope.
    pub fn new(params: &MessageParams) -> Result<Self> {
        let signed = params.src.is_some();
        let sig_block = if signed { SIGNATURE_BLOCK_SIZE } else { 0 };

        let unpadded = FRAME_HEADER_SIZE + params.payload.len() + sig_block;
        if unpadded > MAX_MESSAGE_SIZE as usize {
            return Err(ProtocolError::OversizedPayload {
                size: unpadded,
                max: MAX_MESSAGE_SIZE as usize,
            });
        }

        let mut raw = Vec::with_capacity(unpadded + PADDING_UNIT);
        raw.push(if signed { SIGNATURE_FLAG } else { 0 });
        raw.extend_from_slice(&(params.payload.len() as u32).to_le_bytes());
        raw.extend_from_slice(&params.payload);

        match &params.padding {
            Some(padding) => raw.extend_from_slice(padding),
            None => {
                // Random fill up to the next padding boundary
                let pad = (PADDING_UNIT - unpadded % PADDING_UNIT) % PADDING_UNIT;
                let mut padding = vec![0u8; pad];
                OsRng.fill_bytes(&mut padding);
                raw.extend_from_slice(&padding);
            }
        }

        Ok(Self { raw })
    }

    /// Sign, encrypt and seal the frame into an envelope.
    ///
    /// `now` is the current Unix time in seconds; the envelope expires at
    /// `now + ttl`.
    ///
    /// # Errors
    ///
    /// Fails on a missing key, encryption failure, or an unreachable
    /// proof-of-work target.
    pub fn wrap(mut self, params: &MessageParams, now: u64) -> Result<Envelope> {
        if let Some(src) = &params.src {
            self.sign(src);
        }

        let (aead_nonce, data) = match (&params.key_sym, &params.dst) {
            (Some(key), None) => {
                let (nonce, ciphertext) = seal_symmetric_payload(key, &self.raw)?;
                (Some(nonce), ciphertext)
            }
            (None, Some(dst)) => {
                if !dst.is_valid() {
                    return Err(ProtocolError::Crypto(
                        murmur_crypto::CryptoError::InvalidPublicKey,
                    ));
                }
                (None, seal_asymmetric_payload(dst, &self.raw)?)
            }
            _ => return Err(ProtocolError::MissingKey),
        };

        let mut envelope = Envelope::new(
            now + u64::from(params.ttl),
            params.ttl,
            params.topic,
            aead_nonce,
            data,
        );
        envelope.seal(params.pow_target, params.pow_time)?;
        Ok(envelope)
    }

    fn sign(&mut self, key: &SigningKeyPair) {
        let signature =
            key.sign(&[MESSAGE_SIGNING_DOMAIN, self.raw.as_slice()].concat());
        self.raw.extend_from_slice(key.public_key().as_bytes());
        self.raw.extend_from_slice(signature.as_bytes());
    }
}

/// A message recovered by opening an envelope against one key.
///
/// Created once per successful decryption; never mutated afterwards. The
/// `envelope_hash` back-reference is the deduplication key in filter
/// buffers.
#[derive(Clone, Debug)]
pub struct ReceivedMessage {
    /// Routing topic of the originating envelope.
    pub topic: Topic,
    /// Decrypted payload.
    pub payload: Vec<u8>,
    /// Padding bytes that accompanied the payload.
    pub padding: Vec<u8>,
    /// Signer public key, when the frame carried a valid signature.
    pub src: Option<SigningPublicKey>,
    /// Recipient public key; set for asymmetric envelopes by the opener.
    pub dst: Option<X25519PublicKey>,
    /// Fingerprint of the symmetric key that opened the envelope.
    pub sym_key_hash: Option<Hash256>,
    /// Proof-of-work score of the originating envelope.
    pub pow: f64,
    /// Unix timestamp (seconds) the message was sent.
    pub sent: u64,
    /// Time-to-live of the originating envelope in seconds.
    pub ttl: u32,
    /// Identity hash of the originating envelope.
    pub envelope_hash: Hash256,
}

impl ReceivedMessage {
    /// Parse and validate a decrypted frame.
    ///
    /// Returns `None` for any malformed frame or invalid signature - a
    /// successful AEAD open with a broken frame means corruption, and is
    /// treated like any other failed open: no match, no error.
    pub fn parse(envelope: &Envelope, plaintext: &[u8]) -> Option<Self> {
        if plaintext.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let flags = plaintext[0];
        let payload_len =
            u32::from_le_bytes(plaintext[1..FRAME_HEADER_SIZE].try_into().ok()?) as usize;
        let signed = flags & SIGNATURE_FLAG != 0;
        let sig_block = if signed { SIGNATURE_BLOCK_SIZE } else { 0 };

        if plaintext.len() < FRAME_HEADER_SIZE + payload_len + sig_block {
            trace!(envelope = %envelope.hash(), "frame shorter than its header claims");
            return None;
        }

        let payload = plaintext[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_len].to_vec();
        let body_end = plaintext.len() - sig_block;
        let padding = plaintext[FRAME_HEADER_SIZE + payload_len..body_end].to_vec();

        let src = if signed {
            let block = &plaintext[body_end..];
            let signer =
                SigningPublicKey::from_bytes(&block[..signing::PUBLIC_KEY_SIZE]).ok()?;
            let signature =
                Signature::from_bytes(&block[signing::PUBLIC_KEY_SIZE..]).ok()?;
            let message = [MESSAGE_SIGNING_DOMAIN, &plaintext[..body_end]].concat();
            if !signer.verify(&message, &signature) {
                trace!(envelope = %envelope.hash(), "invalid message signature");
                return None;
            }
            Some(signer)
        } else {
            None
        };

        Some(Self {
            topic: envelope.topic,
            payload,
            padding,
            src,
            dst: None,
            sym_key_hash: None,
            pow: envelope.pow(),
            sent: envelope.expiry.saturating_sub(u64::from(envelope.ttl)),
            ttl: envelope.ttl,
            envelope_hash: envelope.hash(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_crypto::X25519StaticPrivateKey;

    fn params_symmetric(key: SymmetricKey, src: Option<SigningKeyPair>) -> MessageParams {
        MessageParams {
            src,
            dst: None,
            key_sym: Some(key),
            topic: Topic::from([9, 8, 7, 6]),
            ttl: 50,
            payload: b"hello".to_vec(),
            padding: None,
            pow_target: 0.0,
            pow_time: 1,
        }
    }

    #[test]
    fn test_symmetric_wrap_open_roundtrip() {
        let key = SymmetricKey::generate();
        let params = params_symmetric(key.clone(), None);
        let envelope = SentMessage::new(&params)
            .unwrap()
            .wrap(&params, 1_700_000_000)
            .unwrap();

        assert!(envelope.is_symmetric());
        let plaintext = envelope.open_symmetric(&key).unwrap();
        let msg = ReceivedMessage::parse(&envelope, &plaintext).unwrap();

        assert_eq!(msg.payload, b"hello");
        assert_eq!(msg.topic, params.topic);
        assert_eq!(msg.sent, 1_700_000_000);
        assert!(msg.src.is_none());
    }

    #[test]
    fn test_asymmetric_wrap_open_roundtrip() {
        let recipient = X25519StaticPrivateKey::generate();
        let params = MessageParams {
            src: None,
            dst: Some(recipient.public_key()),
            key_sym: None,
            topic: Topic::default(),
            ttl: 50,
            payload: b"direct".to_vec(),
            padding: None,
            pow_target: 0.0,
            pow_time: 1,
        };
        let envelope = SentMessage::new(&params)
            .unwrap()
            .wrap(&params, 1_700_000_000)
            .unwrap();

        assert!(envelope.is_asymmetric());
        let plaintext = envelope.open_asymmetric(&recipient).unwrap();
        let msg = ReceivedMessage::parse(&envelope, &plaintext).unwrap();
        assert_eq!(msg.payload, b"direct");
    }

    #[test]
    fn test_signed_frame_recovers_signer() {
        let key = SymmetricKey::generate();
        let signer = SigningKeyPair::generate();
        let signer_public = signer.public_key();
        let params = params_symmetric(key.clone(), Some(signer));

        let envelope = SentMessage::new(&params)
            .unwrap()
            .wrap(&params, 1_700_000_000)
            .unwrap();
        let plaintext = envelope.open_symmetric(&key).unwrap();
        let msg = ReceivedMessage::parse(&envelope, &plaintext).unwrap();

        let src = msg.src.expect("signed message must carry its signer");
        assert!(murmur_crypto::signing_keys_equal(&src, &signer_public));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let key = SymmetricKey::generate();
        let params = params_symmetric(key.clone(), Some(SigningKeyPair::generate()));

        let envelope = SentMessage::new(&params)
            .unwrap()
            .wrap(&params, 1_700_000_000)
            .unwrap();
        let mut plaintext = envelope.open_symmetric(&key).unwrap();
        let last = plaintext.len() - 1;
        plaintext[last] ^= 0xFF;

        assert!(ReceivedMessage::parse(&envelope, &plaintext).is_none());
    }

    #[test]
    fn test_frame_padded_to_boundary() {
        let key = SymmetricKey::generate();
        let params = params_symmetric(key, None);
        let sent = SentMessage::new(&params).unwrap();
        assert_eq!(sent.raw.len() % PADDING_UNIT, 0);
    }

    #[test]
    fn test_caller_padding_preserved() {
        let key = SymmetricKey::generate();
        let mut params = params_symmetric(key.clone(), None);
        params.padding = Some(vec![0xAB; 13]);

        let envelope = SentMessage::new(&params)
            .unwrap()
            .wrap(&params, 1_700_000_000)
            .unwrap();
        let plaintext = envelope.open_symmetric(&key).unwrap();
        let msg = ReceivedMessage::parse(&envelope, &plaintext).unwrap();
        assert_eq!(msg.padding, vec![0xAB; 13]);
    }

    #[test]
    fn test_parse_rejects_truncated_frames() {
        let envelope = Envelope::new(0, 50, Topic::default(), None, vec![]);
        assert!(ReceivedMessage::parse(&envelope, &[]).is_none());
        assert!(ReceivedMessage::parse(&envelope, &[0x01, 0x00]).is_none());

        // Header claims more payload than the frame carries
        let mut frame = vec![0u8];
        frame.extend_from_slice(&100u32.to_le_bytes());
        frame.extend_from_slice(&[0u8; 10]);
        assert!(ReceivedMessage::parse(&envelope, &frame).is_none());
    }

    #[test]
    fn test_wrap_without_any_key_fails() {
        let params = MessageParams {
            src: None,
            dst: None,
            key_sym: None,
            topic: Topic::default(),
            ttl: 50,
            payload: vec![],
            padding: None,
            pow_target: 0.0,
            pow_time: 1,
        };
        let result = SentMessage::new(&params).unwrap().wrap(&params, 0);
        assert!(matches!(result, Err(ProtocolError::MissingKey)));
    }
}
