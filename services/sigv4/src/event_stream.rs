//! Event-stream message signing.
//!
//! Every event message is signed with the `AWS4-HMAC-SHA256-PAYLOAD`
//! algorithm, chaining through the previous message's signature the same
//! way chunked bodies do; the chain is seeded by the request signature.
//! Unlike a chunked body, an event stream can stay open across a date
//! boundary, so the signing key is re-derived per message.

use std::fmt::{self, Debug};
use std::sync::Arc;

use awsign_core::hash::{hex_hmac_sha256, hex_sha256};
use awsign_core::time::{format_date, format_iso8601, Clock, SystemClock};
use awsign_core::utils::Redact;
use awsign_core::Result;
use bytes::Bytes;

use crate::constants::HMAC_SHA256_PAYLOAD;
use crate::key::generate_signing_key;

/// A header value in event-stream wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventHeaderValue {
    /// Millisecond-precision epoch timestamp (wire type 8).
    Timestamp(i64),
    /// Opaque bytes (wire type 6).
    ByteArray(Bytes),
}

/// A signed event message: the signature headers plus the untouched
/// payload. Framing the message onto the wire is the transport's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEvent {
    /// `:date` and `:chunk-signature`, or empty for anonymous streams.
    pub headers: Vec<(&'static str, EventHeaderValue)>,
    /// The message payload, unchanged.
    pub payload: Bytes,
}

/// Signs the messages of an event stream, in order.
///
/// Obtain it from
/// [`SignedOutput::into_event_signer`](crate::SignedOutput::into_event_signer)
/// so the chain is seeded by the request signature, or from
/// [`EventSigner::anonymous`] to pass messages through unsigned.
pub struct EventSigner {
    identity: Option<EventIdentity>,
    previous_signature: String,
    clock: Arc<dyn Clock>,
}

struct EventIdentity {
    secret_access_key: String,
    region: String,
    service: String,
}

impl Debug for EventSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("EventSigner");
        match &self.identity {
            Some(identity) => s
                .field("secret_access_key", &Redact::from(&identity.secret_access_key))
                .field("region", &identity.region)
                .field("service", &identity.service),
            None => s.field("identity", &"anonymous"),
        }
        .field("previous_signature", &self.previous_signature)
        .finish()
    }
}

impl EventSigner {
    pub(crate) fn new(
        secret_access_key: String,
        region: String,
        service: String,
        seed_signature: String,
    ) -> Self {
        Self {
            identity: Some(EventIdentity {
                secret_access_key,
                region,
                service,
            }),
            previous_signature: seed_signature,
            clock: Arc::new(SystemClock),
        }
    }

    /// An event signer for anonymous callers: messages pass through with
    /// empty signature headers rather than failing.
    pub fn anonymous() -> Self {
        Self {
            identity: None,
            previous_signature: String::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used to timestamp messages.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The signature of the most recently signed message (or the seed).
    pub fn previous_signature(&self) -> &str {
        &self.previous_signature
    }

    /// Sign one message.
    ///
    /// The string-to-sign covers the wire encoding of the `:date` header
    /// and the payload hash, chained through the previous signature:
    ///
    /// ```text
    /// AWS4-HMAC-SHA256-PAYLOAD
    /// <timestamp>
    /// <scope>
    /// <previous signature>
    /// <sha256 of encoded :date header>
    /// <sha256 of payload>
    /// ```
    pub fn sign(&mut self, payload: Bytes) -> Result<SignedEvent> {
        let Some(identity) = &self.identity else {
            return Ok(SignedEvent {
                headers: Vec::new(),
                payload,
            });
        };

        let now = self.clock.now();
        let scope = format!(
            "{}/{}/{}/aws4_request",
            format_date(now),
            identity.region,
            identity.service
        );
        let signing_key = generate_signing_key(
            &identity.secret_access_key,
            now,
            &identity.region,
            &identity.service,
        )?;

        let millis = now.timestamp_millis();
        let date_header = encode_date_header(millis);

        let string_to_sign = format!(
            "{HMAC_SHA256_PAYLOAD}\n{}\n{scope}\n{}\n{}\n{}",
            format_iso8601(now),
            self.previous_signature,
            hex_sha256(&date_header),
            hex_sha256(&payload),
        );

        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());
        let raw = hex::decode(&signature).expect("signature is valid hex");
        self.previous_signature = signature;

        Ok(SignedEvent {
            headers: vec![
                (":date", EventHeaderValue::Timestamp(millis)),
                (":chunk-signature", EventHeaderValue::ByteArray(raw.into())),
            ],
            payload,
        })
    }
}

/// Wire encoding of the `:date` header: one-byte name length, the name,
/// type 8 (timestamp), then big-endian epoch millis.
fn encode_date_header(millis: i64) -> Vec<u8> {
    const NAME: &[u8] = b":date";

    let mut buf = Vec::with_capacity(1 + NAME.len() + 1 + 8);
    buf.push(NAME.len() as u8);
    buf.extend_from_slice(NAME);
    buf.push(8);
    buf.extend_from_slice(&millis.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use awsign_core::time::{parse_iso8601, ManualClock};
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY";

    fn test_signer(clock: ManualClock) -> EventSigner {
        EventSigner::new(
            SECRET.to_string(),
            "us-east-1".to_string(),
            "transcribe".to_string(),
            "initial-signature".to_string(),
        )
        .with_clock(clock)
    }

    fn signature_of(event: &SignedEvent) -> Bytes {
        match event
            .headers
            .iter()
            .find(|(name, _)| *name == ":chunk-signature")
        {
            Some((_, EventHeaderValue::ByteArray(sig))) => sig.clone(),
            _ => panic!("failed to get the :chunk-signature"),
        }
    }

    /// Identical payloads must still produce distinct signatures, since
    /// every message chains through the one before it.
    #[test]
    fn test_identical_messages_sign_differently() {
        let clock = ManualClock::new(parse_iso8601("20210120T163347Z").unwrap());
        let mut signer = test_signer(clock);

        let mut signatures = Vec::new();
        for _ in 0..5 {
            let signed = signer.sign(Bytes::from_static(b"identical message")).unwrap();
            signatures.push(signature_of(&signed));
        }
        for pair in signatures.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_signing_is_deterministic() {
        let run = || {
            let clock = ManualClock::new(parse_iso8601("20210120T163347Z").unwrap());
            let mut signer = test_signer(clock.clone());
            let mut events = Vec::new();
            for payload in [&b"first"[..], b"second", b"third"] {
                events.push(signer.sign(Bytes::from(payload.to_vec())).unwrap());
                clock.advance(TimeDelta::milliseconds(250));
            }
            events
        };

        assert_eq!(run(), run());
    }

    /// Each message signature must verify against a string-to-sign built
    /// from the previous message's signature.
    #[test]
    fn test_signatures_chain_from_previous() {
        let time = parse_iso8601("20210120T163347Z").unwrap();
        let clock = ManualClock::new(time);
        let mut signer = test_signer(clock);

        let payload = Bytes::from_static(b"event payload");
        let first = signer.sign(payload.clone()).unwrap();
        let first_hex = hex::encode(signature_of(&first));
        assert_eq!(signer.previous_signature(), first_hex);

        let second = signer.sign(payload.clone()).unwrap();

        let key = generate_signing_key(SECRET, time, "us-east-1", "transcribe").unwrap();
        let expected = hex_hmac_sha256(
            &key,
            format!(
                "AWS4-HMAC-SHA256-PAYLOAD\n20210120T163347Z\n\
                 20210120/us-east-1/transcribe/aws4_request\n{first_hex}\n{}\n{}",
                hex_sha256(&encode_date_header(time.timestamp_millis())),
                hex_sha256(&payload),
            )
            .as_bytes(),
        );
        assert_eq!(hex::encode(signature_of(&second)), expected);
    }

    #[test]
    fn test_date_header_is_timestamped_from_clock() {
        let time = parse_iso8601("20210120T163347Z").unwrap();
        let mut signer = test_signer(ManualClock::new(time));

        let signed = signer.sign(Bytes::from_static(b"payload")).unwrap();
        assert_eq!(
            signed.headers[0],
            (":date", EventHeaderValue::Timestamp(time.timestamp_millis()))
        );
    }

    #[test]
    fn test_anonymous_messages_are_unsigned() {
        let mut signer = EventSigner::anonymous();

        let payload = Bytes::from_static(b"anonymous payload");
        let signed = signer.sign(payload.clone()).unwrap();

        assert!(signed.headers.is_empty());
        assert_eq!(signed.payload, payload);
    }

    #[test]
    fn test_date_header_encoding() {
        let encoded = encode_date_header(0x0102030405060708);

        assert_eq!(encoded[0], 5);
        assert_eq!(&encoded[1..6], b":date");
        assert_eq!(encoded[6], 8);
        assert_eq!(&encoded[7..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let signer = test_signer(ManualClock::new(parse_iso8601("20210120T163347Z").unwrap()));
        let repr = format!("{signer:?}");
        assert!(!repr.contains(SECRET));
    }
}
