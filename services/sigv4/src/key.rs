//! Signing key derivation for SigV4 and SigV4a.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;

use awsign_core::hash::hmac_sha256;
use awsign_core::time::{format_date, DateTime};
use awsign_core::{Error, Result};
use p256::ecdsa::SigningKey;

use crate::constants::ECDSA_P256_SHA256;

/// Derive the SigV4 signing key for (secret, date, region, service).
///
/// Pure: safe to recompute per request or memoize on those four inputs.
pub(crate) fn generate_signing_key(
    secret: &str,
    time: DateTime,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    if secret.is_empty() {
        return Err(Error::key_derivation("secret access key is empty"));
    }

    // Sign secret
    let secret = format!("AWS4{secret}");
    // Sign date
    let sign_date = hmac_sha256(secret.as_bytes(), format_date(time).as_bytes());
    // Sign region
    let sign_region = hmac_sha256(sign_date.as_slice(), region.as_bytes());
    // Sign service
    let sign_service = hmac_sha256(sign_region.as_slice(), service.as_bytes());
    // Sign request
    let sign_request = hmac_sha256(sign_service.as_slice(), "aws4_request".as_bytes());

    Ok(sign_request)
}

/// P-256 group order minus two, big endian. Candidates above this are
/// rejected and the derivation counter advances.
const ORDER_MINUS_TWO: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xbc, 0xe6, 0xfa, 0xad, 0xa7, 0x17, 0x9e, 0x84, 0xf3, 0xb9, 0xca, 0xc2, 0xfc, 0x63,
    0x25, 0x4f,
];

/// Derive the deterministic SigV4a ECDSA P-256 private key for an access
/// key pair.
///
/// Counter-mode KDF over HMAC-SHA256, keyed with `"AWS4A" + secret`, fixed
/// input `0x00000001 || "AWS4-ECDSA-P256-SHA256" || 0x00 || access_key ||
/// counter || 0x00000100`. The first candidate `c <= n - 2` yields the
/// private scalar `c + 1`; rejected candidates advance the one-byte
/// counter, which starts at 1. Both sides of the wire must produce the
/// same key bit for bit, so none of these constants are tunable.
pub(crate) fn derive_ecdsa_signing_key(
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<SigningKey> {
    if secret_access_key.is_empty() {
        return Err(Error::key_derivation("secret access key is empty"));
    }

    let mut input_key = Vec::with_capacity("AWS4A".len() + secret_access_key.len());
    input_key.extend_from_slice(b"AWS4A");
    input_key.extend_from_slice(secret_access_key.as_bytes());

    let mut counter: u8 = 1;
    loop {
        let mut input =
            Vec::with_capacity(4 + ECDSA_P256_SHA256.len() + 1 + access_key_id.len() + 1 + 4);
        input.extend_from_slice(&1u32.to_be_bytes());
        input.extend_from_slice(ECDSA_P256_SHA256.as_bytes());
        input.push(0x00);
        input.extend_from_slice(access_key_id.as_bytes());
        input.push(counter);
        input.extend_from_slice(&256u32.to_be_bytes());

        let tag = hmac_sha256(&input_key, &input);
        let mut candidate: [u8; 32] = tag
            .as_slice()
            .try_into()
            .expect("hmac-sha256 output is 32 bytes");

        if candidate <= ORDER_MINUS_TWO {
            increment_be(&mut candidate);
            return SigningKey::from_slice(&candidate).map_err(|e| {
                Error::key_derivation("derived scalar rejected by curve").with_source(e)
            });
        }

        counter = counter
            .checked_add(1)
            .ok_or_else(|| Error::key_derivation("key derivation counter exhausted"))?;
    }
}

/// Add one to a big-endian integer. The caller guarantees the value is
/// at most n - 2, so this cannot carry out of the array.
fn increment_be(bytes: &mut [u8; 32]) {
    for b in bytes.iter_mut().rev() {
        let (v, carry) = b.overflowing_add(1);
        *b = v;
        if !carry {
            break;
        }
    }
}

/// A bounded map with first-in-first-out eviction.
///
/// Inserting over an existing key overwrites the value in place: it does
/// not consume a capacity slot and the key keeps its original eviction
/// position.
#[derive(Debug)]
pub struct FifoCache<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    map: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> FifoCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity.max(1)),
            map: HashMap::with_capacity(capacity.max(1)),
        }
    }

    /// Look up a key.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Insert a key, evicting the oldest entry when full.
    pub fn insert(&mut self, key: K, value: V) {
        if self.map.insert(key.clone(), value).is_some() {
            return;
        }

        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Configured bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awsign_core::time::parse_iso8601;
    use p256::ecdsa::signature::{Signer, Verifier};
    use p256::ecdsa::Signature;

    #[test]
    fn test_generate_signing_key_known_answer() {
        // Published example from the SigV4 developer guide.
        let key = generate_signing_key(
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            parse_iso8601("20150830T123600Z").unwrap(),
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn test_generate_signing_key_rejects_empty_secret() {
        let err = generate_signing_key(
            "",
            parse_iso8601("20150830T123600Z").unwrap(),
            "us-east-1",
            "iam",
        )
        .unwrap_err();
        assert_eq!(err.kind(), awsign_core::ErrorKind::KeyDerivation);
    }

    #[test]
    fn test_derive_ecdsa_key_is_deterministic() {
        let a = derive_ecdsa_signing_key("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY")
            .unwrap();
        let b = derive_ecdsa_signing_key("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY")
            .unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());

        let c = derive_ecdsa_signing_key("AKIDEXAMPLE", "another-secret").unwrap();
        assert_ne!(a.to_bytes(), c.to_bytes());
    }

    #[test]
    fn test_derived_key_produces_verifiable_signatures() {
        let key = derive_ecdsa_signing_key("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY")
            .unwrap();
        let message = b"string to sign";

        let sig: Signature = key.sign(message);
        key.verifying_key().verify(message, &sig).unwrap();

        // RFC 6979 deterministic nonces: same message, same signature.
        let again: Signature = key.sign(message);
        assert_eq!(sig, again);
    }

    #[test]
    fn test_derive_ecdsa_key_rejects_empty_secret() {
        let err = derive_ecdsa_signing_key("AKIDEXAMPLE", "").unwrap_err();
        assert_eq!(err.kind(), awsign_core::ErrorKind::KeyDerivation);
    }

    #[test]
    fn test_increment_be_carries() {
        let mut v = [0u8; 32];
        v[31] = 0xff;
        v[30] = 0x00;
        increment_be(&mut v);
        assert_eq!(v[31], 0x00);
        assert_eq!(v[30], 0x01);
    }

    #[test]
    fn test_fifo_cache_evicts_oldest() {
        let mut cache = FifoCache::new(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        cache.insert("d", 4);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"d"), Some(&4));
    }

    #[test]
    fn test_fifo_cache_duplicate_overwrites_in_place() {
        let mut cache = FifoCache::new(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        // Overwrite does not consume a slot or refresh "a"'s position.
        cache.insert("a", 10);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&"a"), Some(&10));

        // "a" is still the oldest entry.
        cache.insert("d", 4);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(&2));
    }
}
