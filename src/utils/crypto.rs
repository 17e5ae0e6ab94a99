use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{ChainError, Result};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DIGEST_LEN: usize = 32;
pub const DIGEST_BITS: u32 = (DIGEST_LEN * 8) as u32;

const ADDRESS_VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;
const ADDRESS_HASH_LEN: usize = 20;

/// Fixed-width SHA-256 output. Ordering is byte-wise, which is the same as
/// comparing the digests as big-endian unsigned integers.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, bincode::Encode, bincode::Decode,
)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    pub fn zero() -> Digest {
        Digest([0u8; DIGEST_LEN])
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Digest> {
        let array: [u8; DIGEST_LEN] = bytes.try_into().map_err(|_| {
            ChainError::Crypto(format!(
                "Digest must be {DIGEST_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Digest(array))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl FromStr for Digest {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Digest> {
        let bytes = HEXLOWER
            .decode(s.to_lowercase().as_bytes())
            .map_err(|e| ChainError::Serialization(format!("Invalid digest hex: {e}")))?;
        Digest::from_slice(&bytes)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Digest, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Raw public key bytes. An empty key is the placeholder given to addresses
/// that received funds before their owner registered them.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct PublicKey(pub Vec<u8>);

impl PublicKey {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct Signature(pub Vec<u8>);

pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ChainError::Crypto(format!("System time error: {e}")))?
        .as_millis();

    // Ensure the timestamp fits in i64
    if duration > i64::MAX as u128 {
        return Err(ChainError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

/// Seconds since the epoch, the resolution block headers carry.
pub fn current_utc_seconds() -> Result<u32> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ChainError::Crypto(format!("System time error: {e}")))?
        .as_secs();
    u32::try_from(secs).map_err(|_| ChainError::Crypto("Timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn hash(data: &[u8]) -> Digest {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(context.finish().as_ref());
    Digest(out)
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| ChainError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

/// Returns the public key together with the PKCS#8 document holding the
/// private half.
pub fn generate_keypair() -> Result<(PublicKey, Vec<u8>)> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| ChainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    let public_key = public_key_from_pkcs8(&pkcs8)?;
    Ok((public_key, pkcs8))
}

pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<PublicKey> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| ChainError::Crypto(format!("Failed to create key pair from PKCS8: {e}")))?;
    Ok(PublicKey(key_pair.public_key().as_ref().to_vec()))
}

pub fn sign(pkcs8: &[u8], digest: &Digest) -> Result<Signature> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| ChainError::Crypto(format!("Failed to create key pair from PKCS8: {e}")))?;
    let signature = key_pair
        .sign(&rng, digest.as_bytes())
        .map_err(|e| ChainError::Crypto(format!("Failed to sign digest: {e}")))?
        .as_ref()
        .to_vec();
    Ok(Signature(signature))
}

pub fn verify(public_key: &PublicKey, digest: &Digest, signature: &Signature) -> bool {
    if public_key.is_empty() {
        return false;
    }
    let peer_public_key =
        ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key.as_bytes());
    peer_public_key
        .verify(digest.as_bytes(), signature.0.as_slice())
        .is_ok()
}

pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = sha256_digest(pub_key);
    ripemd160_digest(pub_key_sha256.as_slice())
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = sha256_digest(payload);
    let second_sha = sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

/// Self-certifying name for a key: version + ripemd160(sha256(key)) + checksum,
/// base58 encoded.
pub fn encode_address(public_key: &PublicKey) -> String {
    let mut payload: Vec<u8> = vec![ADDRESS_VERSION];
    payload.extend(hash_pub_key(public_key.as_bytes()));
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum);
    base58_encode(payload.as_slice())
}

pub fn validate_address_format(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };
    if payload.len() != 1 + ADDRESS_HASH_LEN + ADDRESS_CHECK_SUM_LEN {
        return false;
    }
    if payload[0] != ADDRESS_VERSION {
        return false;
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    checksum(body).as_slice() == actual_checksum
}
