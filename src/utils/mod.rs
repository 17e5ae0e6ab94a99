//! Utility functions and helpers
//!
//! Hashing, signing, address encoding and the bincode helpers used by
//! everything that persists or digests a value.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, current_utc_seconds, encode_address,
    generate_keypair, hash, hash_pub_key, public_key_from_pkcs8, ripemd160_digest,
    sha256_digest, sign, validate_address_format, verify, Digest, PublicKey, Signature,
    ADDRESS_CHECK_SUM_LEN, DIGEST_BITS, DIGEST_LEN,
};

pub use serialization::{deserialize, serialize};
