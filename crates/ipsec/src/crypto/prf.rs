//! Pseudo-Random Function (PRF) implementations
//!
//! Implements the PRF algorithms used for Child SA key derivation as defined
//! in RFC 7296 Section 2.13 and 2.17.

use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// prf+ counts iterations in a single octet
const MAX_PRF_PLUS_ITERATIONS: usize = 255;

/// PRF algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrfAlgorithm {
    /// HMAC-SHA2-256
    HmacSha256,
    /// HMAC-SHA2-384
    HmacSha384,
    /// HMAC-SHA2-512
    HmacSha512,
}

impl PrfAlgorithm {
    /// Map an IKEv2 PRF transform ID (RFC 7296 Section 3.3.2)
    pub fn from_transform_id(id: u16) -> Option<Self> {
        match id {
            5 => Some(PrfAlgorithm::HmacSha256),
            6 => Some(PrfAlgorithm::HmacSha384),
            7 => Some(PrfAlgorithm::HmacSha512),
            _ => None,
        }
    }

    /// Get PRF output length in bytes
    pub fn output_len(self) -> usize {
        match self {
            PrfAlgorithm::HmacSha256 => 32,
            PrfAlgorithm::HmacSha384 => 48,
            PrfAlgorithm::HmacSha512 => 64,
        }
    }

    /// Compute PRF
    ///
    /// # Arguments
    ///
    /// * `key` - PRF key
    /// * `data` - Input data
    pub fn compute(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let invalid_key = |e: hmac::digest::InvalidLength| Error::CryptoError(e.to_string());
        let out = match self {
            PrfAlgorithm::HmacSha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            PrfAlgorithm::HmacSha384 => {
                let mut mac = Hmac::<Sha384>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            PrfAlgorithm::HmacSha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(out)
    }

    /// Compute prf+ (key expansion function)
    ///
    /// Defined in RFC 7296 Section 2.13:
    /// ```text
    /// prf+ (K,S) = T1 | T2 | T3 | T4 | ...
    ///
    /// where:
    /// T1 = prf (K, S | 0x01)
    /// T2 = prf (K, T1 | S | 0x02)
    /// T3 = prf (K, T2 | S | 0x03)
    /// ...
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `KeyDerivation` when `output_len` needs more than 255 iterations.
    pub fn prf_plus(self, key: &[u8], seed: &[u8], output_len: usize) -> Result<Vec<u8>> {
        if output_len > MAX_PRF_PLUS_ITERATIONS * self.output_len() {
            return Err(Error::KeyDerivation(format!(
                "prf+ cannot produce {} bytes",
                output_len
            )));
        }

        let mut output = Vec::with_capacity(output_len);
        let mut t = Vec::new();
        let mut counter: u8 = 1;

        while output.len() < output_len {
            // T(i-1) | S | counter
            let mut input = Vec::with_capacity(t.len() + seed.len() + 1);
            input.extend_from_slice(&t);
            input.extend_from_slice(seed);
            input.push(counter);

            t.zeroize();
            t = self.compute(key, &input)?;
            output.extend_from_slice(&t);

            counter = counter.wrapping_add(1);
        }

        t.zeroize();
        output.truncate(output_len);
        Ok(output)
    }
}

/// Child SA key material (RFC 7296 Section 2.17)
///
/// ```text
/// KEYMAT = prf+(SK_d, Ni | Nr)
///
/// With a fresh Diffie-Hellman exchange:
/// KEYMAT = prf+(SK_d, g^ir (new) | Ni | Nr)
///
/// Key split:
/// SK_ei | SK_ai | SK_er | SK_ar = KEYMAT
/// ```
///
/// `i` keys protect initiator-to-responder traffic. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChildKeyMaterial {
    /// Initiator-to-responder encryption key
    pub sk_ei: Vec<u8>,
    /// Initiator-to-responder integrity key
    pub sk_ai: Vec<u8>,
    /// Responder-to-initiator encryption key
    pub sk_er: Vec<u8>,
    /// Responder-to-initiator integrity key
    pub sk_ar: Vec<u8>,
}

impl std::fmt::Debug for ChildKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildKeyMaterial")
            .field("sk_ei_len", &self.sk_ei.len())
            .field("sk_ai_len", &self.sk_ai.len())
            .finish_non_exhaustive()
    }
}

impl ChildKeyMaterial {
    /// Derive Child SA keys from SK_d
    ///
    /// # Arguments
    ///
    /// * `prf_alg` - PRF negotiated for the IKE SA
    /// * `sk_d` - IKE SA key for deriving Child SA keys
    /// * `shared_secret` - New DH shared secret, when a D-H group was negotiated
    /// * `nonce_i` - Nonce of the exchange initiator
    /// * `nonce_r` - Nonce of the exchange responder
    /// * `encr_key_len` - Encryption key length in bytes (AEAD salt included)
    /// * `integ_key_len` - Integrity key length in bytes (0 for AEAD)
    pub fn derive(
        prf_alg: PrfAlgorithm,
        sk_d: &[u8],
        shared_secret: Option<&[u8]>,
        nonce_i: &[u8],
        nonce_r: &[u8],
        encr_key_len: usize,
        integ_key_len: usize,
    ) -> Result<Self> {
        let mut seed = match shared_secret {
            Some(secret) => [secret, nonce_i, nonce_r].concat(),
            None => [nonce_i, nonce_r].concat(),
        };

        let total_len = 2 * encr_key_len + 2 * integ_key_len;
        let derived = prf_alg.prf_plus(sk_d, &seed, total_len);
        seed.zeroize();
        let mut keymat = derived?;

        let (ei, rest) = keymat.split_at(encr_key_len);
        let (ai, rest) = rest.split_at(integ_key_len);
        let (er, ar) = rest.split_at(encr_key_len);

        let material = ChildKeyMaterial {
            sk_ei: ei.to_vec(),
            sk_ai: ai.to_vec(),
            sk_er: er.to_vec(),
            sk_ar: ar.to_vec(),
        };
        keymat.zeroize();
        Ok(material)
    }
}
