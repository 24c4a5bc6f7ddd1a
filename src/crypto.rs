//! Encrypted-form channel crypto.
//!
//! Each request carries a symmetric key wrapped with RSA-OAEP (SHA-256 for
//! both the hash and the mask generation, no label), a nonce, and the
//! AES-GCM sealed payload, all base64. The response is sealed with the same
//! symmetric key under the bitwise complement of the request nonce, so a
//! replayed response can never be confused with a request.
//!
//! Key lengths of 16 and 32 bytes and nonce lengths of 12 and 16 bytes are
//! accepted; clients have shipped every combination.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::generic_array::typenum::{U12, U16};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::{Aes128, Aes256};
use aes_gcm::AesGcm;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey};
use secrecy::ExposeSecret;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info};

use crate::config::FlowKeyConfig;
use crate::error::CryptoError;

/// Per-request key material, carried from decrypt to the response encrypt.
pub struct RequestContext {
    aes_key: Vec<u8>,
    nonce: Vec<u8>,
}

/// Holds the endpoint's RSA private key and performs the per-request
/// unwrap/open/seal cycle.
pub struct FlowCrypto {
    private_key: RsaPrivateKey,
}

impl FlowCrypto {
    /// Load the private key from config. Accepts plain PKCS#8, encrypted
    /// PKCS#8 (when a password is configured), or legacy PKCS#1 PEM.
    pub fn from_config(config: &FlowKeyConfig) -> Result<Self, CryptoError> {
        let pem = config.private_key_pem.expose_secret();
        let private_key = match &config.private_key_password {
            Some(password) => {
                RsaPrivateKey::from_pkcs8_encrypted_pem(pem, password.expose_secret())
                    .map_err(|e| CryptoError::KeyLoad(e.to_string()))?
            }
            None => RsaPrivateKey::from_pkcs8_pem(pem)
                .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
                .map_err(|e| CryptoError::KeyLoad(e.to_string()))?,
        };
        info!(
            key_bits = private_key.size() * 8,
            "Encrypted-form private key loaded"
        );
        Ok(Self { private_key })
    }

    /// Unwrap the symmetric key, open the payload, and parse it as JSON.
    /// Returns the parsed request plus the context needed to seal the reply.
    pub fn decrypt(
        &self,
        encrypted_aes_key_b64: &str,
        initial_vector_b64: &str,
        encrypted_payload_b64: &str,
    ) -> Result<(Value, RequestContext), CryptoError> {
        let wrapped_key = BASE64
            .decode(encrypted_aes_key_b64)
            .map_err(|_| CryptoError::Base64 {
                field: "encrypted_aes_key",
            })?;
        let nonce = BASE64
            .decode(initial_vector_b64)
            .map_err(|_| CryptoError::Base64 {
                field: "initial_vector",
            })?;
        let sealed = BASE64
            .decode(encrypted_payload_b64)
            .map_err(|_| CryptoError::Base64 {
                field: "encrypted_flow_data",
            })?;

        let aes_key = self
            .private_key
            .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
            .map_err(|_| CryptoError::KeyUnwrap)?;

        let plaintext = gcm_open(&aes_key, &nonce, &sealed)?;
        let payload: Value = serde_json::from_slice(&plaintext)?;
        debug!(
            key_len = aes_key.len(),
            nonce_len = nonce.len(),
            "Flow request opened"
        );
        Ok((payload, RequestContext { aes_key, nonce }))
    }

    /// Seal a response under the request's key and the complemented nonce.
    /// Returns the base64 of ciphertext-plus-tag.
    pub fn encrypt(
        &self,
        response: &Value,
        context: &RequestContext,
    ) -> Result<String, CryptoError> {
        let flipped: Vec<u8> = context.nonce.iter().map(|b| !b).collect();
        let plaintext = serde_json::to_vec(response)?;
        let sealed = gcm_seal(&context.aes_key, &flipped, &plaintext)?;
        Ok(BASE64.encode(sealed))
    }
}

// ── AES-GCM over the accepted key/nonce length grid ─────────────────

fn gcm_open(key: &[u8], nonce: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match (key.len(), nonce.len()) {
        (16, 12) => open_with::<AesGcm<Aes128, U12>>(key, nonce, sealed),
        (16, 16) => open_with::<AesGcm<Aes128, U16>>(key, nonce, sealed),
        (32, 12) => open_with::<AesGcm<Aes256, U12>>(key, nonce, sealed),
        (32, 16) => open_with::<AesGcm<Aes256, U16>>(key, nonce, sealed),
        (16 | 32, n) => Err(CryptoError::NonceLength(n)),
        (k, _) => Err(CryptoError::KeyLength(k)),
    }
}

fn gcm_seal(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match (key.len(), nonce.len()) {
        (16, 12) => seal_with::<AesGcm<Aes128, U12>>(key, nonce, plaintext),
        (16, 16) => seal_with::<AesGcm<Aes128, U16>>(key, nonce, plaintext),
        (32, 12) => seal_with::<AesGcm<Aes256, U12>>(key, nonce, plaintext),
        (32, 16) => seal_with::<AesGcm<Aes256, U16>>(key, nonce, plaintext),
        (16 | 32, n) => Err(CryptoError::NonceLength(n)),
        (k, _) => Err(CryptoError::KeyLength(k)),
    }
}

fn open_with<C: Aead + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    sealed: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))?;
    cipher
        .decrypt(GenericArray::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::Open)
}

fn seal_with<C: Aead + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))?;
    cipher
        .encrypt(GenericArray::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::Seal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use rsa::RsaPublicKey;
    use rsa::pkcs8::EncodePrivateKey;
    use secrecy::SecretString;
    use serde_json::json;

    fn crypto_with_key() -> (FlowCrypto, RsaPublicKey) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        (FlowCrypto { private_key }, public_key)
    }

    /// Build the three request fields the way a client does.
    fn client_request(
        public_key: &RsaPublicKey,
        payload: &Value,
        key_len: usize,
        nonce_len: usize,
    ) -> (String, String, String, Vec<u8>, Vec<u8>) {
        let mut rng = rand::thread_rng();
        let mut aes_key = vec![0u8; key_len];
        rng.fill_bytes(&mut aes_key);
        let mut nonce = vec![0u8; nonce_len];
        rng.fill_bytes(&mut nonce);

        let wrapped = public_key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), &aes_key)
            .unwrap();
        let sealed = gcm_seal(&aes_key, &nonce, &serde_json::to_vec(payload).unwrap()).unwrap();

        (
            BASE64.encode(wrapped),
            BASE64.encode(&nonce),
            BASE64.encode(sealed),
            aes_key,
            nonce,
        )
    }

    #[test]
    fn request_round_trips_through_decrypt() {
        let (crypto, public_key) = crypto_with_key();
        let payload = json!({ "action": "ping", "version": "3.0" });
        let (key_b64, iv_b64, data_b64, ..) = client_request(&public_key, &payload, 16, 16);

        let (opened, _context) = crypto.decrypt(&key_b64, &iv_b64, &data_b64).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn all_key_and_nonce_lengths_are_accepted() {
        let (crypto, public_key) = crypto_with_key();
        let payload = json!({ "action": "ping" });
        for (key_len, nonce_len) in [(16, 12), (16, 16), (32, 12), (32, 16)] {
            let (key_b64, iv_b64, data_b64, ..) =
                client_request(&public_key, &payload, key_len, nonce_len);
            let (opened, _) = crypto.decrypt(&key_b64, &iv_b64, &data_b64).unwrap();
            assert_eq!(opened, payload, "key={key_len} nonce={nonce_len}");
        }
    }

    #[test]
    fn response_is_sealed_under_the_complemented_nonce() {
        let (crypto, public_key) = crypto_with_key();
        let (key_b64, iv_b64, data_b64, aes_key, nonce) =
            client_request(&public_key, &json!({ "action": "ping" }), 16, 16);
        let (_, context) = crypto.decrypt(&key_b64, &iv_b64, &data_b64).unwrap();

        let response = json!({ "data": { "status": "active" } });
        let sealed_b64 = crypto.encrypt(&response, &context).unwrap();
        let sealed = BASE64.decode(sealed_b64).unwrap();

        // Client side: opens under the flipped nonce only
        assert!(gcm_open(&aes_key, &nonce, &sealed).is_err());
        let flipped: Vec<u8> = nonce.iter().map(|b| !b).collect();
        let opened = gcm_open(&aes_key, &flipped, &sealed).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&opened).unwrap(), response);
    }

    #[test]
    fn sealing_is_deterministic_for_a_fixed_context() {
        let (crypto, public_key) = crypto_with_key();
        let (key_b64, iv_b64, data_b64, ..) =
            client_request(&public_key, &json!({ "action": "ping" }), 16, 16);
        let (_, context) = crypto.decrypt(&key_b64, &iv_b64, &data_b64).unwrap();

        let first = crypto.encrypt(&json!({ "n": 1 }), &context).unwrap();
        let again = crypto.encrypt(&json!({ "n": 1 }), &context).unwrap();
        let different = crypto.encrypt(&json!({ "n": 2 }), &context).unwrap();
        assert_eq!(first, again);
        assert_ne!(first, different);
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let (crypto, public_key) = crypto_with_key();
        let (key_b64, iv_b64, data_b64, ..) =
            client_request(&public_key, &json!({ "action": "ping" }), 16, 16);

        let mut sealed = BASE64.decode(&data_b64).unwrap();
        sealed[0] ^= 0x01;
        let tampered_b64 = BASE64.encode(sealed);

        match crypto.decrypt(&key_b64, &iv_b64, &tampered_b64).map(|_| ()) {
            Err(CryptoError::Open) => {}
            other => panic!("Expected Open error, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_key_length_is_rejected() {
        let (crypto, public_key) = crypto_with_key();
        // 24-byte key: valid for the wrap, rejected at the GCM stage
        let mut rng = rand::thread_rng();
        let aes_key = [0u8; 24];
        let wrapped = public_key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), &aes_key)
            .unwrap();
        let result = crypto
            .decrypt(
                &BASE64.encode(wrapped),
                &BASE64.encode([0u8; 16]),
                &BASE64.encode([0u8; 32]),
            )
            .map(|_| ());
        match result {
            Err(CryptoError::KeyLength(24)) => {}
            other => panic!("Expected KeyLength(24), got {other:?}"),
        }
    }

    #[test]
    fn malformed_base64_names_the_field() {
        let (crypto, _) = crypto_with_key();
        match crypto.decrypt("!!!", "AAAA", "AAAA").map(|_| ()) {
            Err(CryptoError::Base64 {
                field: "encrypted_aes_key",
            }) => {}
            other => panic!("Expected Base64 error, got {other:?}"),
        }
    }

    #[test]
    fn pkcs8_pem_loads_without_password() {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap();
        let config = FlowKeyConfig {
            private_key_pem: SecretString::from(pem.to_string()),
            private_key_password: None,
        };
        assert!(FlowCrypto::from_config(&config).is_ok());
    }

    #[test]
    fn garbage_pem_reports_key_load_error() {
        let config = FlowKeyConfig {
            private_key_pem: SecretString::from("not a pem"),
            private_key_password: None,
        };
        match FlowCrypto::from_config(&config) {
            Err(CryptoError::KeyLoad(_)) => {}
            other => panic!("Expected KeyLoad, got {:?}", other.err()),
        }
    }
}
