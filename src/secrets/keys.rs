//! Local RSA key pair generation.

use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use super::error::{Result, SecretsError};
use super::store::KeyPair;
use super::types::SecretString;

pub const DEFAULT_KEY_LENGTH: usize = 2048;

/// Generate an RSA key pair as SPKI / PKCS#8 PEM.
///
/// CPU bound; async callers run it on the blocking pool.
pub fn generate_rsa_key_pair(bits: usize) -> Result<KeyPair> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| SecretsError::internal(format!("RSA key generation failed: {}", e)))?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| SecretsError::internal(format!("PKCS#8 encoding failed: {}", e)))?;
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| SecretsError::internal(format!("SPKI encoding failed: {}", e)))?;

    Ok(KeyPair {
        public_key: public_pem,
        private_key: SecretString::new(private_pem.as_str()),
        created_at: chrono::Utc::now().timestamp(),
    })
}
