//! Password hashing and transport-layer decryption (spec §4.3).
//!
//! Passwords are hashed with Argon2id (PHC string format, embedded
//! parameters). Browsers never send plaintext passwords: the server
//! publishes an RSA-2048 public key at startup and clients encrypt with
//! OAEP-SHA256 before submitting; [`PasswordTransport::decrypt`] undoes that
//! before hashing.

use crate::error::{RegistryError, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand_core::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Hash a plaintext password into a PHC-formatted Argon2id string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RegistryError::Internal(format!("password hashing failed: {e}")))
}

/// Verify a plaintext password against a previously stored PHC hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

fn weak_password_reason(password: &str) -> Option<&'static str> {
    if password.len() < 8 {
        return Some("must be at least 8 characters");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Some("must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Some("must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Some("must contain at least one digit");
    }
    None
}

/// Reject obviously weak passwords before hashing (spec §7 password policy).
pub fn validate_password_strength(password: &str) -> Result<()> {
    match weak_password_reason(password) {
        Some(reason) => Err(RegistryError::WeakPassword(reason.to_string())),
        None => Ok(()),
    }
}

/// Server-held RSA-2048 keypair published through `GET /api/public-key`.
pub struct PasswordTransport {
    private_key: RsaPrivateKey,
}

#[derive(Debug, serde::Serialize)]
pub struct PublicKeyResponse {
    pub modulus_hex: String,
    pub exponent_hex: String,
}

impl PasswordTransport {
    /// Generate a fresh keypair at startup; the private key never leaves
    /// the process.
    pub fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| RegistryError::Internal(format!("RSA keygen failed: {e}")))?;
        Ok(Self { private_key })
    }

    pub fn public_key_response(&self) -> PublicKeyResponse {
        let public_key = RsaPublicKey::from(&self.private_key);
        PublicKeyResponse {
            modulus_hex: hex::encode(public_key.n().to_bytes_be()),
            exponent_hex: hex::encode(public_key.e().to_bytes_be()),
        }
    }

    /// Decrypt a base64(OAEP-SHA256(password)) payload submitted by the
    /// client. Any decode/decrypt failure maps to `invalid_password_format`.
    pub fn decrypt(&self, base64_ciphertext: &str) -> Result<String> {
        use base64::Engine;
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(base64_ciphertext)
            .map_err(|_| RegistryError::Validation("invalid_password_format".to_string()))?;
        let padding = Oaep::new::<Sha256>();
        let plaintext = self
            .private_key
            .decrypt(padding, &ciphertext)
            .map_err(|_| RegistryError::Validation("invalid_password_format".to_string()))?;
        String::from_utf8(plaintext).map_err(|_| RegistryError::Validation("invalid_password_format".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("Alllowercase1").is_ok());
    }

    #[test]
    fn passwords_missing_a_character_class_are_rejected() {
        assert!(validate_password_strength("alllowercase1").is_err());
        assert!(validate_password_strength("ALLUPPERCASE1").is_err());
        assert!(validate_password_strength("NoDigitsHere").is_err());
    }

    #[test]
    fn oaep_round_trip_through_transport() {
        let transport = PasswordTransport::generate().unwrap();
        let response = transport.public_key_response();
        // Reconstruct the public key from the published hex fields to make
        // sure a client-side encrypt/decrypt pair actually round-trips.
        let n = rsa::BigUint::from_bytes_be(&hex::decode(&response.modulus_hex).unwrap());
        let e = rsa::BigUint::from_bytes_be(&hex::decode(&response.exponent_hex).unwrap());
        let public_key = RsaPublicKey::new(n, e).unwrap();
        let padding = Oaep::new::<Sha256>();
        let ciphertext = public_key
            .encrypt(&mut OsRng, padding, b"hunter2".as_slice())
            .unwrap();
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(ciphertext);
        let decrypted = transport.decrypt(&encoded).unwrap();
        assert_eq!(decrypted, "hunter2");
    }

    #[test]
    fn malformed_ciphertext_is_invalid_password_format() {
        let transport = PasswordTransport::generate().unwrap();
        let err = transport.decrypt("not-base64!!!").unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
</content>
