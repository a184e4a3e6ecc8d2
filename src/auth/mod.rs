//! Bearer token authentication and the scope capability model (spec §4.3).
//!
//! `Authorization: Bearer` tokens carry a scope set (`admin`, `publish:all`,
//! `publish:pkg:<name>`, `read:all`) rather than a fixed trust-level enum.

pub mod password;
pub mod session;

use crate::error::{RegistryError, Result};
use crate::metadata::{MetadataStore, Token};
use crate::package::ScopeSet;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Outcome of evaluating the `Authorization` header against the token
/// store, before any scope predicate is checked.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Missing,
    Invalid(String),
    Success(Token),
}

/// Hash a token plaintext the same way at issuance and at lookup time
/// (invariant 3: plaintext is never persisted).
pub fn hash_token(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a fresh token: `rgy_<32 random bytes, hex>`, returned alongside
/// its hash for storage.
pub fn generate_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext = format!("rgy_{}", hex::encode(bytes));
    let hash = hash_token(&plaintext);
    (plaintext, hash)
}

fn parse_bearer(header_value: Option<&str>) -> Option<&str> {
    header_value?.strip_prefix("Bearer ").map(str::trim)
}

/// Look up the bearer token in `Authorization`, verifying expiry, and
/// touching `last_used_at` on success.
pub async fn authenticate(store: &dyn MetadataStore, authorization: Option<&str>) -> Result<AuthOutcome> {
    let plaintext = match parse_bearer(authorization) {
        Some(t) if !t.is_empty() => t,
        _ => return Ok(AuthOutcome::Missing),
    };
    let hash = hash_token(plaintext);
    let token = match store.get_token_by_hash(&hash).await? {
        Some(t) => t,
        None => return Ok(AuthOutcome::Invalid("unknown token".to_string())),
    };
    if let Some(expires_at) = token.expires_at {
        if expires_at <= Utc::now() {
            return Ok(AuthOutcome::Invalid("token expired".to_string()));
        }
    }
    store.touch_token(&hash).await?;
    Ok(AuthOutcome::Success(token))
}

fn scopes_of(token: &Token) -> ScopeSet {
    ScopeSet::new(token.scopes.clone())
}

/// Require any authenticated token with `read:all` or `admin` scope.
pub fn require_read(outcome: &AuthOutcome) -> Result<&Token> {
    match outcome {
        AuthOutcome::Success(token) if scopes_of(token).requires_read() => Ok(token),
        AuthOutcome::Success(_) => Err(RegistryError::AuthForbidden("token lacks read scope".to_string())),
        AuthOutcome::Invalid(msg) => Err(RegistryError::AuthInvalid(msg.clone())),
        AuthOutcome::Missing => Err(RegistryError::AuthMissing),
    }
}

/// Require a token authorized to publish `package`.
pub fn require_publish(outcome: &AuthOutcome, package: &str) -> Result<&Token> {
    match outcome {
        AuthOutcome::Success(token) if scopes_of(token).requires_package_publish(package) => Ok(token),
        AuthOutcome::Success(_) => Err(RegistryError::AuthForbidden(format!(
            "token lacks publish scope for '{package}'"
        ))),
        AuthOutcome::Invalid(msg) => Err(RegistryError::AuthInvalid(msg.clone())),
        AuthOutcome::Missing => Err(RegistryError::AuthMissing),
    }
}

/// Require any successfully authenticated token, regardless of its scopes.
///
/// Used where a deployment has relaxed `REQUIRE_PUBLISH_AUTH` to skip the
/// publish-scope predicate but still needs a user to attribute the upload to.
pub fn require_any(outcome: &AuthOutcome) -> Result<&Token> {
    match outcome {
        AuthOutcome::Success(token) => Ok(token),
        AuthOutcome::Invalid(msg) => Err(RegistryError::AuthInvalid(msg.clone())),
        AuthOutcome::Missing => Err(RegistryError::AuthMissing),
    }
}

/// Require the `admin` scope specifically.
pub fn require_admin(outcome: &AuthOutcome) -> Result<&Token> {
    match outcome {
        AuthOutcome::Success(token) if scopes_of(token).is_admin() => Ok(token),
        AuthOutcome::Success(_) => Err(RegistryError::AuthForbidden("admin scope required".to_string())),
        AuthOutcome::Invalid(msg) => Err(RegistryError::AuthInvalid(msg.clone())),
        AuthOutcome::Missing => Err(RegistryError::AuthMissing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_parsing_strips_prefix() {
        assert_eq!(parse_bearer(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(parse_bearer(Some("abc123")), None);
        assert_eq!(parse_bearer(None), None);
    }

    #[test]
    fn generated_token_hash_matches_lookup_hash() {
        let (plaintext, hash) = generate_token();
        assert!(plaintext.starts_with("rgy_"));
        assert_eq!(hash_token(&plaintext), hash);
    }

    #[test]
    fn missing_auth_rejected_by_all_predicates() {
        let outcome = AuthOutcome::Missing;
        assert!(require_read(&outcome).is_err());
        assert!(require_publish(&outcome, "alpha").is_err());
        assert!(require_admin(&outcome).is_err());
        assert!(require_any(&outcome).is_err());
    }

    fn token_with_scopes(scopes: Vec<&str>) -> Token {
        Token {
            hash: "h".into(),
            user_id: "u1".into(),
            label: "l".into(),
            scopes: scopes.into_iter().map(String::from).collect(),
            expires_at: None,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn admin_scope_satisfies_every_predicate() {
        let outcome = AuthOutcome::Success(token_with_scopes(vec!["admin"]));
        assert!(require_read(&outcome).is_ok());
        assert!(require_publish(&outcome, "anything").is_ok());
        assert!(require_admin(&outcome).is_ok());
    }

    #[test]
    fn scoped_publish_token_cannot_publish_other_package() {
        let outcome = AuthOutcome::Success(token_with_scopes(vec!["publish:pkg:alpha"]));
        assert!(require_publish(&outcome, "alpha").is_ok());
        assert!(require_publish(&outcome, "beta").is_err());
        assert!(require_read(&outcome).is_err());
    }
}
</content>
