pub mod keyring;

use crate::domain::error::{AppError, Result};
use self::keyring::KeyringManager;
use sha2::{Digest, Sha256};

pub const KEYCHAIN_SERVICE: &str = "querybridge";

/// Resolve a secret reference.
///
/// - `env:NAME` reads the environment variable `NAME`
/// - `keychain:NAME` reads the OS keychain entry `NAME`
/// - `plain:value` returns `value` (development only)
/// - anything else is returned as-is
pub fn resolve_secret(reference: &str) -> Result<String> {
    if let Some(env_key) = reference.strip_prefix("env:") {
        std::env::var(env_key).map_err(|_| {
            AppError::ValidationError(format!(
                "Environment variable '{}' not found for secret",
                env_key
            ))
        })
    } else if let Some(key_name) = reference.strip_prefix("keychain:") {
        KeyringManager::default().get_secret(key_name)
    } else if let Some(plain) = reference.strip_prefix("plain:") {
        Ok(plain.to_string())
    } else {
        Ok(reference.to_string())
    }
}

/// Resolve an optional reference, treating blank values as absent
pub fn resolve_optional_secret(reference: Option<&str>) -> Result<Option<String>> {
    match reference.map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) => resolve_secret(r).map(Some),
        None => Ok(None),
    }
}

/// Lowercase hex SHA-256 of an API token; config files store only this digest
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_secret_env() {
        std::env::set_var("QB_TEST_DB_PASSWORD", "secret123");
        let result = resolve_secret("env:QB_TEST_DB_PASSWORD");
        assert_eq!(result.unwrap(), "secret123");
        std::env::remove_var("QB_TEST_DB_PASSWORD");
    }

    #[test]
    fn test_resolve_secret_missing_env() {
        let result = resolve_secret("env:QB_TEST_SURELY_MISSING");
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_resolve_secret_plain_and_direct() {
        assert_eq!(resolve_secret("plain:pw").unwrap(), "pw");
        assert_eq!(resolve_secret("direct_password").unwrap(), "direct_password");
    }

    #[test]
    fn test_resolve_optional_secret_blank() {
        assert_eq!(resolve_optional_secret(Some("  ")).unwrap(), None);
        assert_eq!(resolve_optional_secret(None).unwrap(), None);
    }

    #[test]
    fn test_hash_token() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
