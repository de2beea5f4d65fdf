use crate::domain::error::{AppError, Result};
use keyring::Entry;

/// Read-only view of the OS keychain under one service name
pub struct KeyringManager {
    service: String,
}

impl KeyringManager {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    /// Look up `name`; a missing entry is reported separately from keychain failures
    pub fn get_secret(&self, name: &str) -> Result<String> {
        let entry = Entry::new(&self.service, name).map_err(|e| {
            AppError::ValidationError(format!("Invalid keychain entry '{}': {}", name, e))
        })?;

        match entry.get_password() {
            Ok(secret) => Ok(secret),
            Err(keyring::Error::NoEntry) => Err(AppError::ValidationError(format!(
                "Keychain entry '{}' not found for service '{}'",
                name, self.service
            ))),
            Err(e) => Err(AppError::Internal(format!(
                "Keychain lookup for '{}' failed: {}",
                name, e
            ))),
        }
    }
}

impl Default for KeyringManager {
    fn default() -> Self {
        Self::new(super::KEYCHAIN_SERVICE)
    }
}
