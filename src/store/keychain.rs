//! Keychain 백킹 스토어
//!
//! OS 키체인/키링의 generic password 항목을 `(service = namespace, account = key)`로 사용합니다.

use keyring::{Entry, Error as KeyringError};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{validate_namespace, SecureBackingStore, StoreHandle};
use crate::error::StoreError;

fn map_keyring_error(err: KeyringError) -> StoreError {
    StoreError::Keychain(err.to_string())
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.trim().is_empty() {
        return Err(StoreError::Keychain(
            "Secure store key must not be empty.".to_string(),
        ));
    }
    Ok(())
}

/// Keychain 백킹 스토어
#[derive(Debug, Default)]
pub struct KeychainStore;

impl KeychainStore {
    pub fn new() -> Self {
        Self
    }
}

impl SecureBackingStore for KeychainStore {
    fn open(&self, namespace: &str) -> Result<Box<dyn StoreHandle>, StoreError> {
        validate_namespace(namespace)?;
        Ok(Box::new(KeychainHandle {
            service: namespace.to_string(),
            entries: Mutex::new(HashMap::new()),
        }))
    }

    fn kind(&self) -> &'static str {
        "keychain"
    }
}

struct KeychainHandle {
    service: String,
    // 키별 Entry는 핸들 수명 동안 재사용
    entries: Mutex<HashMap<String, Entry>>,
}

impl KeychainHandle {
    fn with_entry<T>(
        &self,
        key: &str,
        f: impl FnOnce(&Entry) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(key) {
            let entry = Entry::new(&self.service, key).map_err(map_keyring_error)?;
            entries.insert(key.to_string(), entry);
        }
        match entries.get(key) {
            Some(entry) => f(entry),
            None => Err(StoreError::Keychain(format!("No keychain entry for {}", key))),
        }
    }
}

impl StoreHandle for KeychainHandle {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(KeyringError::NoEntry) => Ok(None),
            Err(err) => Err(StoreError::Read(err.to_string())),
        })
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        // set_password는 기존 항목을 교체
        self.with_entry(key, |entry| {
            entry
                .set_password(value)
                .map_err(|e| StoreError::Write(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn use_mock_keyring() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
    }

    #[test]
    fn test_absent_key_reads_none() {
        use_mock_keyring();
        let handle = KeychainStore::new().open("secure_enterprise_api").unwrap();
        assert_eq!(handle.read("enterprise_api_key").unwrap(), None);
    }

    #[test]
    fn test_write_overwrites() {
        use_mock_keyring();
        let handle = KeychainStore::new().open("secure_enterprise_api").unwrap();

        handle.write("enterprise_api_key", "abc123").unwrap();
        handle.write("enterprise_api_key", "def456").unwrap();
        assert_eq!(
            handle.read("enterprise_api_key").unwrap(),
            Some("def456".to_string())
        );
    }

    #[test]
    fn test_empty_key_rejected() {
        use_mock_keyring();
        let handle = KeychainStore::new().open("secure_enterprise_api").unwrap();
        assert!(handle.read(" ").is_err());
        assert!(handle.write("", "v").is_err());
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        assert!(KeychainStore::new().open("").is_err());
    }
}
