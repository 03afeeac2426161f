//! 암호화 prefs 파일 저장소
//!
//! - 마스터키는 Keychain에 1개만 저장 (`<namespace>:master_key_v1`)
//! - 값은 `data_dir/<namespace>.vault` 파일에 AEAD로 암호화하여 저장
//!
//! 파일 포맷 (v1):
//! - magic: `SAPIPRF1` (8 bytes)
//! - nonce: 24 bytes (XChaCha20-Poly1305)
//! - ciphertext: AEAD 결과 (= 암호문 + 태그)
//!
//! AAD: magic를 AAD로 사용 (포맷 바인딩)

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use keyring::Entry;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use zeroize::Zeroize;

use super::{validate_namespace, SecureBackingStore, StoreHandle};
use crate::error::StoreError;

/// 파일 매직 (8 bytes)
pub const PREFS_MAGIC: &[u8; 8] = b"SAPIPRF1";

/// 마스터키 길이 (256-bit)
pub const MASTER_KEY_LEN: usize = 32;

/// Nonce 길이 (XChaCha20-Poly1305용 24 bytes)
pub const NONCE_LEN: usize = 24;

/// 마스터키 Keychain 서비스 이름
pub const MASTER_KEY_SERVICE: &str = "com.secureapi.vault";

/// Zeroize가 적용된 마스터키 래퍼
pub struct MasterKey {
    bytes: [u8; MASTER_KEY_LEN],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// 마스터키 생성 (CSPRNG)
    pub fn generate() -> Self {
        let mut bytes = [0u8; MASTER_KEY_LEN];
        rand::thread_rng().fill(&mut bytes);
        Self { bytes }
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// 마스터키 공급원
///
/// 키 재료는 플랫폼이 관리합니다. 테스트나 키체인이 없는 호스트에서는 고정 키를 주입합니다.
pub trait MasterKeySource: Send + Sync {
    fn load_or_create(&self, namespace: &str) -> Result<MasterKey, StoreError>;
}

/// OS Keychain 기반 마스터키 (없으면 생성하고 저장)
pub struct KeychainMasterKey {
    service: String,
}

impl KeychainMasterKey {
    pub fn new() -> Self {
        Self::with_service(MASTER_KEY_SERVICE)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, namespace: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service, &format!("{}:master_key_v1", namespace))
            .map_err(|e| StoreError::Keychain(e.to_string()))
    }
}

impl Default for KeychainMasterKey {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterKeySource for KeychainMasterKey {
    fn load_or_create(&self, namespace: &str) -> Result<MasterKey, StoreError> {
        let entry = self.entry(namespace)?;
        load_or_create_in(&entry, namespace)
    }
}

/// Keychain 항목에서 마스터키 로드 (없으면 생성하고 같은 항목에 저장)
fn load_or_create_in(entry: &Entry, namespace: &str) -> Result<MasterKey, StoreError> {
    match entry.get_password() {
        Ok(mut encoded) => {
            let decoded = BASE64.decode(&encoded);
            encoded.zeroize();
            let mut bytes = decoded
                .map_err(|_| StoreError::Keychain("Invalid master key format".to_string()))?;

            if bytes.len() != MASTER_KEY_LEN {
                bytes.zeroize();
                return Err(StoreError::Keychain(
                    "Invalid master key format".to_string(),
                ));
            }

            let mut key = [0u8; MASTER_KEY_LEN];
            key.copy_from_slice(&bytes);
            bytes.zeroize();
            tracing::debug!(namespace, "master key loaded from keychain");
            Ok(MasterKey::from_bytes(key))
        }
        Err(keyring::Error::NoEntry) => {
            tracing::info!(namespace, "no master key found, generating new one");
            let key = MasterKey::generate();
            let mut encoded = BASE64.encode(key.bytes);
            let saved = entry
                .set_password(&encoded)
                .map_err(|e| StoreError::Keychain(e.to_string()));
            encoded.zeroize();
            saved?;
            Ok(key)
        }
        Err(e) => Err(StoreError::Keychain(e.to_string())),
    }
}

/// 고정 마스터키 (테스트 / 헤드리스 호스트용)
pub struct FixedMasterKey {
    bytes: [u8; MASTER_KEY_LEN],
}

impl FixedMasterKey {
    pub fn new(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self { bytes }
    }
}

impl Drop for FixedMasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl MasterKeySource for FixedMasterKey {
    fn load_or_create(&self, _namespace: &str) -> Result<MasterKey, StoreError> {
        Ok(MasterKey::from_bytes(self.bytes))
    }
}

/// prefs 파일에 저장되는 페이로드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefsPayload {
    /// key-value 맵 (실사용 시 키는 1개)
    pub entries: HashMap<String, String>,
    /// 페이로드 버전
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl Default for PrefsPayload {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            version: default_version(),
        }
    }
}

/// 마스터키를 사용해 페이로드를 암호화하고 prefs 파일에 저장
pub fn encrypt_and_write(
    path: &Path,
    master_key: &MasterKey,
    payload: &PrefsPayload,
) -> Result<(), StoreError> {
    let mut plaintext = serde_json::to_vec(payload)?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce);

    let cipher = XChaCha20Poly1305::new((&master_key.bytes).into());

    let encrypted = cipher.encrypt(
        XNonce::from_slice(&nonce),
        Payload {
            msg: &plaintext,
            aad: PREFS_MAGIC,
        },
    );
    plaintext.zeroize();
    let ciphertext = encrypted.map_err(|e| StoreError::Crypto(e.to_string()))?;

    // Atomic write: 임시 파일에 쓰고 rename
    let tmp_path = path.with_extension("vault.tmp");

    let written = write_prefs_file(&tmp_path, &nonce, &ciphertext)
        .and_then(|()| fs::rename(&tmp_path, path));
    if let Err(e) = written {
        // 실패 시 임시 파일을 남기지 않음
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    Ok(())
}

fn write_prefs_file(path: &Path, nonce: &[u8], ciphertext: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(PREFS_MAGIC)?;
    file.write_all(nonce)?;
    file.write_all(ciphertext)?;
    file.sync_all()
}

/// prefs 파일을 읽고 마스터키로 복호화
pub fn read_and_decrypt(path: &Path, master_key: &MasterKey) -> Result<PrefsPayload, StoreError> {
    let mut file = fs::File::open(path)?;

    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)?;
    if &magic != PREFS_MAGIC {
        return Err(StoreError::Crypto("Invalid prefs magic".to_string()));
    }

    let mut nonce = [0u8; NONCE_LEN];
    file.read_exact(&mut nonce)?;

    // 나머지 = ciphertext
    let mut ciphertext = Vec::new();
    file.read_to_end(&mut ciphertext)?;

    let cipher = XChaCha20Poly1305::new((&master_key.bytes).into());

    let mut plaintext = cipher
        .decrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad: PREFS_MAGIC,
            },
        )
        .map_err(|e| StoreError::Crypto(format!("Decryption failed: {}", e)))?;

    let payload = serde_json::from_slice::<PrefsPayload>(&plaintext);

    // 평문 메모리 지우기
    plaintext.zeroize();

    Ok(payload?)
}

/// data_dir 기반 prefs 파일 경로 생성
pub fn get_prefs_path(data_dir: &Path, namespace: &str) -> PathBuf {
    data_dir.join(format!("{}.vault", namespace))
}

/// 암호화 prefs 파일 백킹 스토어
pub struct EncryptedFileStore {
    data_dir: PathBuf,
    key_source: Box<dyn MasterKeySource>,
}

impl EncryptedFileStore {
    pub fn new(data_dir: impl Into<PathBuf>, key_source: Box<dyn MasterKeySource>) -> Self {
        Self {
            data_dir: data_dir.into(),
            key_source,
        }
    }

    /// Keychain 마스터키를 사용하는 기본 구성
    pub fn with_keychain(data_dir: impl Into<PathBuf>) -> Self {
        Self::new(data_dir, Box::new(KeychainMasterKey::new()))
    }
}

impl SecureBackingStore for EncryptedFileStore {
    fn open(&self, namespace: &str) -> Result<Box<dyn StoreHandle>, StoreError> {
        validate_namespace(namespace)?;
        fs::create_dir_all(&self.data_dir)?;

        let master_key = self.key_source.load_or_create(namespace)?;
        let path = get_prefs_path(&self.data_dir, namespace);

        let entries = if path.exists() {
            // 복호화 실패 = 손상된 저장소 (InitFailure)
            let payload = read_and_decrypt(&path, &master_key)
                .map_err(|e| StoreError::Init(format!("Corrupt prefs file: {}", e)))?;
            tracing::debug!(namespace, count = payload.entries.len(), "prefs file loaded");
            payload.entries
        } else {
            tracing::debug!(namespace, "no existing prefs file, starting fresh");
            HashMap::new()
        };

        Ok(Box::new(EncryptedFileHandle {
            path,
            master_key,
            entries: Mutex::new(entries),
        }))
    }

    fn kind(&self) -> &'static str {
        "encrypted-file"
    }
}

struct EncryptedFileHandle {
    path: PathBuf,
    master_key: MasterKey,
    entries: Mutex<HashMap<String, String>>,
}

impl StoreHandle for EncryptedFileHandle {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        // 파일 저장이 성공한 경우에만 캐시 교체
        let mut next = entries.clone();
        if let Some(mut old) = next.insert(key.to_string(), value.to_string()) {
            old.zeroize();
        }
        let payload = PrefsPayload {
            entries: next,
            version: 1,
        };

        encrypt_and_write(&self.path, &self.master_key, &payload)
            .map_err(|e| StoreError::Write(e.to_string()))?;

        let mut previous = std::mem::replace(&mut *entries, payload.entries);
        zeroize_entries(&mut previous);
        Ok(())
    }
}

impl Drop for EncryptedFileHandle {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().unwrap_or_else(PoisonError::into_inner);
        zeroize_entries(entries);
    }
}

fn zeroize_entries(entries: &mut HashMap<String, String>) {
    for value in entries.values_mut() {
        value.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn random_key() -> [u8; MASTER_KEY_LEN] {
        let mut key = [0u8; MASTER_KEY_LEN];
        rand::thread_rng().fill(&mut key);
        key
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vault");
        let key = MasterKey::from_bytes(random_key());

        let mut payload = PrefsPayload::default();
        payload
            .entries
            .insert("weather_api_key".to_string(), "sk-test123".to_string());
        assert_eq!(payload.version, 1);

        encrypt_and_write(&path, &key, &payload).unwrap();
        assert!(path.exists());

        let decrypted = read_and_decrypt(&path, &key).unwrap();
        assert_eq!(
            decrypted.entries.get("weather_api_key"),
            Some(&"sk-test123".to_string())
        );
        assert_eq!(decrypted.version, 1);
    }

    #[test]
    fn test_file_does_not_contain_plaintext() {
        let dir = tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), Box::new(FixedMasterKey::new(random_key())));

        let handle = store.open("secure_weather_prefs").unwrap();
        handle.write("weather_api_key", "plain-secret-value").unwrap();

        let raw = fs::read(get_prefs_path(dir.path(), "secure_weather_prefs")).unwrap();
        assert_eq!(&raw[..8], PREFS_MAGIC);
        let needle = b"plain-secret-value";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_reopen_keeps_value() {
        let dir = tempdir().unwrap();
        let key = random_key();

        {
            let store = EncryptedFileStore::new(dir.path(), Box::new(FixedMasterKey::new(key)));
            let handle = store.open("secure_enterprise_prefs").unwrap();
            assert_eq!(handle.read("enterprise_api_key").unwrap(), None);
            handle.write("enterprise_api_key", "abc123").unwrap();
            handle.write("enterprise_api_key", "def456").unwrap();
        }

        let store = EncryptedFileStore::new(dir.path(), Box::new(FixedMasterKey::new(key)));
        let handle = store.open("secure_enterprise_prefs").unwrap();
        assert_eq!(
            handle.read("enterprise_api_key").unwrap(),
            Some("def456".to_string())
        );
    }

    #[test]
    fn test_wrong_key_fails_open() {
        let dir = tempdir().unwrap();

        let store = EncryptedFileStore::new(dir.path(), Box::new(FixedMasterKey::new([1u8; 32])));
        store
            .open("secure_weather_prefs")
            .unwrap()
            .write("weather_api_key", "v")
            .unwrap();

        // 다른 키로 열면 손상된 저장소로 취급
        let other = EncryptedFileStore::new(dir.path(), Box::new(FixedMasterKey::new([2u8; 32])));
        let result = other.open("secure_weather_prefs");
        assert!(matches!(result, Err(StoreError::Init(_))));
    }

    #[test]
    fn test_truncated_file_fails_open() {
        let dir = tempdir().unwrap();
        fs::write(get_prefs_path(dir.path(), "secure_weather_prefs"), b"SAPI").unwrap();

        let store = EncryptedFileStore::new(dir.path(), Box::new(FixedMasterKey::new([7u8; 32])));
        assert!(store.open("secure_weather_prefs").is_err());
    }

    #[test]
    fn test_failed_write_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("prefs");
        let store = EncryptedFileStore::new(&data_dir, Box::new(FixedMasterKey::new([3u8; 32])));
        let handle = store.open("secure_weather_prefs").unwrap();
        handle.write("weather_api_key", "first").unwrap();

        // 디렉토리를 지우면 임시 파일 생성이 실패함
        fs::remove_dir_all(&data_dir).unwrap();
        assert!(matches!(
            handle.write("weather_api_key", "second"),
            Err(StoreError::Write(_))
        ));
        assert_eq!(
            handle.read("weather_api_key").unwrap(),
            Some("first".to_string())
        );
    }

    fn mock_entry(account: &str) -> Entry {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        Entry::new(MASTER_KEY_SERVICE, account).unwrap()
    }

    #[test]
    fn test_keychain_master_key_generated_and_reused() {
        let entry = mock_entry("secure_weather_prefs:master_key_v1");

        let generated = load_or_create_in(&entry, "secure_weather_prefs").unwrap();
        let stored = BASE64.decode(entry.get_password().unwrap()).unwrap();
        assert_eq!(stored.len(), MASTER_KEY_LEN);
        assert_eq!(stored.as_slice(), &generated.bytes[..]);

        // 두 번째 호출은 저장된 키를 그대로 로드
        let loaded = load_or_create_in(&entry, "secure_weather_prefs").unwrap();
        assert_eq!(loaded.bytes, generated.bytes);
    }

    #[test]
    fn test_keychain_master_key_rejects_bad_base64() {
        let entry = mock_entry("secure_weather_prefs:master_key_v1");
        entry.set_password("not base64 !!").unwrap();

        let result = load_or_create_in(&entry, "secure_weather_prefs");
        assert!(matches!(result, Err(StoreError::Keychain(_))));
    }

    #[test]
    fn test_keychain_master_key_rejects_wrong_length() {
        let entry = mock_entry("secure_weather_prefs:master_key_v1");
        entry.set_password(&BASE64.encode([9u8; 16])).unwrap();

        let result = load_or_create_in(&entry, "secure_weather_prefs");
        assert!(matches!(result, Err(StoreError::Keychain(_))));
        // 잘못된 키는 덮어쓰지 않음
        assert_eq!(
            BASE64.decode(entry.get_password().unwrap()).unwrap().len(),
            16
        );
    }

    #[test]
    fn test_failed_rename_leaves_no_tmp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secure_weather_prefs.vault");
        // 대상 경로가 비어있지 않은 디렉토리면 rename이 실패함
        fs::create_dir_all(path.join("occupied")).unwrap();

        let key = MasterKey::from_bytes([4u8; MASTER_KEY_LEN]);
        let result = encrypt_and_write(&path, &key, &PrefsPayload::default());
        assert!(result.is_err());
        assert!(!path.with_extension("vault.tmp").exists());
    }

    #[test]
    fn test_default_payload_version() {
        assert_eq!(PrefsPayload::default().version, 1);
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let dir = tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), Box::new(FixedMasterKey::new([0u8; 32])));
        assert!(store.open("../escape").is_err());
    }
}
