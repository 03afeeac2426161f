//! Secure Backing Store 모듈
//!
//! 네임스페이스 1개에 대한 플랫폼 암호화 key-value 저장소 경계를 정의합니다.
//!
//! - `encrypted_file`: Keychain 마스터키 + AEAD 암호화 prefs 파일 (EncryptedSharedPreferences 대응)
//! - `keychain`: OS 키체인 generic password 항목 (iOS Keychain 대응)
//! - `memory`: 테스트/임시 호스트용 인메모리 저장소

pub mod encrypted_file;
pub mod keychain;
pub mod memory;

use crate::error::StoreError;

pub use encrypted_file::{EncryptedFileStore, FixedMasterKey, KeychainMasterKey, MasterKeySource};
pub use keychain::KeychainStore;
pub use memory::MemoryStore;

/// 저장소 열기 (프로세스당 1회 호출 전제)
pub trait SecureBackingStore: Send + Sync {
    /// `namespace`로 범위가 지정된 암호화 저장소를 생성하거나 엽니다.
    fn open(&self, namespace: &str) -> Result<Box<dyn StoreHandle>, StoreError>;

    /// 로그용 백엔드 이름
    fn kind(&self) -> &'static str;
}

/// 열린 저장소 핸들
pub trait StoreHandle: Send + Sync {
    /// 키가 없으면 `Ok(None)`. 부재는 에러가 아닙니다.
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// 덮어쓰기 (last-write-wins). 실패 시 이전 값이 그대로 유지되어야 합니다.
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// 네임스페이스 검증
///
/// 네임스페이스는 파일명 / 키체인 서비스명으로 그대로 사용되므로 경로 구분자를 허용하지 않습니다.
pub(crate) fn validate_namespace(namespace: &str) -> Result<(), StoreError> {
    if namespace.trim().is_empty() {
        return Err(StoreError::Init("Namespace must not be empty.".to_string()));
    }
    if namespace.contains(['/', '\\']) || namespace == "." || namespace == ".." {
        return Err(StoreError::Init(format!(
            "Namespace must be a plain name: {}",
            namespace
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_namespace() {
        assert!(validate_namespace("secure_weather_prefs").is_ok());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("   ").is_err());
        assert!(validate_namespace("../etc").is_err());
        assert!(validate_namespace("a\\b").is_err());
        assert!(validate_namespace("..").is_err());
    }
}
