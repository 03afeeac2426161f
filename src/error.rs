//! Secure API Error Types
//!
//! 저장소 / Vault / 브리지 계층별 에러 타입 정의

use serde::Serialize;
use thiserror::Error;

/// 백킹 스토어(암호화 저장소) 에러
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open secure store: {0}")]
    Init(String),

    #[error("Failed to read from secure store: {0}")]
    Read(String),

    #[error("Failed to write to secure store: {0}")]
    Write(String),

    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Credential Vault 에러
///
/// `get()`은 이 에러들을 빈 문자열로 삼키고, `fetch()` / `store()`는 그대로 반환합니다.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Vault initialization failed: {0}")]
    Init(String),

    #[error("Credential read failed: {0}")]
    Read(String),

    #[error("Credential write failed: {0}")]
    Write(String),
}

/// 설정 로드 에러
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown deployment: {0}")]
    UnknownDeployment(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// 바이너리 실행 에러
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// 브리지 에러 코드
pub mod codes {
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    pub const UNIMPLEMENTED: &str = "UNIMPLEMENTED";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
}

/// 브리지 응답용 직렬화 가능한 에러
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl BridgeError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        BridgeError {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_ARGUMENT, message)
    }

    pub fn unimplemented(method: &str) -> Self {
        BridgeError {
            code: codes::UNIMPLEMENTED.to_string(),
            message: "Method not implemented".to_string(),
            details: Some(method.to_string()),
        }
    }
}

impl From<VaultError> for BridgeError {
    fn from(error: VaultError) -> Self {
        BridgeError {
            code: codes::STORAGE_ERROR.to_string(),
            message: error.to_string(),
            details: None,
        }
    }
}

/// 브리지 처리 결과 타입
pub type BridgeResult<T> = Result<T, BridgeError>;
