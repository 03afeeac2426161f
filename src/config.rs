//! 배포 프로필 및 환경 설정
//!
//! `.env.local` / `.env` 를 로드한 뒤 `SECURE_API_*` 환경 변수로 `VaultConfig`를 구성합니다.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::store::{EncryptedFileStore, KeychainStore, MemoryStore, SecureBackingStore};

pub const ENV_DEPLOYMENT: &str = "SECURE_API_DEPLOYMENT";
pub const ENV_BACKEND: &str = "SECURE_API_BACKEND";
pub const ENV_DATA_DIR: &str = "SECURE_API_DATA_DIR";
pub const ENV_DEFAULT_KEY: &str = "SECURE_API_DEFAULT_KEY";
pub const ENV_STRICT_WRITES: &str = "SECURE_API_STRICT_WRITES";

/// 데이터 디렉토리 기본값 (CWD 기준)
const DEFAULT_DATA_DIR: &str = ".secure-api";

/// 배포 프로필
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deployment {
    /// 날씨 앱 (앱 레벨 채널)
    #[default]
    Weather,
    /// 엔터프라이즈 플러그인
    Enterprise,
}

impl Deployment {
    pub fn channel(&self) -> &'static str {
        match self {
            Deployment::Weather => "secure_weather_channel",
            Deployment::Enterprise => "secure_enterprise_api",
        }
    }

    /// 암호화 prefs 파일 / 키체인 서비스 이름
    pub fn namespace(&self) -> &'static str {
        match self {
            Deployment::Weather => "secure_weather_prefs",
            Deployment::Enterprise => "secure_enterprise_prefs",
        }
    }

    /// 자격 증명이 저장되는 고정 키
    pub fn storage_key(&self) -> &'static str {
        match self {
            Deployment::Weather => "weather_api_key",
            Deployment::Enterprise => "enterprise_api_key",
        }
    }
}

impl FromStr for Deployment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weather" => Ok(Deployment::Weather),
            "enterprise" => Ok(Deployment::Enterprise),
            other => Err(ConfigError::UnknownDeployment(other.to_string())),
        }
    }
}

/// 백킹 스토어 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    EncryptedFile,
    Keychain,
    Memory,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "encrypted-file" | "encrypted_file" | "file" => Ok(BackendKind::EncryptedFile),
            "keychain" => Ok(BackendKind::Keychain),
            "memory" => Ok(BackendKind::Memory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// 기본 자격 증명 프로비저닝 정책
///
/// 초기화가 성공할 때마다 항상 적용됩니다. 기본값은 소스 코드 상수가 아니라
/// 프로비저닝 채널(환경 변수 등)에서 주입해야 합니다.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum ProvisioningPolicy {
    #[default]
    Disabled,
    DefaultValue(String),
}

impl std::fmt::Debug for ProvisioningPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningPolicy::Disabled => write!(f, "Disabled"),
            ProvisioningPolicy::DefaultValue(v) => write!(f, "DefaultValue(<{} chars>)", v.len()),
        }
    }
}

/// 쓰기 실패를 브리지 응답에 어떻게 반영할지
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteFailurePolicy {
    /// 쓰기 실패와 관계없이 `true` 응답 (기존 동작 호환)
    #[default]
    Permissive,
    /// 쓰기 실패를 `STORAGE_ERROR`로 반환
    Strict,
}

/// Vault 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    pub deployment: Deployment,
    pub backend: BackendKind,
    pub data_dir: PathBuf,
    pub provisioning: ProvisioningPolicy,
    pub write_failures: WriteFailurePolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            deployment: Deployment::default(),
            backend: BackendKind::default(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            provisioning: ProvisioningPolicy::default(),
            write_failures: WriteFailurePolicy::default(),
        }
    }
}

impl VaultConfig {
    /// 프로세스 환경 변수로 구성
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의 조회 함수로 구성 (테스트에서 환경 변수 대신 사용)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // 빈 문자열은 미설정으로 취급
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let deployment = match get(ENV_DEPLOYMENT) {
            Some(v) => v.parse::<Deployment>()?,
            None => Deployment::default(),
        };

        let backend = match get(ENV_BACKEND) {
            Some(v) => v.parse::<BackendKind>()?,
            None => BackendKind::default(),
        };

        let data_dir = get(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let provisioning = match get(ENV_DEFAULT_KEY) {
            Some(v) => ProvisioningPolicy::DefaultValue(v.trim().to_string()),
            None => ProvisioningPolicy::Disabled,
        };

        let write_failures = match get(ENV_STRICT_WRITES) {
            Some(v) => {
                if parse_bool(ENV_STRICT_WRITES, &v)? {
                    WriteFailurePolicy::Strict
                } else {
                    WriteFailurePolicy::Permissive
                }
            }
            None => WriteFailurePolicy::default(),
        };

        Ok(Self {
            deployment,
            backend,
            data_dir,
            provisioning,
            write_failures,
        })
    }

    /// 설정된 백킹 스토어 생성
    pub fn open_backend(&self) -> Box<dyn SecureBackingStore> {
        match self.backend {
            BackendKind::EncryptedFile => Box::new(EncryptedFileStore::with_keychain(&self.data_dir)),
            BackendKind::Keychain => Box::new(KeychainStore::new()),
            BackendKind::Memory => Box::new(MemoryStore::new()),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn is_valid_env_key(key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    // 관례적으로 ENV 키는 A-Z0-9_ 로 제한
    key.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// `KEY=VALUE` 라인만 읽는 관대한 로더
///
/// 이미 비어있지 않은 값으로 설정된 변수는 덮어쓰지 않습니다.
fn try_load_env_lenient(path: &Path) -> std::io::Result<usize> {
    let text = std::fs::read_to_string(path)?;
    let mut loaded = 0usize;

    for (key, value) in parse_env_lines(&text) {
        if let Ok(existing) = std::env::var(&key) {
            if !existing.trim().is_empty() {
                continue;
            }
        }
        std::env::set_var(&key, value);
        loaded += 1;
    }

    Ok(loaded)
}

/// 주석/코드펜스/설명 라인은 무시하고 유효한 `KEY=VALUE` 쌍만 추출
fn parse_env_lines(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("```") {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim();
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let key = k.trim();
        if !is_valid_env_key(key) {
            continue;
        }

        let mut value = v.trim().to_string();
        // 간단한 quote 제거 ("..." / '...')
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = value[1..value.len() - 1].to_string();
        }
        pairs.push((key.to_string(), value));
    }

    pairs
}

/// `.env.local` → `.env` 순서로 로드하고, 로드된 파일 이름을 반환
///
/// 파일이 없을 수 있으므로 실패해도 무시합니다. strict 파서(dotenvy)가 실패하면
/// lenient 로더로 보강합니다. 로깅 초기화 전에 호출되므로 직접 로그를 남기지 않습니다.
pub fn load_env() -> Vec<&'static str> {
    let mut loaded_files = Vec::new();

    for filename in [".env.local", ".env"] {
        let path = Path::new(filename);
        if !path.exists() {
            continue;
        }
        if dotenvy::from_path(path).is_ok() {
            loaded_files.push(filename);
            continue;
        }
        if let Ok(loaded) = try_load_env_lenient(path) {
            if loaded > 0 {
                loaded_files.push(filename);
            }
        }
    }

    loaded_files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = VaultConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, VaultConfig::default());
        assert_eq!(config.provisioning, ProvisioningPolicy::Disabled);
        assert_eq!(config.write_failures, WriteFailurePolicy::Permissive);
    }

    #[test]
    fn test_enterprise_profile() {
        let config = VaultConfig::from_lookup(lookup(&[
            (ENV_DEPLOYMENT, "Enterprise"),
            (ENV_BACKEND, "keychain"),
            (ENV_DATA_DIR, "/tmp/prefs"),
            (ENV_STRICT_WRITES, "1"),
        ]))
        .unwrap();

        assert_eq!(config.deployment, Deployment::Enterprise);
        assert_eq!(config.deployment.channel(), "secure_enterprise_api");
        assert_eq!(config.deployment.namespace(), "secure_enterprise_prefs");
        assert_eq!(config.deployment.storage_key(), "enterprise_api_key");
        assert_eq!(config.backend, BackendKind::Keychain);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/prefs"));
        assert_eq!(config.write_failures, WriteFailurePolicy::Strict);
    }

    #[test]
    fn test_default_key_enables_provisioning() {
        let config =
            VaultConfig::from_lookup(lookup(&[(ENV_DEFAULT_KEY, "  secret-from-env  ")])).unwrap();
        assert_eq!(
            config.provisioning,
            ProvisioningPolicy::DefaultValue("secret-from-env".to_string())
        );

        let config = VaultConfig::from_lookup(lookup(&[(ENV_DEFAULT_KEY, "   ")])).unwrap();
        assert_eq!(config.provisioning, ProvisioningPolicy::Disabled);
    }

    #[test]
    fn test_policy_debug_hides_value() {
        let policy = ProvisioningPolicy::DefaultValue("hunter2".to_string());
        let shown = format!("{:?}", policy);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("7 chars"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            VaultConfig::from_lookup(lookup(&[(ENV_DEPLOYMENT, "banking")])),
            Err(ConfigError::UnknownDeployment(_))
        ));
        assert!(matches!(
            VaultConfig::from_lookup(lookup(&[(ENV_BACKEND, "sqlite")])),
            Err(ConfigError::UnknownBackend(_))
        ));
        assert!(matches!(
            VaultConfig::from_lookup(lookup(&[(ENV_STRICT_WRITES, "maybe")])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_parse_env_lines_skips_noise() {
        let text = "# comment\n```\nexport SECURE_API_BACKEND=memory\nnot a pair\nlower_case=1\nSECURE_API_DEFAULT_KEY=\"quoted\"\n";
        let pairs = parse_env_lines(text);
        assert_eq!(
            pairs,
            vec![
                ("SECURE_API_BACKEND".to_string(), "memory".to_string()),
                ("SECURE_API_DEFAULT_KEY".to_string(), "quoted".to_string()),
            ]
        );
    }
}
