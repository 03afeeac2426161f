//! Credential Vault - 지연 초기화 및 단일 자격 증명 접근
//!
//! - 백킹 스토어는 첫 요청(또는 앱 시작) 시 1회 open
//! - open 성공 직후 프로비저닝 정책을 항상 적용
//! - open 실패는 영구적이지 않음 (다음 요청에서 재시도)
//! - `get()`은 에러를 빈 문자열로 삼키는 호환 래퍼, `fetch()`는 명시적 결과

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use zeroize::Zeroize;

use crate::config::{ProvisioningPolicy, VaultConfig};
use crate::error::{StoreError, VaultError};
use crate::store::{SecureBackingStore, StoreHandle};

/// 초기화 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultState {
    Uninitialized,
    Initializing,
    Ready,
    Failed(String),
}

/// 저장된 자격 증명
///
/// 키가 없으면 `present == false`, `value == ""`. drop 시 값을 지웁니다.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub value: String,
    pub present: bool,
}

impl Credential {
    fn absent() -> Self {
        Self {
            value: String::new(),
            present: false,
        }
    }

    pub fn into_value(mut self) -> String {
        std::mem::take(&mut self.value)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("value", &format_args!("<{} chars>", self.value.len()))
            .field("present", &self.present)
            .finish()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

struct Slot {
    state: VaultState,
    handle: Option<Arc<dyn StoreHandle>>,
}

/// Credential Vault
///
/// 프로세스당 1개를 만들어 `Arc`로 브리지에 넘깁니다.
pub struct CredentialVault {
    backend: Box<dyn SecureBackingStore>,
    namespace: String,
    storage_key: String,
    provisioning: ProvisioningPolicy,
    /// 동시 cold start 시 open이 1번만 실행되도록 보장
    init_guard: Mutex<()>,
    slot: RwLock<Slot>,
}

impl CredentialVault {
    pub fn new(
        backend: Box<dyn SecureBackingStore>,
        namespace: impl Into<String>,
        storage_key: impl Into<String>,
        provisioning: ProvisioningPolicy,
    ) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            storage_key: storage_key.into(),
            provisioning,
            init_guard: Mutex::new(()),
            slot: RwLock::new(Slot {
                state: VaultState::Uninitialized,
                handle: None,
            }),
        }
    }

    /// 설정의 배포 프로필 / 백엔드 / 정책으로 생성
    pub fn from_config(config: &VaultConfig) -> Self {
        Self::new(
            config.open_backend(),
            config.deployment.namespace(),
            config.deployment.storage_key(),
            config.provisioning.clone(),
        )
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// 현재 초기화 상태
    pub fn state(&self) -> VaultState {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == VaultState::Ready
    }

    fn set_state(&self, state: VaultState, handle: Option<Arc<dyn StoreHandle>>) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.state = state;
        slot.handle = handle;
    }

    /// 백킹 스토어 초기화 (여러 번 호출해도 안전)
    ///
    /// `Ready`면 no-op, `Failed`면 첫 시도와 똑같이 다시 open 합니다.
    pub fn ensure_initialized(&self) -> Result<(), VaultError> {
        if self.is_ready() {
            return Ok(());
        }

        let _guard = self
            .init_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // 대기하는 동안 다른 호출이 초기화를 끝냈을 수 있음
        if self.is_ready() {
            return Ok(());
        }

        self.set_state(VaultState::Initializing, None);
        tracing::info!(
            namespace = %self.namespace,
            backend = self.backend.kind(),
            "initializing secure store"
        );

        match self.backend.open(&self.namespace) {
            Ok(handle) => {
                let handle: Arc<dyn StoreHandle> = Arc::from(handle);

                // Ready 공개 전에 프로비저닝하여 "부재" 상태가 관측되지 않게 함
                if let ProvisioningPolicy::DefaultValue(default_value) = &self.provisioning {
                    self.provision_with(handle.as_ref(), default_value);
                }

                self.set_state(VaultState::Ready, Some(handle));
                tracing::info!(namespace = %self.namespace, "secure store ready");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(
                    namespace = %self.namespace,
                    error = %message,
                    "secure store initialization failed"
                );
                self.set_state(VaultState::Failed(message.clone()), None);
                Err(VaultError::Init(message))
            }
        }
    }

    /// 값이 없거나 비어 있으면 `default_value`를 저장
    ///
    /// 이미 값이 있으면 no-op. 실패는 로그만 남깁니다.
    pub fn provision_default_if_absent(&self, default_value: &str) {
        match self.handle() {
            Ok(handle) => self.provision_with(handle.as_ref(), default_value),
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "provisioning skipped");
            }
        }
    }

    fn provision_with(&self, handle: &dyn StoreHandle, default_value: &str) {
        match self.try_provision(handle, default_value) {
            Ok(true) => {
                tracing::info!(namespace = %self.namespace, "default credential provisioned")
            }
            Ok(false) => {
                tracing::debug!(namespace = %self.namespace, "credential already present")
            }
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "provisioning failed")
            }
        }
    }

    fn try_provision(
        &self,
        handle: &dyn StoreHandle,
        default_value: &str,
    ) -> Result<bool, StoreError> {
        let mut current = handle.read(&self.storage_key)?;
        let absent = current.as_deref().map_or(true, str::is_empty);
        current.zeroize();

        if !absent {
            return Ok(false);
        }
        handle.write(&self.storage_key, default_value)?;
        Ok(true)
    }

    fn handle(&self) -> Result<Arc<dyn StoreHandle>, VaultError> {
        self.ensure_initialized()?;
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handle
            .clone()
            .ok_or_else(|| VaultError::Init("Secure store is not open".to_string()))
    }

    /// 저장된 자격 증명 조회 (에러를 그대로 반환)
    pub fn fetch(&self) -> Result<Credential, VaultError> {
        let handle = self.handle()?;
        match handle.read(&self.storage_key) {
            Ok(Some(value)) => Ok(Credential {
                value,
                present: true,
            }),
            Ok(None) => Ok(Credential::absent()),
            Err(e) => Err(VaultError::Read(e.to_string())),
        }
    }

    /// 저장된 값 또는 빈 문자열
    ///
    /// 미초기화 / 키 없음 / 읽기 실패를 구분하지 않고 모두 `""`를 반환합니다.
    pub fn get(&self) -> String {
        match self.fetch() {
            Ok(credential) => {
                tracing::debug!(
                    namespace = %self.namespace,
                    present = credential.present,
                    length = credential.value.len(),
                    "credential read"
                );
                credential.into_value()
            }
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "credential read failed");
                String::new()
            }
        }
    }

    /// 자격 증명 덮어쓰기 (빈 문자열도 허용)
    pub fn store(&self, value: &str) -> Result<(), VaultError> {
        let handle = self.handle()?;
        handle
            .write(&self.storage_key, value)
            .map_err(|e| VaultError::Write(e.to_string()))?;

        tracing::info!(
            namespace = %self.namespace,
            length = value.len(),
            "credential stored"
        );
        Ok(())
    }
}
