//! Secure API - Credential Vault Library
//!
//! API 키 1개를 플랫폼 암호화 저장소(암호화 prefs 파일 / Keychain)에 보관하고,
//! method-call 브리지(`getApiKey` / `storeApiKey`)로 앱 계층에 노출합니다.

pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod store;
pub mod vault;

use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

pub use bridge::{Method, Request, RequestBridge, Response};
pub use config::{Deployment, ProvisioningPolicy, VaultConfig, WriteFailurePolicy};
pub use error::{AppError, BridgeError, StoreError, VaultError};
pub use vault::{Credential, CredentialVault, VaultState};

/// 설정으로 Vault를 만들고 브리지에 연결
pub fn build_bridge(config: &VaultConfig) -> RequestBridge {
    let vault = Arc::new(CredentialVault::from_config(config));
    RequestBridge::new(config.deployment.channel(), vault, config.write_failures)
}

/// 줄 단위 JSON 요청을 처리 (빈 줄은 무시)
///
/// Vault I/O(키체인 접근 등)는 blocking 스레드에서 실행합니다.
pub async fn serve<R, W>(bridge: &RequestBridge, reader: R, mut writer: W) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let worker = bridge.clone();
        let response = tokio::task::spawn_blocking(move || worker.handle_json(&line)).await?;

        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

/// 브리지 실행
///
/// 1. `.env.local` / `.env` 로드
/// 2. 로깅 초기화
/// 3. 설정 → Vault → 브리지 구성, Vault 즉시 초기화 (실패해도 다음 요청에서 재시도)
/// 4. stdin → stdout 요청 처리
pub async fn run() -> Result<(), AppError> {
    let env_files = config::load_env();
    logging::init_logging();
    if !env_files.is_empty() {
        tracing::debug!(files = ?env_files, "env files loaded");
    }

    let config = VaultConfig::from_env()?;
    tracing::info!(
        deployment = ?config.deployment,
        backend = ?config.backend,
        provisioning = ?config.provisioning,
        "starting secure api bridge"
    );

    let bridge = build_bridge(&config);
    let startup = bridge.clone();
    let initialized = tokio::task::spawn_blocking(move || startup.vault().ensure_initialized()).await?;
    if let Err(e) = initialized {
        tracing::warn!(error = %e, "vault not ready at startup, will retry on first request");
    }

    serve(&bridge, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;

    tracing::info!(channel = bridge.channel(), "input closed, shutting down");
    Ok(())
}
