//! Request Bridge
//!
//! 외부 호출자의 `(method, args)` 요청을 Vault 연산으로 매핑하고 응답으로 변환합니다.
//!
//! | method        | args              | 성공        |
//! |---------------|-------------------|-------------|
//! | `getApiKey`   | 없음              | 문자열      |
//! | `storeApiKey` | `{apiKey: 문자열}` | `true`      |
//! | 그 외          | -                 | UNIMPLEMENTED |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::WriteFailurePolicy;
use crate::error::{codes, BridgeError, BridgeResult};
use crate::vault::CredentialVault;

/// 브리지 메서드
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    GetApiKey,
    StoreApiKey,
    Unknown(String),
}

impl Method {
    pub fn parse(name: &str) -> Self {
        match name {
            "getApiKey" => Method::GetApiKey,
            "storeApiKey" => Method::StoreApiKey,
            other => Method::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GetApiKey => "getApiKey",
            Method::StoreApiKey => "storeApiKey",
            Method::Unknown(name) => name,
        }
    }
}

/// 브리지 요청 (호출마다 생성, 저장하지 않음)
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

impl Request {
    pub fn new(method: &str, args: Value) -> Self {
        Self {
            method: method.to_string(),
            args,
        }
    }
}

/// 브리지 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Success(Value),
    Failure(BridgeError),
}

impl Response {
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    /// 실패 응답의 에러 코드
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Response::Success(_) => None,
            Response::Failure(err) => Some(err.code.as_str()),
        }
    }
}

impl From<BridgeResult<Value>> for Response {
    fn from(result: BridgeResult<Value>) -> Self {
        match result {
            Ok(value) => Response::Success(value),
            Err(err) => Response::Failure(err),
        }
    }
}

/// 와이어 포맷 (`{"ok": true, "value": ...}` / `{"ok": false, "error": {...}}`)
#[derive(Serialize)]
struct WireResponse<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a BridgeError>,
}

impl Serialize for Response {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Response::Success(value) => WireResponse {
                ok: true,
                value: Some(value),
                error: None,
            },
            Response::Failure(err) => WireResponse {
                ok: false,
                value: None,
                error: Some(err),
            },
        };
        wire.serialize(serializer)
    }
}

/// `storeApiKey` 인자
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreApiKeyArgs {
    api_key: String,
}

/// Request Bridge
///
/// Vault 핸들과 쓰기 실패 정책 외에는 상태가 없습니다.
#[derive(Clone)]
pub struct RequestBridge {
    channel: String,
    vault: Arc<CredentialVault>,
    write_failures: WriteFailurePolicy,
}

impl RequestBridge {
    pub fn new(
        channel: impl Into<String>,
        vault: Arc<CredentialVault>,
        write_failures: WriteFailurePolicy,
    ) -> Self {
        Self {
            channel: channel.into(),
            vault,
            write_failures,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    /// 요청 1건 처리
    pub fn handle(&self, request: &Request) -> Response {
        let method = Method::parse(&request.method);
        tracing::debug!(channel = %self.channel, method = method.as_str(), "method call received");

        let response: Response = match method {
            Method::GetApiKey => self.get_api_key().into(),
            Method::StoreApiKey => self.store_api_key(&request.args).into(),
            Method::Unknown(name) => {
                tracing::info!(channel = %self.channel, method = %name, "method not implemented");
                Response::Failure(BridgeError::unimplemented(&name))
            }
        };

        if let Response::Failure(err) = &response {
            tracing::debug!(channel = %self.channel, code = %err.code, "method call failed");
        }
        response
    }

    /// JSON 한 줄 요청 → JSON 한 줄 응답
    pub fn handle_json(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(&request),
            Err(e) => Response::Failure(BridgeError::new(
                codes::INVALID_REQUEST,
                format!("Malformed request: {}", e),
            )),
        };

        match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response");
                r#"{"ok":false,"error":{"code":"INVALID_REQUEST","message":"Unserializable response","details":null}}"#
                    .to_string()
            }
        }
    }

    fn get_api_key(&self) -> BridgeResult<Value> {
        Ok(Value::String(self.vault.get()))
    }

    fn store_api_key(&self, args: &Value) -> BridgeResult<Value> {
        // args는 맵이어야 함 (배열 위치 인자 불가)
        // apiKey가 없거나 null / 문자열이 아니면 Vault를 건드리지 않음
        if !args.is_object() {
            return Err(BridgeError::invalid_argument("API key is null"));
        }
        let args = StoreApiKeyArgs::deserialize(args)
            .map_err(|_| BridgeError::invalid_argument("API key is null"))?;

        if let Err(e) = self.vault.store(&args.api_key) {
            match self.write_failures {
                WriteFailurePolicy::Permissive => {
                    tracing::warn!(channel = %self.channel, error = %e, "store failed, reporting success");
                }
                WriteFailurePolicy::Strict => return Err(e.into()),
            }
        }

        Ok(Value::Bool(true))
    }
}
