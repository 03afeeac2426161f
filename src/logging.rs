//! 로깅 초기화
//!
//! stdout은 브리지 와이어 전용이므로 로그는 stderr로 보냅니다.
//! 레벨은 `RUST_LOG`로 조정합니다 (기본 `info`).

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// 전역 subscriber 설치 (두 번째 호출부터는 무시)
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging();
        init_logging();
        tracing::info!("logging initialized");
    }
}
