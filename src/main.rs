//! secure-api-bridge: stdin의 JSON 요청을 처리해 stdout으로 응답하는 브리지 하네스

#[tokio::main]
async fn main() -> std::process::ExitCode {
    match secure_api_lib::run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("secure-api-bridge: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
