/// Shared HTTP plumbing for the third-party adapters

use crate::integrations::types::IntegrationError;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

pub fn build_client(timeout: Duration) -> Result<Client, IntegrationError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("leadway/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| IntegrationError::Transport(e.to_string()))
}

/// Join a base URL and a path without doubling or dropping the slash
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// POST a JSON body with bearer auth and decode the JSON answer
pub async fn post_json<B, T>(
    http: &Client,
    url: &str,
    api_key: &str,
    proveedor: &str,
    body: &B,
) -> Result<T, IntegrationError>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    tracing::debug!("🌍 POST {} ({})", url, proveedor);

    let res = http
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(map_reqwest_error)?;

    match res.status() {
        s if s.is_success() => res
            .json::<T>()
            .await
            .map_err(|e| IntegrationError::Decode(e.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(IntegrationError::InvalidCredentials(proveedor.to_string()))
        }
        s => {
            let status = s.as_u16();
            let body = res.text().await.unwrap_or_default();
            Err(IntegrationError::Http { status, body })
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> IntegrationError {
    if e.is_timeout() {
        IntegrationError::Timeout
    } else {
        IntegrationError::Transport(e.to_string())
    }
}
