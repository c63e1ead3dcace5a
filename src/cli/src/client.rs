//! HTTP client for communicating with the Mediascribe API server.

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// API response wrapper matching the server's ApiResponse format.
#[derive(Debug, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

/// HTTP client for the Mediascribe API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a GET request and deserialize the response data.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        decode(resp, &url).await
    }

    /// Perform a POST request with a JSON body and deserialize the response.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        decode(resp, &url).await
    }

    /// Perform a raw GET and return the body whatever the status.
    ///
    /// The health endpoint answers 503 with a full report when degraded.
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

async fn decode<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .with_context(|| format!("Failed to read response from {}", url))?;

    if !status.is_success() {
        // Error bodies carry `error` and `error_code`; fall back to the raw text.
        return match serde_json::from_str::<ApiResponse<serde_json::Value>>(&body) {
            Ok(api_resp) => Err(anyhow::anyhow!(
                "API error ({}) {}: {}",
                status,
                api_resp.error_code.unwrap_or_else(|| "UNKNOWN".into()),
                api_resp.error.unwrap_or_else(|| "Unknown error".into())
            )),
            Err(_) => Err(anyhow::anyhow!("API error ({}): {}", status, body)),
        };
    }

    let api_resp: ApiResponse<T> = serde_json::from_str(&body)
        .with_context(|| format!("Failed to parse response from {}", url))?;

    if api_resp.success {
        api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("API returned success but no data"))
    } else {
        Err(anyhow::anyhow!(
            "API error: {}",
            api_resp.error.unwrap_or_else(|| "Unknown error".into())
        ))
    }
}
