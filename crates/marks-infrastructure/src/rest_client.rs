//! Shared HTTP plumbing for the remote store adapters.

use marks_core::config::RemoteConfig;
use marks_core::error::{MarksError, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Thin wrapper around a `reqwest::Client` that knows the project base URL
/// and the public API key.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    anon_key: String,
    timeout: Duration,
}

impl RestClient {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url().to_string(),
            anon_key: config.anon_key.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Absolute URL for a path below the project base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Request with the `apikey` header and the default timeout.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("apikey", &self.anon_key)
            .timeout(self.timeout)
    }

    /// Request carrying the caller's bearer token.
    pub fn authorized(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.request(method, path)
            .header("Authorization", format!("Bearer {}", token))
    }
}

/// Turns a non-success response into `MarksError::Remote` for `operation`.
pub async fn ensure_success(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(status_error(operation, status, &error_text))
}

pub fn status_error(operation: &str, status: StatusCode, body: &str) -> MarksError {
    MarksError::remote(operation, format!("HTTP {}: {}", status, body.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_url: &str) -> RestClient {
        let config = RemoteConfig {
            api_url: api_url.to_string(),
            anon_key: "anon".to_string(),
            ..RemoteConfig::default()
        };
        RestClient::new(&config)
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = client("https://project.example.co/");
        assert_eq!(
            client.url("/rest/v1/bookmarks"),
            "https://project.example.co/rest/v1/bookmarks"
        );
        assert_eq!(
            client.url("auth/v1/user"),
            "https://project.example.co/auth/v1/user"
        );
    }

    #[test]
    fn test_request_sets_headers() {
        let request = client("https://project.example.co")
            .authorized(Method::GET, "rest/v1/bookmarks", "tok")
            .build()
            .unwrap();

        assert_eq!(request.headers()["apikey"], "anon");
        assert_eq!(request.headers()["Authorization"], "Bearer tok");
        assert!(request.timeout().is_some());
    }

    #[test]
    fn test_status_error_is_remote() {
        let err = status_error("list", StatusCode::SERVICE_UNAVAILABLE, " down \n");
        assert!(err.is_remote());
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("down"));
    }
}
