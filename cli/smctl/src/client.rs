//! HTTP client for API communication.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::Credentials;
use crate::error::CliError;

/// API client for server-manager.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(api_url: &str, credentials: Option<&Credentials>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(creds) = credentials {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", creds.token))
                    .context("Invalid token format")?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.client.get(self.url(path)).send().await?;
        self.handle_response(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        self.handle_response(response).await
    }

    /// POST where the API answers without a body (204).
    pub async fn post_no_content<B: Serialize>(&self, path: &str, body: &B) -> Result<(), CliError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        self.expect_success(response).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        let response = self.client.patch(self.url(path)).json(body).send().await?;
        self.handle_response(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), CliError> {
        let response = self.client.delete(self.url(path)).send().await?;
        self.expect_success(response).await
    }

    async fn expect_success(&self, response: reqwest::Response) -> Result<(), CliError> {
        if response.status().is_success() {
            Ok(())
        } else {
            self.handle_error(response).await
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CliError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to parse response: {}", e)))
        } else {
            self.handle_error(response).await
        }
    }

    async fn handle_error<T>(&self, response: reqwest::Response) -> Result<T, CliError> {
        let status = response.status();

        let problem: Problem = response.json().await.unwrap_or_else(|_| Problem {
            code: "unknown".to_string(),
            detail: status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
            request_id: None,
            details: Vec::new(),
        });

        if status == StatusCode::UNAUTHORIZED && problem.code != "invalid_credentials" {
            return Err(CliError::NotAuthenticated);
        }

        let fields = problem
            .details
            .into_iter()
            .map(|d| (d.field, d.message))
            .collect();
        Err(
            CliError::api(status.as_u16(), problem.code, problem.detail, problem.request_id)
                .with_fields(fields),
        )
    }
}

/// Problem document returned by the API on errors.
#[derive(Debug, Deserialize)]
struct Problem {
    code: String,
    detail: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    details: Vec<ProblemField>,
}

#[derive(Debug, Deserialize)]
struct ProblemField {
    field: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = ApiClient::new("http://localhost:8000/", None).unwrap();
        assert_eq!(client.url("/v1/servers"), "http://localhost:8000/v1/servers");
    }

    #[test]
    fn test_problem_parsing() {
        let problem: Problem = serde_json::from_str(
            r#"{
                "type": "urn:server-manager:problem:invalid_request",
                "title": "Bad Request",
                "status": 400,
                "detail": "Invalid server",
                "code": "invalid_request",
                "request_id": "req_1",
                "details": [{"field": "cpu", "message": "must not be negative"}]
            }"#,
        )
        .unwrap();
        assert_eq!(problem.code, "invalid_request");
        assert_eq!(problem.details[0].field, "cpu");
    }
}
