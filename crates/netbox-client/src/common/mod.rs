//! Shared HTTP plumbing for the NetBox client
//!
//! Wraps `reqwest::Client` with token authentication, pagination and
//! status-code mapping so API methods only deal with paths and models.

use crate::error::NetBoxError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Paginated response wrapper from NetBox API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// HTTP client wrapper with authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path; absolute URLs (pagination links) pass through.
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
    }

    async fn check(path: &str, method: &str, response: Response) -> Result<Response, NetBoxError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(NetBoxError::NotFound(format!("{path} - {body}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(NetBoxError::Authentication(format!("{status} - {body}")))
            }
            _ => Err(NetBoxError::Api(format!("{method} {path} failed: {status} - {body}"))),
        }
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, NetBoxError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = Self::check(path, "GET", response).await?;

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            NetBoxError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Make a PATCH request
    pub async fn patch<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NetBoxError> {
        let url = self.build_url(path);
        debug!("PATCH {}", url);

        let response = self
            .authorized(self.client.patch(&url))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        let response = Self::check(path, "PATCH", response).await?;

        response.json().await.map_err(NetBoxError::Http)
    }

    /// Fetch all pages of a paginated response
    pub async fn fetch_all_pages<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, NetBoxError> {
        let mut all_results = Vec::new();
        let mut next = Some(path.to_string());

        while let Some(url) = next {
            let page: PaginatedResponse<T> = self.get(&url).await?;
            all_results.extend(page.results);
            next = page.next;
        }

        Ok(all_results)
    }

    /// Query a list endpoint with filters, optionally following all pages
    pub async fn query<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        filters: &[(&str, &str)],
        fetch_all: bool,
    ) -> Result<Vec<T>, NetBoxError> {
        let mut path = format!("/api/{endpoint}/");
        if !filters.is_empty() {
            path = format!("{}?{}", path, build_query_string(filters));
        }

        if fetch_all {
            self.fetch_all_pages(&path).await
        } else {
            let page: PaginatedResponse<T> = self.get(&path).await?;
            Ok(page.results)
        }
    }
}

/// Build query string from filters
pub fn build_query_string(filters: &[(&str, &str)]) -> String {
    filters
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
