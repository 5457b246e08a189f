//! Authentication utilities for API requests

/// Add the bearer credential used by the completion endpoint.
pub fn add_auth_headers(request: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    request.header("Authorization", format!("Bearer {api_key}"))
}
