//! URL helpers for building the completion endpoint from configuration.

/// Join a base URL and an endpoint path with exactly one slash between them.
///
/// ```
/// use relaychat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://project.example.co/", "/functions/v1/chat"),
///     "https://project.example.co/functions/v1/chat"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let endpoint = endpoint.trim_start_matches('/');
    if endpoint.is_empty() {
        return base.to_string();
    }
    format!("{base}/{endpoint}")
}
