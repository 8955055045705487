//! Provider-specific authentication headers.

use crate::core::providers::find_builtin_provider;

/// Anthropic wants `x-api-key` plus a pinned `anthropic-version`; every other
/// provider takes a bearer token.
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    provider_id: &str,
    api_key: &str,
) -> reqwest::RequestBuilder {
    if let Some(provider) = find_builtin_provider(provider_id) {
        if provider.is_anthropic_mode() {
            return request
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01");
        }
    }
    request.header("Authorization", format!("Bearer {api_key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(provider_id: &str) -> reqwest::Request {
        let client = reqwest::Client::new();
        add_auth_headers(client.get("https://example.com"), provider_id, "test-key")
            .build()
            .expect("request build failed")
    }

    #[test]
    fn anthropic_uses_x_api_key() {
        let request = build("anthropic");
        assert_eq!(request.headers()["x-api-key"], "test-key");
        assert_eq!(request.headers()["anthropic-version"], "2023-06-01");
        assert!(!request.headers().contains_key("Authorization"));
    }

    #[test]
    fn openai_uses_bearer_token() {
        let request = build("openai");
        assert_eq!(request.headers()["Authorization"], "Bearer test-key");
    }

    #[test]
    fn unknown_providers_fall_back_to_bearer() {
        let request = build("someone-elses-gateway");
        assert_eq!(request.headers()["Authorization"], "Bearer test-key");
    }
}
