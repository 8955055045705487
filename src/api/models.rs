use crate::api::{ModelInfo, ModelsResponse};
use crate::utils::auth::add_auth_headers;
use crate::utils::url::construct_api_url;

/// Fetches the provider's model listing. Used by `/model` with no argument.
pub async fn fetch_models(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    provider_id: &str,
) -> Result<Vec<ModelInfo>, String> {
    let models_url = construct_api_url(base_url, "models");
    let request = add_auth_headers(
        client.get(models_url).header("Content-Type", "application/json"),
        provider_id,
        api_key,
    );

    let response = request
        .send()
        .await
        .map_err(|e| format!("Failed to fetch models: {e}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(format!("Model listing failed with status {status}: {body}"));
    }

    let listing = response
        .json::<ModelsResponse>()
        .await
        .map_err(|e| format!("Failed to parse model listing: {e}"))?;

    let mut models = listing.data;
    sort_models(&mut models);
    Ok(models)
}

/// Newest first: `created` (OpenAI-style) wins over `created_at`
/// (Anthropic-style); models without either sort by reversed ID.
pub fn sort_models(models: &mut [ModelInfo]) {
    models.sort_by(|a, b| match (&a.created, &b.created, &a.created_at, &b.created_at) {
        (Some(a_created), Some(b_created), _, _) => b_created.cmp(a_created),
        (Some(_), None, _, _) => std::cmp::Ordering::Less,
        (None, Some(_), _, _) => std::cmp::Ordering::Greater,
        (None, None, Some(a_at), Some(b_at)) => b_at.cmp(a_at),
        (None, None, Some(_), None) => std::cmp::Ordering::Less,
        (None, None, None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None, None, None) => b.id.cmp(&a.id),
    });
}
