//! Provider resolution.
//!
//! Model identifiers take the `provider:model` shape; the prefix selects a
//! built-in provider and, through it, the environment variable holding the
//! API credential.

use serde::Deserialize;
use std::error::Error as StdError;
use std::fmt;

#[derive(Debug, Clone, Deserialize)]
pub struct BuiltinProvider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub env_key: String,
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuiltinProvidersConfig {
    providers: Vec<BuiltinProvider>,
}

impl BuiltinProvider {
    pub fn auth_mode(&self) -> &str {
        self.mode.as_deref().unwrap_or("openai")
    }

    pub fn is_anthropic_mode(&self) -> bool {
        self.auth_mode() == "anthropic"
    }

    /// Env var naming an endpoint override, e.g. `OPENAI_BASE_URL`.
    pub fn base_url_env_key(&self) -> Option<String> {
        self.env_key
            .strip_suffix("_API_KEY")
            .map(|prefix| format!("{prefix}_BASE_URL"))
    }
}

/// Load built-in providers from the embedded table.
pub fn load_builtin_providers() -> Vec<BuiltinProvider> {
    const CONFIG_CONTENT: &str = include_str!("../providers.toml");

    let config: BuiltinProvidersConfig =
        toml::from_str(CONFIG_CONTENT).expect("Failed to parse providers.toml");

    config.providers
}

/// Find a built-in provider by ID (case-insensitive).
pub fn find_builtin_provider(id: &str) -> Option<BuiltinProvider> {
    load_builtin_providers()
        .into_iter()
        .find(|p| p.id.eq_ignore_ascii_case(id))
}

fn known_provider_ids() -> String {
    load_builtin_providers()
        .iter()
        .map(|p| p.id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Everything a request needs once the model identifier has been resolved.
#[derive(Clone, Debug)]
pub struct ProviderSession {
    pub api_key: String,
    pub base_url: String,
    pub provider_id: String,
    pub provider_display_name: String,
    /// The part after the `provider:` prefix, sent as the model name.
    pub model: String,
}

#[derive(Debug, PartialEq)]
pub enum ProviderError {
    MalformedIdentifier { model_identifier: String },
    UnknownProvider { provider: String },
    MissingCredential { provider: String, env_key: String },
}

impl ProviderError {
    /// Shell one-liners that would resolve the error, shown on startup
    /// failures.
    pub fn quick_fixes(&self) -> Vec<String> {
        match self {
            ProviderError::MalformedIdentifier { .. } => vec![
                "confab -m openai:o4-mini        # provider:model".to_string(),
                format!("# known providers: {}", known_provider_ids()),
            ],
            ProviderError::UnknownProvider { .. } => {
                vec![format!("# known providers: {}", known_provider_ids())]
            }
            ProviderError::MissingCredential { env_key, .. } => {
                vec![format!("export {env_key}=sk-...")]
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        2
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::MalformedIdentifier { model_identifier } => {
                write!(
                    f,
                    "Model identifier '{model_identifier}' is not of the form provider:model"
                )
            }
            ProviderError::UnknownProvider { provider } => {
                write!(f, "Unknown provider '{provider}'")
            }
            ProviderError::MissingCredential { provider, env_key } => {
                write!(
                    f,
                    "No API key for provider '{provider}': environment variable {env_key} is not set"
                )
            }
        }
    }
}

impl StdError for ProviderError {}

/// Resolves `provider:model` into a ready-to-use session, reading the
/// provider's credential from its environment variable.
pub fn resolve_session(model_identifier: &str) -> Result<ProviderSession, ProviderError> {
    let malformed = || ProviderError::MalformedIdentifier {
        model_identifier: model_identifier.to_string(),
    };

    let (provider, model) = model_identifier.split_once(':').ok_or_else(malformed)?;
    let provider = provider.trim();
    let model = model.trim();
    if provider.is_empty() || model.is_empty() {
        return Err(malformed());
    }

    let builtin = find_builtin_provider(provider).ok_or_else(|| ProviderError::UnknownProvider {
        provider: provider.to_string(),
    })?;

    let api_key =
        std::env::var(&builtin.env_key).map_err(|_| ProviderError::MissingCredential {
            provider: builtin.id.clone(),
            env_key: builtin.env_key.clone(),
        })?;

    let base_url = builtin
        .base_url_env_key()
        .and_then(|key| std::env::var(key).ok())
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| builtin.base_url.clone());

    Ok(ProviderSession {
        api_key,
        base_url,
        provider_id: builtin.id,
        provider_display_name: builtin.display_name,
        model: model.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::TestEnvVarGuard;

    #[test]
    fn builtin_table_has_the_expected_providers() {
        let ids: Vec<String> = load_builtin_providers()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert!(ids.contains(&"openai".to_string()));
        assert!(ids.contains(&"anthropic".to_string()));
        assert!(ids.contains(&"google".to_string()));
        assert!(ids.contains(&"openrouter".to_string()));
    }

    #[test]
    fn anthropic_is_the_only_anthropic_mode_provider() {
        for provider in load_builtin_providers() {
            assert_eq!(provider.id == "anthropic", provider.is_anthropic_mode());
        }
    }

    #[test]
    fn base_url_env_key_derives_from_credential_key() {
        let openai = find_builtin_provider("openai").expect("openai missing");
        assert_eq!(openai.base_url_env_key().as_deref(), Some("OPENAI_BASE_URL"));
        let google = find_builtin_provider("google").expect("google missing");
        assert_eq!(google.base_url_env_key().as_deref(), Some("GEMINI_BASE_URL"));
    }

    #[test]
    fn resolves_provider_and_model_from_identifier() {
        let mut env = TestEnvVarGuard::new();
        env.set_var("OPENAI_API_KEY", "sk-test");
        env.remove_var("OPENAI_BASE_URL");

        let session = resolve_session("openai:o4-mini").expect("resolve failed");
        assert_eq!(session.provider_id, "openai");
        assert_eq!(session.provider_display_name, "OpenAI");
        assert_eq!(session.model, "o4-mini");
        assert_eq!(session.api_key, "sk-test");
        assert_eq!(session.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn provider_prefix_is_case_insensitive() {
        let mut env = TestEnvVarGuard::new();
        env.set_var("ANTHROPIC_API_KEY", "sk-ant");

        let session = resolve_session("Anthropic:claude-sonnet-4-20250514").expect("resolve");
        assert_eq!(session.provider_id, "anthropic");
        assert_eq!(session.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn model_part_may_contain_colons() {
        let mut env = TestEnvVarGuard::new();
        env.set_var("OPENAI_API_KEY", "sk-test");

        let session = resolve_session("openai:ft:gpt-4o:org:1234").expect("resolve");
        assert_eq!(session.model, "ft:gpt-4o:org:1234");
    }

    #[test]
    fn identifier_without_prefix_is_malformed() {
        let err = resolve_session("o4-mini").expect_err("should fail");
        assert!(matches!(err, ProviderError::MalformedIdentifier { .. }));
        let err = resolve_session("openai:").expect_err("should fail");
        assert!(matches!(err, ProviderError::MalformedIdentifier { .. }));
        let err = resolve_session(":o4-mini").expect_err("should fail");
        assert!(matches!(err, ProviderError::MalformedIdentifier { .. }));
    }

    #[test]
    fn unknown_provider_is_reported_by_name() {
        let err = resolve_session("nocorp:model-1").expect_err("should fail");
        assert_eq!(
            err,
            ProviderError::UnknownProvider {
                provider: "nocorp".to_string()
            }
        );
        assert!(err.quick_fixes().iter().any(|fix| fix.contains("openai")));
    }

    #[test]
    fn missing_credential_names_the_env_var() {
        let mut env = TestEnvVarGuard::new();
        env.remove_var("OPENROUTER_API_KEY");

        let err = resolve_session("openrouter:gpt-4o").expect_err("should fail");
        assert_eq!(
            err,
            ProviderError::MissingCredential {
                provider: "openrouter".to_string(),
                env_key: "OPENROUTER_API_KEY".to_string()
            }
        );
        assert!(err
            .quick_fixes()
            .iter()
            .any(|fix| fix.contains("OPENROUTER_API_KEY")));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn base_url_override_wins_over_default() {
        let mut env = TestEnvVarGuard::new();
        env.set_var("OPENAI_API_KEY", "sk-test");
        env.set_var("OPENAI_BASE_URL", "http://localhost:8080/v1");

        let session = resolve_session("openai:local").expect("resolve failed");
        assert_eq!(session.base_url, "http://localhost:8080/v1");
    }
}
