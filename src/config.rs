use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};

const KEYRING_SERVICE_PREFIX: &str = "appdraft_api_key";

const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SANDBOX_API_URL: &str = "https://codesandbox.io/api/v1";

/// Connection settings for the hosted LLM service.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProviderConfig {
    pub name: String,
    pub api_url: String, // Base URL
    pub model: String,
    // Reference to the key, not the key itself - e.g. 'keyring' or 'env:OPENAI_API_KEY'
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_ref: Option<String>,
}

/// Connection settings for the sandbox/preview service.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SandboxConfig {
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_ref: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: ProviderConfig,
    pub sandbox: SandboxConfig,
}

impl AppConfig {
    /// Builds the configuration from environment variables, falling back to
    /// the default public endpoints.
    pub fn from_env() -> Self {
        let llm = ProviderConfig {
            name: "OpenAI Compatible".to_string(),
            api_url: std::env::var("APPDRAFT_LLM_API_URL")
                .unwrap_or_else(|_| DEFAULT_LLM_API_URL.to_string()),
            model: std::env::var("APPDRAFT_LLM_MODEL")
                .unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            api_key_ref: Some(
                std::env::var("APPDRAFT_LLM_KEY_REF")
                    .unwrap_or_else(|_| "env:OPENAI_API_KEY".to_string()),
            ),
        };

        let sandbox = SandboxConfig {
            api_url: std::env::var("APPDRAFT_SANDBOX_API_URL")
                .unwrap_or_else(|_| DEFAULT_SANDBOX_API_URL.to_string()),
            api_key_ref: Some(
                std::env::var("APPDRAFT_SANDBOX_KEY_REF")
                    .unwrap_or_else(|_| "env:CSB_API_KEY".to_string()),
            ),
        };

        AppConfig { llm, sandbox }
    }
}

/// Resolves an API key reference to the key itself. `env:<VAR>` reads the
/// named environment variable; `keyring` reads the OS keyring entry for the
/// given service label.
pub fn resolve_api_key(service: &str, api_key_ref: Option<&str>) -> Result<String> {
    match api_key_ref {
        Some(ref_str) if ref_str.starts_with("env:") => {
            let env_var_name = ref_str.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {env_var_name}");
            std::env::var(env_var_name).context(format!(
                "Failed to get API key from environment variable '{env_var_name}'"
            ))
        }
        Some(ref_str) if ref_str == "keyring" => {
            let service_name = format!("{KEYRING_SERVICE_PREFIX}-{service}");
            let entry =
                Entry::new(&service_name, service).context("Failed to create keyring entry")?;
            log::debug!("Retrieving API key from keyring for service: {service_name}");
            entry.get_password().context(format!(
                "Failed to get API key from keyring for '{service}'. Please set it first."
            ))
        }
        Some(other) => Err(anyhow::anyhow!("Unsupported api_key_ref format: {other}")),
        None => Err(anyhow::anyhow!("API key reference not set for '{service}'")),
    }
}

/// Stores an API key in the OS keyring under the given service label.
pub fn set_api_key_in_keyring(service: &str, api_key: &str) -> Result<()> {
    let service_name = format!("{KEYRING_SERVICE_PREFIX}-{service}");
    let entry = Entry::new(&service_name, service)
        .context("Failed to create keyring entry for setting password")?;
    log::info!("Setting API key in keyring for service: {service_name}");
    entry
        .set_password(api_key)
        .context(format!("Failed to set API key in keyring for '{service}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_references_resolve_from_the_environment() {
        std::env::set_var("APPDRAFT_TEST_KEY", "sk-test");
        let key = resolve_api_key("llm", Some("env:APPDRAFT_TEST_KEY")).unwrap();
        assert_eq!(key, "sk-test");
        std::env::remove_var("APPDRAFT_TEST_KEY");
    }

    #[test]
    fn missing_and_malformed_references_are_errors() {
        assert!(resolve_api_key("llm", None).is_err());
        assert!(resolve_api_key("llm", Some("vault:secret")).is_err());
        assert!(resolve_api_key("llm", Some("env:APPDRAFT_DEFINITELY_UNSET")).is_err());
    }
}
