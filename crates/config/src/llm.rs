//! LLM provider and ingress protocol configuration.

use std::{collections::BTreeMap, time::Duration};

use duration_str::deserialize_duration;
use secrecy::SecretString;
use serde::Deserialize;

/// LLM configuration settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Ingress protocol surfaces.
    pub protocols: LlmProtocolsConfig,
    /// Configured upstream providers, keyed by name.
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl LlmConfig {
    /// Whether at least one provider is configured.
    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    /// The first configured provider of the given type, if any.
    pub fn provider_of_type(&self, provider_type: ProviderType) -> Option<(&str, &ProviderConfig)> {
        self.providers
            .iter()
            .find(|(_, config)| config.provider_type == provider_type)
            .map(|(name, config)| (name.as_str(), config))
    }
}

/// Ingress protocol surfaces exposed by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmProtocolsConfig {
    /// Whether the OpenAI-compatible surface is enabled.
    pub openai_enabled: bool,
    /// Whether the Anthropic-compatible surface is enabled.
    pub anthropic_enabled: bool,
}

impl Default for LlmProtocolsConfig {
    fn default() -> Self {
        Self {
            openai_enabled: true,
            anthropic_enabled: true,
        }
    }
}

/// The vendor dialect a provider speaks.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI chat completions and embeddings.
    OpenAI,
    /// Anthropic messages.
    Anthropic,
}

/// Configuration for a single upstream provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// The dialect this provider speaks.
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// API key sent to the provider.
    pub api_key: Option<SecretString>,
    /// Override for the provider base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// OpenAI organization header, when the provider requires one.
    #[serde(default)]
    pub organization: Option<String>,
    /// Anthropic API version header. Defaults to `2023-06-01`.
    #[serde(default)]
    pub api_version: Option<String>,
    /// Client-level deadline for calls to this provider, streaming reads
    /// included.
    #[serde(default = "default_provider_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Models advertised on the model listing endpoint.
    #[serde(default)]
    pub models: Vec<String>,
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn parses_provider_table() {
        let config: LlmConfig = toml::from_str(indoc! {r#"
            [providers.openai]
            type = "openai"
            api_key = "sk-test"
            models = ["gpt-4o", "gpt-4o-mini"]

            [providers.anthropic]
            type = "anthropic"
            api_key = "sk-ant-test"
            base_url = "http://localhost:4010/v1"
        "#})
        .unwrap();

        assert!(config.has_providers());

        let (name, provider) = config.provider_of_type(ProviderType::Anthropic).unwrap();
        assert_eq!(name, "anthropic");
        assert_eq!(provider.base_url.as_deref(), Some("http://localhost:4010/v1"));
        assert_eq!(provider.timeout, Duration::from_secs(60));

        let (_, openai) = config.provider_of_type(ProviderType::OpenAI).unwrap();
        assert_eq!(openai.models, vec!["gpt-4o", "gpt-4o-mini"]);
    }

    #[test]
    fn provider_timeout_is_configurable() {
        let config: LlmConfig = toml::from_str(indoc! {r#"
            [providers.openai]
            type = "openai"
            api_key = "sk-test"
            timeout = "2m"
        "#})
        .unwrap();

        let (_, provider) = config.provider_of_type(ProviderType::OpenAI).unwrap();
        assert_eq!(provider.timeout, Duration::from_secs(120));
    }
}
