use std::path::Path;

use anyhow::Context;

use crate::Config;

/// Load and parse the gateway configuration from a TOML file.
pub(crate) fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| format!("failed to parse configuration file {}", path.display()))?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> anyhow::Result<()> {
    for key in &config.auth.keys {
        use secrecy::ExposeSecret;

        let token = key.token.expose_secret();

        if !token.starts_with("tok_") {
            anyhow::bail!("API key for user '{}' must start with 'tok_'", key.user_id);
        }

        if token.len() < 12 {
            anyhow::bail!("API key for user '{}' is shorter than the 12-character prefix", key.user_id);
        }
    }

    if config.firewall.store == crate::TokenStoreBackend::Redis && config.firewall.store_url.is_none() {
        anyhow::bail!("firewall.store = \"redis\" requires firewall.store_url");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use std::io::Write;

    use crate::Config;

    fn load_config(content: &str) -> anyhow::Result<Config> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();

        super::load(file.path())
    }

    #[test]
    fn loads_a_full_config() {
        let config = load_config(indoc! {r#"
            [server]
            listen_address = "127.0.0.1:8080"

            [[auth.keys]]
            token = "tok_abcdefgh12345678"
            user_id = "user-1"

            [llm.providers.anthropic]
            type = "anthropic"
            api_key = "sk-ant-test"

            [firewall]
            mode = "redact"
        "#})
        .unwrap();

        assert_eq!(config.auth.keys.len(), 1);
        assert!(config.llm.has_providers());
    }

    #[test]
    fn rejects_keys_without_the_token_prefix() {
        let error = load_config(indoc! {r#"
            [[auth.keys]]
            token = "sk-not-a-gateway-token"
            user_id = "user-1"
        "#})
        .unwrap_err();

        assert!(error.to_string().contains("must start with 'tok_'"));
    }

    #[test]
    fn rejects_redis_store_without_url() {
        let error = load_config(indoc! {r#"
            [firewall]
            store = "redis"
        "#})
        .unwrap_err();

        assert!(error.to_string().contains("store_url"));
    }
}
