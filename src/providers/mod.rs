use anyhow::{anyhow, Result};

mod openai;
mod rate_limit;

pub use openai::OpenAiClient;

use crate::settings::ProviderSettings;

pub fn resolve_key(settings: &ProviderSettings, override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key.filter(|key| !key.trim().is_empty()) {
        return Ok(key.to_string());
    }
    get_env(&settings.api_key_env)
        .ok_or_else(|| anyhow!("API key not found (checked {})", settings.api_key_env))
}

pub fn build_client(
    settings: &ProviderSettings,
    override_key: Option<&str>,
) -> Result<OpenAiClient> {
    let key = resolve_key(settings, override_key)?;
    let mut client = OpenAiClient::new(key);
    if let Some(model) = settings.model.as_deref() {
        client = client.with_model(model);
    }
    if let Some(base_url) = settings.base_url.as_deref() {
        client = client.with_base_url(base_url);
    }
    Ok(client)
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
