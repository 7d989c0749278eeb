//! Decision provider implementations for Toolstream.
//!
//! All providers implement the `toolstream_core::Provider` trait.
//! [`build_from_config`] picks the one the configuration asks for.

pub mod openai_compat;
pub mod scripted;

pub use openai_compat::OpenAiCompatProvider;
pub use scripted::{ScriptedDecision, ScriptedProvider};

use std::sync::Arc;
use toolstream_config::AppConfig;
use toolstream_core::error::ProviderError;
use toolstream_core::provider::Provider;

/// Build the configured provider.
///
/// An API key is required; without one there is nothing to talk to.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "no API key; set TOOLSTREAM_API_KEY or OPENAI_API_KEY".into(),
        )
    })?;

    let provider = OpenAiCompatProvider::new(
        "openai",
        &config.base_url,
        api_key,
        &config.default_model,
    )
    .with_temperature(config.default_temperature);

    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_not_configured() {
        let config = AppConfig::default();
        let err = build_from_config(&config).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn key_builds_provider() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }
}
