//! SDK configuration.

use error_stack::ResultExt;
use serde::Deserialize;
use switch_env::Env;

use crate::{
    consts,
    errors::{CustomResult, SwitchError},
    recipe::Recipe,
};

/// Everything the handshake needs to know about the embedding application
/// and its gateway. Deserialized by the host; no file or environment lookup
/// happens inside the SDK.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub environment: Env,
    /// Gateway origin, e.g. `https://api.gateway.example`.
    pub gateway_base_url: String,
    pub client_id: String,
    /// Human-readable application name, forwarded in encrypted payloads.
    pub app_name: String,
    /// Deep link the external actor returns to on approval.
    pub success_url: String,
    /// Deep link the external actor returns to on cancellation.
    pub cancel_url: String,
    /// Total attempts allowed per request, including the first.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u8,
    /// Verify pinned wallet signatures before selecting a wallet target.
    #[serde(default = "default_security_check")]
    pub security_check_enabled: bool,
}

fn default_retry_limit() -> u8 {
    consts::DEFAULT_RETRY_LIMIT
}

fn default_security_check() -> bool {
    true
}

impl Settings {
    pub fn validate(&self) -> CustomResult<(), SwitchError> {
        url::Url::parse(&self.gateway_base_url)
            .change_context(SwitchError::UrlParsingFailed)
            .attach_printable("Gateway base URL is not a valid URL")?;
        url::Url::parse(&self.success_url)
            .change_context(SwitchError::UrlParsingFailed)
            .attach_printable("Success URL is not a valid URL")?;
        url::Url::parse(&self.cancel_url)
            .change_context(SwitchError::UrlParsingFailed)
            .attach_printable("Cancel URL is not a valid URL")?;
        Ok(())
    }
}

/// Remotely-refreshed recipe set, fetched and decoded by the loader.
#[derive(Clone, Debug, Deserialize)]
pub struct RecipeConfig {
    pub recipes: Vec<Recipe>,
    /// Target public key (PEM) for the encrypted payload variant.
    #[serde(default)]
    pub target_public_key_pem: Option<String>,
}

/// Source of the current [`RecipeConfig`]. How it is fetched and cached is
/// the implementor's concern.
#[async_trait::async_trait]
pub trait ConfigurationLoader: Send + Sync {
    async fn load(&self) -> CustomResult<RecipeConfig, SwitchError>;
}

/// Loader over a fixed, already-decoded config. Covers embedded defaults
/// and tests.
#[derive(Clone, Debug)]
pub struct StaticConfigurationLoader {
    config: RecipeConfig,
}

impl StaticConfigurationLoader {
    pub fn new(config: RecipeConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl ConfigurationLoader for StaticConfigurationLoader {
    async fn load(&self) -> CustomResult<RecipeConfig, SwitchError> {
        Ok(self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "environment": "sandbox",
            "gateway_base_url": "https://api.gateway.test",
            "client_id": "client-1",
            "app_name": "Demo Shop",
            "success_url": "myapp://switch/success",
            "cancel_url": "myapp://switch/cancel",
        }))
        .unwrap();

        assert_eq!(settings.retry_limit, consts::DEFAULT_RETRY_LIMIT);
        assert!(settings.security_check_enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn validate_rejects_a_relative_success_url() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "environment": "sandbox",
            "gateway_base_url": "https://api.gateway.test",
            "client_id": "client-1",
            "app_name": "Demo Shop",
            "success_url": "/success",
            "cancel_url": "myapp://switch/cancel",
        }))
        .unwrap();

        assert_eq!(
            settings.validate().unwrap_err().current_context(),
            &SwitchError::UrlParsingFailed
        );
    }

    #[tokio::test]
    async fn recipe_config_decodes_from_remote_json() {
        let raw = serde_json::json!({
            "recipes": [
                {
                    "kind": "wallet",
                    "protocol_version": 2,
                    "priority": 0,
                    "wallet_package": "com.example.wallet",
                    "pinned_signature": "digest"
                },
                { "kind": "browser", "protocol_version": 1, "priority": 1 }
            ]
        });
        let config: RecipeConfig = serde_json::from_value(raw).unwrap();
        let loader = StaticConfigurationLoader::new(config);

        let loaded = loader.load().await.unwrap();
        assert_eq!(loaded.recipes.len(), 2);
        assert_eq!(loaded.recipes[0].wallet_package.as_deref(), Some("com.example.wallet"));
    }
}
