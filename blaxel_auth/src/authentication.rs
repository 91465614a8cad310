//! A swappable handle to the active platform settings
//!
//! Requests hold an [`Authentication`] and read whichever [`Settings`] are
//! current when they run, so the configuration can be replaced without
//! rebuilding clients.

use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use reqwest::header::HeaderMap;

use crate::credentials::AuthError;
use crate::settings::{ConfigError, Settings, SettingsBuilder};
use crate::Workspace;

/// A shared handle to the active [`Settings`]
///
/// Clones observe the same settings, including any later
/// [`reconfigure()`][Self::reconfigure()].
#[derive(Clone, Debug)]
pub struct Authentication {
    settings: Arc<ArcSwap<Settings>>,
}

impl Authentication {
    /// Wraps settings in a shareable handle
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
        }
    }

    /// Configures authentication from the process environment and, where
    /// available, the local config file
    pub fn from_env() -> Result<Self, ConfigError> {
        SettingsBuilder::from_env().build().map(Self::new)
    }

    /// A snapshot of the active settings
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    /// Replaces the active settings for all subsequent requests
    ///
    /// Requests already authenticating finish with the settings they started
    /// with.
    pub fn reconfigure(&self, builder: SettingsBuilder) -> Result<(), ConfigError> {
        let settings = builder.build()?;
        tracing::info!(strategy = %settings.strategy(), "reconfigured platform authentication");
        self.settings.store(Arc::new(settings));
        Ok(())
    }

    /// Makes the active credentials current
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        let settings = self.settings();
        settings.authenticate().await
    }

    /// Like [`authenticate()`][Self::authenticate()], giving up after `limit`
    ///
    /// Giving up does not cancel a shared refresh; the next caller joins it.
    pub async fn authenticate_within(&self, limit: Duration) -> Result<(), AuthError> {
        tokio::time::timeout(limit, self.authenticate())
            .await
            .map_err(|_| AuthError::Timeout(limit))?
    }

    /// The headers every platform request must carry
    pub fn headers(&self) -> HeaderMap {
        self.settings.load().headers()
    }

    /// The workspace requests act on
    pub fn workspace(&self) -> Option<Workspace> {
        self.settings.load().workspace().map(ToOwned::to_owned)
    }
}

impl From<Settings> for Authentication {
    fn from(settings: Settings) -> Self {
        Self::new(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{vars, ConfigSource};
    use crate::credentials::Strategy;
    use crate::resolver::{CredentialKind, CredentialsType};
    use crate::settings::{test_support::FixedEndpoint, AUTHORIZATION};
    use crate::EncodedClientCredentials;

    fn env(pairs: &[(&str, &str)]) -> ConfigSource {
        ConfigSource::EnvironmentOnly(pairs.iter().copied().collect())
    }

    fn api_key_auth() -> Authentication {
        Settings::builder(env(&[(vars::API_KEY, "sk_test"), (vars::WORKSPACE, "ws1")]))
            .build()
            .unwrap()
            .into()
    }

    #[tokio::test]
    async fn headers_follow_the_active_settings() {
        let auth = api_key_auth();

        auth.authenticate().await.unwrap();

        assert_eq!(
            auth.headers().get(&AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer sk_test"
        );
        assert_eq!(auth.workspace().unwrap().as_str(), "ws1");
    }

    #[test]
    fn reconfigure_is_seen_by_every_clone() {
        let auth = api_key_auth();
        let clone = auth.clone();

        auth.reconfigure(Settings::builder(env(&[(vars::WORKSPACE, "ws2")])))
            .unwrap();

        assert_eq!(clone.settings().strategy(), Strategy::Anonymous);
        assert!(clone.headers().get(&AUTHORIZATION).is_none());
        assert_eq!(clone.workspace().unwrap().as_str(), "ws2");
    }

    #[test]
    fn failed_reconfigure_keeps_the_previous_settings() {
        let auth = api_key_auth();

        auth.reconfigure(Settings::builder(env(&[(vars::API_URL, "::")])))
            .unwrap_err();

        assert_eq!(auth.settings().strategy(), Strategy::ApiKey);
    }

    #[tokio::test]
    async fn slow_authentication_times_out_and_can_be_rejoined() {
        let endpoint = Arc::new(FixedEndpoint::slow("tok1", Duration::from_millis(200)));
        let auth = Authentication::new(
            SettingsBuilder::default()
                .credentials(CredentialsType {
                    workspace: None,
                    kind: CredentialKind::ClientCredentials(
                        EncodedClientCredentials::from_static("abc"),
                    ),
                })
                .token_endpoint(endpoint.clone())
                .build()
                .unwrap(),
        );

        let error = auth
            .authenticate_within(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(error, AuthError::Timeout(_)));

        auth.authenticate().await.unwrap();

        assert_eq!(endpoint.calls(), 1);
        assert_eq!(
            auth.headers().get(&AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer tok1"
        );
    }
}
