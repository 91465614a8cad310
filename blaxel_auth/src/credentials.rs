//! Credential strategies
//!
//! Every strategy can produce the value of the platform authorization header,
//! names the workspace requests act on, and knows how to make its token
//! current via [`Credentials::authenticate()`].

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use thiserror::Error;

use crate::endpoint::TokenRequestError;
use crate::{ApiKey, Workspace, WorkspaceRef};

pub mod oauth2;

pub use self::oauth2::{
    ClientCredentials, ClientCredentialsGrant, DeviceGrant, DeviceMode, GrantSource,
    OAuthCredentials,
};

/// Which kind of strategy is in effect
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// A static API key
    ApiKey,
    /// OAuth2 client credentials
    ClientCredentials,
    /// Refresh tokens from a device login
    DeviceMode,
    /// No credentials at all
    Anonymous,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ApiKey => "api_key",
            Self::ClientCredentials => "client_credentials",
            Self::DeviceMode => "device_mode",
            Self::Anonymous => "anonymous",
        })
    }
}

/// An error while authenticating
#[derive(Clone, Debug, Error)]
pub enum AuthError {
    /// Obtaining a new access token failed
    #[error("unable to obtain an access token")]
    TokenExchange(#[from] Arc<TokenRequestError>),
    /// Authentication did not complete within the allotted time
    #[error("authentication did not complete within {0:?}")]
    Timeout(Duration),
}

impl AuthError {
    /// The OAuth error code reported by the authority, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::TokenExchange(error) => error.code(),
            Self::Timeout(_) => None,
        }
    }
}

/// A source of platform credentials
#[async_trait]
pub trait Credentials: Send + Sync + fmt::Debug {
    /// Ensures the authorization value is current, refreshing it if required
    async fn authenticate(&self) -> Result<(), AuthError>;

    /// The value for the authorization header, if any
    fn authorization(&self) -> Option<HeaderValue>;

    /// The workspace requests are made against
    fn workspace(&self) -> Option<&WorkspaceRef>;

    /// The kind of strategy
    fn strategy(&self) -> Strategy;
}

pub(crate) fn bearer(token: &str) -> Option<HeaderValue> {
    match HeaderValue::try_from(format!("Bearer {}", token)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("credential contains bytes not allowed in a header, omitting it");
            None
        }
    }
}

/// Authenticates with a static API key
#[derive(Debug)]
pub struct ApiKeyCredentials {
    api_key: ApiKey,
    workspace: Option<Workspace>,
}

impl ApiKeyCredentials {
    /// Constructs API key credentials
    pub fn new(api_key: ApiKey, workspace: Option<Workspace>) -> Self {
        Self { api_key, workspace }
    }
}

#[async_trait]
impl Credentials for ApiKeyCredentials {
    async fn authenticate(&self) -> Result<(), AuthError> {
        Ok(())
    }

    fn authorization(&self) -> Option<HeaderValue> {
        bearer(self.api_key.as_str())
    }

    fn workspace(&self) -> Option<&WorkspaceRef> {
        self.workspace.as_deref()
    }

    fn strategy(&self) -> Strategy {
        Strategy::ApiKey
    }
}

/// No credentials; requests carry only the workspace
#[derive(Debug, Default)]
pub struct Anonymous {
    workspace: Option<Workspace>,
}

impl Anonymous {
    /// Constructs anonymous credentials scoped to `workspace`
    pub fn new(workspace: Option<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Credentials for Anonymous {
    async fn authenticate(&self) -> Result<(), AuthError> {
        Ok(())
    }

    fn authorization(&self) -> Option<HeaderValue> {
        None
    }

    fn workspace(&self) -> Option<&WorkspaceRef> {
        self.workspace.as_deref()
    }

    fn strategy(&self) -> Strategy {
        Strategy::Anonymous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_key_is_presented_as_a_bearer_token() {
        let credentials = ApiKeyCredentials::new(
            ApiKey::from_static("sk_test"),
            Some(Workspace::from_static("ws1")),
        );

        credentials.authenticate().await.unwrap();

        let authorization = credentials.authorization().unwrap();
        assert_eq!(authorization.to_str().unwrap(), "Bearer sk_test");
        assert!(authorization.is_sensitive());
        assert_eq!(credentials.workspace().map(|w| w.as_str()), Some("ws1"));
        assert_eq!(credentials.strategy(), Strategy::ApiKey);
    }

    #[tokio::test]
    async fn anonymous_has_no_authorization() {
        let credentials = Anonymous::new(Some(Workspace::from_static("ws1")));

        credentials.authenticate().await.unwrap();

        assert!(credentials.authorization().is_none());
        assert_eq!(credentials.workspace().map(|w| w.as_str()), Some("ws1"));
    }

    #[test]
    fn api_key_with_line_break_is_omitted() {
        let credentials = ApiKeyCredentials::new(ApiKey::from_static("sk\ntest"), None);
        assert!(credentials.authorization().is_none());
    }
}
