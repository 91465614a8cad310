//! Platform settings assembled from a configuration source
//!
//! A [`SettingsBuilder`] selects the credential strategy, the platform
//! environment and its URLs. The resulting [`Settings`] answers with the
//! headers every platform request must carry.

use std::{fmt, sync::Arc};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::config::{vars, ConfigSource};
use crate::credentials::{
    Anonymous, ApiKeyCredentials, AuthError, ClientCredentialsGrant, Credentials, DeviceGrant,
    OAuthCredentials, Strategy,
};
use crate::endpoint::{HttpTokenEndpoint, TokenEndpoint};
use crate::resolver::{CredentialKind, CredentialsType, Resolved, Resolver};
use crate::{RefreshPolicy, WorkspaceRef};

/// Header carrying the platform authorization
pub const AUTHORIZATION: HeaderName = HeaderName::from_static("x-blaxel-authorization");

/// Header naming the workspace a request acts on
pub const WORKSPACE: HeaderName = HeaderName::from_static("x-blaxel-workspace");

/// A platform deployment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Environment {
    /// Production
    #[default]
    Prod,
    /// Development
    Dev,
}

impl Environment {
    /// Looks up an environment by name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "prod" => Some(Self::Prod),
            "dev" => Some(Self::Dev),
            _ => None,
        }
    }

    /// The environment's name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Dev => "dev",
        }
    }

    /// The default platform API base URL
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Prod => "https://api.blaxel.ai/v0",
            Self::Dev => "https://api.blaxel.dev/v0",
        }
    }

    /// The default URL for invoking deployed workloads
    pub fn run_url(&self) -> &'static str {
        match self {
            Self::Prod => "https://run.blaxel.ai",
            Self::Dev => "https://run.blaxel.dev",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error while assembling settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A URL override could not be parsed
    #[error("{var} is not a valid URL")]
    InvalidUrl {
        /// The variable holding the URL
        var: &'static str,
        /// The parse failure
        #[source]
        source: url::ParseError,
    },
    /// The HTTP client for token requests could not be constructed
    #[error("unable to construct HTTP client")]
    HttpClient(#[source] reqwest::Error),
    /// The refresh threshold is not a share of a token's lifetime
    #[error("refresh threshold must be greater than 0 and at most 1, got {0}")]
    InvalidRefreshThreshold(f64),
}

/// Builds [`Settings`]
///
/// Unless overridden, credentials come from the configuration source.
pub struct SettingsBuilder {
    source: ConfigSource,
    credentials: Option<CredentialsType>,
    token_endpoint: Option<Arc<dyn TokenEndpoint>>,
    http_client: Option<reqwest::Client>,
    refresh_threshold: f64,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new(ConfigSource::None)
    }
}

impl fmt::Debug for SettingsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsBuilder")
            .field("source", &self.source)
            .field("credentials", &self.credentials)
            .field("token_endpoint", &self.token_endpoint)
            .field("refresh_threshold", &self.refresh_threshold)
            .finish_non_exhaustive()
    }
}

impl SettingsBuilder {
    /// Constructs a builder reading from `source`
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            credentials: None,
            token_endpoint: None,
            http_client: None,
            refresh_threshold: RefreshPolicy::default().threshold(),
        }
    }

    /// Constructs a builder reading from the process environment and, where
    /// available, the local config file
    pub fn from_env() -> Self {
        Self::new(ConfigSource::detect())
    }

    /// Uses these credentials instead of resolving them
    pub fn credentials(mut self, credentials: CredentialsType) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sends token requests to this endpoint instead of the platform's
    pub fn token_endpoint(mut self, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        self.token_endpoint = Some(endpoint);
        self
    }

    /// Uses this client for token requests
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Refreshes tokens once the remaining share of their lifetime drops
    /// below `threshold`
    ///
    /// Defaults to `0.5`. Values outside `(0, 1]` are rejected by
    /// [`build()`](Self::build).
    pub fn refresh_threshold(mut self, threshold: f64) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Selects the credential strategy and computes the platform URLs
    pub fn build(self) -> Result<Settings, ConfigError> {
        if !(self.refresh_threshold > 0.0 && self.refresh_threshold <= 1.0) {
            return Err(ConfigError::InvalidRefreshThreshold(self.refresh_threshold));
        }

        let resolver = Resolver::new(&self.source);

        let resolved = match self.credentials {
            Some(credentials) => Some(Resolved {
                credentials,
                default_env: None,
            }),
            None => resolver.resolve(),
        };

        let env_name = self
            .source
            .var(vars::ENV)
            .map(str::to_owned)
            .or_else(|| resolved.as_ref().and_then(|r| r.default_env.clone()));
        let env = match env_name.as_deref() {
            None => Environment::default(),
            Some(name) => Environment::from_name(name).unwrap_or_else(|| {
                tracing::warn!(env = name, "unknown platform environment, using prod");
                Environment::Prod
            }),
        };

        let base_url = url_override(&self.source, vars::API_URL, env.base_url())?;
        let run_url = url_override(&self.source, vars::RUN_URL, env.run_url())?;
        let token_url = Url::parse(&format!(
            "{}/oauth/token",
            base_url.as_str().trim_end_matches('/')
        ))
        .map_err(|source| ConfigError::InvalidUrl {
            var: vars::API_URL,
            source,
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .user_agent(concat!("blaxel_auth/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(ConfigError::HttpClient)?,
        };

        let endpoint = self.token_endpoint.unwrap_or_else(|| {
            Arc::new(HttpTokenEndpoint::new(
                http_client.clone(),
                token_url.clone(),
            ))
        });
        let policy = RefreshPolicy::new(self.refresh_threshold);

        let credentials: Arc<dyn Credentials> = match resolved {
            None => Arc::new(Anonymous::new(resolver.workspace())),
            Some(Resolved {
                credentials: CredentialsType { workspace, kind },
                ..
            }) => match kind {
                CredentialKind::ApiKey(api_key) => {
                    Arc::new(ApiKeyCredentials::new(api_key, workspace))
                }
                CredentialKind::ClientCredentials(credentials) => {
                    Arc::new(OAuthCredentials::from_grant(
                        ClientCredentialsGrant::new(credentials),
                        workspace,
                        endpoint,
                        policy,
                    ))
                }
                CredentialKind::Device {
                    device_code,
                    refresh_token,
                    access_token,
                } => Arc::new(
                    OAuthCredentials::from_grant(
                        DeviceGrant::new(device_code, refresh_token),
                        workspace,
                        endpoint,
                        policy,
                    )
                    .with_access_token(access_token),
                ),
            },
        };

        tracing::info!(
            strategy = %credentials.strategy(),
            workspace = ?credentials.workspace(),
            env = %env,
            base_url = %base_url,
            "configured platform authentication"
        );
        tracing::debug!(?credentials, "selected credentials");

        Ok(Settings {
            env,
            base_url,
            run_url,
            token_url,
            credentials,
            http_client,
        })
    }
}

fn url_override(source: &ConfigSource, var: &'static str, default: &str) -> Result<Url, ConfigError> {
    Url::parse(source.var(var).unwrap_or(default))
        .map_err(|source| ConfigError::InvalidUrl { var, source })
}

/// The active platform configuration
#[derive(Clone, Debug)]
pub struct Settings {
    env: Environment,
    base_url: Url,
    run_url: Url,
    token_url: Url,
    credentials: Arc<dyn Credentials>,
    http_client: reqwest::Client,
}

impl Settings {
    /// Starts building settings from `source`
    pub fn builder(source: ConfigSource) -> SettingsBuilder {
        SettingsBuilder::new(source)
    }

    /// Makes the credentials current, refreshing the access token if required
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        self.credentials.authenticate().await
    }

    /// The headers every platform request must carry
    ///
    /// Computed from the credentials' current token on each call.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(authorization) = self.credentials.authorization() {
            headers.insert(AUTHORIZATION, authorization);
        }

        if let Some(workspace) = self.credentials.workspace() {
            match HeaderValue::from_str(workspace.as_str()) {
                Ok(value) => {
                    headers.insert(WORKSPACE, value);
                }
                Err(_) => tracing::warn!(
                    workspace = %workspace,
                    "workspace name not valid in a header, omitting it"
                ),
            }
        }

        headers
    }

    /// The workspace requests act on
    pub fn workspace(&self) -> Option<&WorkspaceRef> {
        self.credentials.workspace()
    }

    /// The platform environment
    pub fn env(&self) -> Environment {
        self.env
    }

    /// The platform API base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The URL for invoking deployed workloads
    pub fn run_url(&self) -> &Url {
        &self.run_url
    }

    /// The OAuth token endpoint URL
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// The credential strategy in effect
    pub fn credentials(&self) -> &Arc<dyn Credentials> {
        &self.credentials
    }

    /// The kind of credential strategy in effect
    pub fn strategy(&self) -> Strategy {
        self.credentials.strategy()
    }

    /// The HTTP client used for token requests
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }
}
