//! Strategies that obtain access tokens from the platform's OAuth authority
//!
//! [`ClientCredentials`] and [`DeviceMode`] share one state machine and differ
//! only in the [`GrantSource`] that shapes the token request. A strategy starts
//! with no token (or a token restored from a device login), refreshes once the
//! token is past its [`RefreshPolicy`] threshold, and never runs more than one
//! exchange at a time.

use std::{fmt, future::Future, sync::Arc};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use reqwest::header::HeaderValue;

use super::{bearer, AuthError, Credentials, Strategy};
use crate::clock::{Clock, System};
use crate::endpoint::{
    dto::{Grant, TokenRequest},
    TokenEndpoint, TokenRequestError,
};
use crate::single_flight::SingleFlight;
use crate::{
    AccessToken, DeviceCode, EncodedClientCredentials, RefreshPolicy, RefreshToken, Workspace,
    WorkspaceRef,
};

/// Shapes the token request for a particular OAuth flow
pub trait GrantSource: Send + Sync + fmt::Debug + 'static {
    /// The strategy this grant implements
    fn strategy(&self) -> Strategy;

    /// Builds the next token request
    fn token_request(&self) -> TokenRequest;

    /// Receives a rotated refresh token from the authority
    fn on_refresh_token(&self, _refresh_token: RefreshToken) {}
}

/// The client credentials flow
#[derive(Debug)]
pub struct ClientCredentialsGrant {
    credentials: EncodedClientCredentials,
}

impl ClientCredentialsGrant {
    /// Constructs a grant from packed client credentials
    pub fn new(credentials: EncodedClientCredentials) -> Self {
        Self { credentials }
    }
}

impl GrantSource for ClientCredentialsGrant {
    fn strategy(&self) -> Strategy {
        Strategy::ClientCredentials
    }

    fn token_request(&self) -> TokenRequest {
        TokenRequest {
            grant: Grant::ClientCredentials,
            basic_authorization: Some(self.credentials.clone()),
        }
    }
}

/// The refresh token flow following a device login
#[derive(Debug)]
pub struct DeviceGrant {
    device_code: DeviceCode,
    refresh_token: ArcSwapOption<RefreshToken>,
}

impl DeviceGrant {
    /// Constructs a grant from the results of a device login
    pub fn new(device_code: DeviceCode, refresh_token: Option<RefreshToken>) -> Self {
        Self {
            device_code,
            refresh_token: ArcSwapOption::new(refresh_token.map(Arc::new)),
        }
    }

    /// The refresh token that the next exchange will redeem
    pub fn refresh_token(&self) -> Option<RefreshToken> {
        self.refresh_token
            .load_full()
            .map(|t| RefreshToken::clone(&t))
    }
}

impl GrantSource for DeviceGrant {
    fn strategy(&self) -> Strategy {
        Strategy::DeviceMode
    }

    fn token_request(&self) -> TokenRequest {
        TokenRequest {
            grant: Grant::RefreshToken {
                device_code: self.device_code.clone(),
                refresh_token: self.refresh_token(),
            },
            basic_authorization: None,
        }
    }

    fn on_refresh_token(&self, refresh_token: RefreshToken) {
        tracing::info!("received new refresh token");
        self.refresh_token.store(Some(Arc::new(refresh_token)));
    }
}

struct Inner<G, C> {
    grant: G,
    endpoint: Arc<dyn TokenEndpoint>,
    policy: RefreshPolicy<C>,
    access_token: ArcSwapOption<AccessToken>,
}

impl<G: GrantSource, C: Clock> Inner<G, C> {
    fn access_token(&self) -> Option<AccessToken> {
        self.access_token
            .load_full()
            .map(|t| AccessToken::clone(&t))
    }

    fn token_needs_refresh(&self) -> bool {
        match &*self.access_token.load() {
            Some(token) => self.policy.needs_refresh(token),
            None => true,
        }
    }

    async fn exchange(&self, request: TokenRequest) -> Result<(), Arc<TokenRequestError>> {
        tracing::debug!(strategy = %self.grant.strategy(), "requesting new access token");

        let response = match self.endpoint.oauth_token(request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    strategy = %self.grant.strategy(),
                    error = (&error as &dyn std::error::Error),
                    "token exchange failed, keeping previous access token"
                );
                return Err(Arc::new(error));
            }
        };

        if let Some(refresh_token) = response.refresh_token {
            self.grant.on_refresh_token(refresh_token);
        }

        let token = response.access_token.filter(|t| !t.as_str().is_empty());
        if token.is_none() {
            tracing::warn!("authority returned no access token, clearing cached token");
        }

        self.access_token.store(token.map(Arc::new));

        Ok(())
    }
}

/// Credentials backed by an OAuth token exchange
pub struct OAuthCredentials<G, C = System> {
    workspace: Option<Workspace>,
    inner: Arc<Inner<G, C>>,
    flight: SingleFlight<(), Arc<TokenRequestError>>,
}

/// Credentials using the client credentials flow
pub type ClientCredentials<C = System> = OAuthCredentials<ClientCredentialsGrant, C>;

/// Credentials using refresh tokens obtained by a device login
pub type DeviceMode<C = System> = OAuthCredentials<DeviceGrant, C>;

impl ClientCredentials {
    /// Constructs client credentials that refresh at the default threshold
    pub fn new(
        credentials: EncodedClientCredentials,
        workspace: Option<Workspace>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self::from_grant(
            ClientCredentialsGrant::new(credentials),
            workspace,
            endpoint,
            RefreshPolicy::default(),
        )
    }
}

impl DeviceMode {
    /// Constructs device-login credentials that refresh at the default threshold
    ///
    /// An `access_token` saved by the login is used until it is due for refresh.
    pub fn new(
        device_code: DeviceCode,
        refresh_token: Option<RefreshToken>,
        access_token: Option<AccessToken>,
        workspace: Option<Workspace>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self::from_grant(
            DeviceGrant::new(device_code, refresh_token),
            workspace,
            endpoint,
            RefreshPolicy::default(),
        )
        .with_access_token(access_token)
    }
}

impl<G, C> OAuthCredentials<G, C> {
    /// Constructs credentials for an arbitrary grant and refresh policy
    pub fn from_grant(
        grant: G,
        workspace: Option<Workspace>,
        endpoint: Arc<dyn TokenEndpoint>,
        policy: RefreshPolicy<C>,
    ) -> Self {
        Self {
            workspace,
            inner: Arc::new(Inner {
                grant,
                endpoint,
                policy,
                access_token: ArcSwapOption::empty(),
            }),
            flight: SingleFlight::default(),
        }
    }

    /// Seeds the cache with a previously issued access token
    ///
    /// Empty tokens are ignored.
    pub fn with_access_token(self, access_token: Option<AccessToken>) -> Self {
        self.inner.access_token.store(
            access_token
                .filter(|t| !t.as_str().is_empty())
                .map(Arc::new),
        );
        self
    }

    /// The grant used for token exchanges
    pub fn grant(&self) -> &G {
        &self.inner.grant
    }
}

impl<G: GrantSource, C: Clock + Send + Sync + 'static> OAuthCredentials<G, C> {
    /// The most recently obtained access token
    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.access_token()
    }

    /// Whether a call to `authenticate()` would start a new exchange
    ///
    /// Always `false` while an exchange is in flight.
    pub fn needs_refresh(&self) -> bool {
        !self.flight.is_in_flight() && self.inner.token_needs_refresh()
    }

    fn start_refresh(&self) -> impl Future<Output = Result<(), Arc<TokenRequestError>>> + Send {
        let inner = Arc::clone(&self.inner);
        let request = inner.grant.token_request();
        async move { inner.exchange(request).await }
    }
}

#[async_trait]
impl<G: GrantSource, C: Clock + Send + Sync + 'static> Credentials for OAuthCredentials<G, C> {
    async fn authenticate(&self) -> Result<(), AuthError> {
        let flight = self.flight.join_or_start(
            || self.inner.token_needs_refresh(),
            || self.start_refresh(),
        );

        match flight {
            Some(flight) => flight.await.map_err(AuthError::from),
            None => Ok(()),
        }
    }

    fn authorization(&self) -> Option<HeaderValue> {
        self.inner.access_token().and_then(|t| bearer(t.as_str()))
    }

    fn workspace(&self) -> Option<&WorkspaceRef> {
        self.workspace.as_deref()
    }

    fn strategy(&self) -> Strategy {
        self.inner.grant.strategy()
    }
}

impl<G: fmt::Debug, C> fmt::Debug for OAuthCredentials<G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("workspace", &self.workspace)
            .field("grant", &self.inner.grant)
            .field("access_token", &self.inner.access_token.load_full())
            .field("refresh", &self.flight)
            .finish()
    }
}
