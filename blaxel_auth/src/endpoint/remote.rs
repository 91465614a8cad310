use async_trait::async_trait;
use reqwest::header::{self, HeaderValue};
use thiserror::Error;
use url::Url;

use super::{dto, TokenEndpoint};

/// A token endpoint reached over HTTP
#[derive(Clone, Debug)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_url: Url,
}

impl HttpTokenEndpoint {
    /// Constructs a new token endpoint posting to `token_url`
    pub fn new(client: reqwest::Client, token_url: Url) -> Self {
        Self { client, token_url }
    }

    /// The URL token requests are posted to
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }
}

/// An error while attempting to request a new token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The authority answered with an OAuth error
    #[error("token request rejected by authority: {code}")]
    Rejected {
        /// The HTTP status of the response
        status: u16,
        /// The OAuth error code, such as `invalid_grant`
        code: String,
        /// The human-readable description supplied by the authority
        description: Option<String>,
    },
    /// An error status from the authority with a body that is not an OAuth error
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
}

impl TokenRequestError {
    /// The OAuth error code reported by the authority, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

fn basic_authorization(credentials: &crate::EncodedClientCredentialsRef) -> Option<HeaderValue> {
    let mut value = HeaderValue::try_from(format!("Basic {}", credentials.as_str())).ok()?;
    value.set_sensitive(true);
    Some(value)
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    #[tracing::instrument(
        err,
        skip(self, request),
        fields(
            token_url = %self.token_url,
            grant_type = request.grant.grant_type(),
        ),
    )]
    async fn oauth_token(
        &self,
        request: dto::TokenRequest,
    ) -> Result<dto::TokenResponse, TokenRequestError> {
        tracing::trace!("requesting token from authority");

        let mut req = self.client.post(self.token_url.clone()).json(&request.grant);
        if let Some(credentials) = &request.basic_authorization {
            match basic_authorization(credentials) {
                Some(value) => req = req.header(header::AUTHORIZATION, value),
                None => tracing::warn!(
                    "client credentials contain bytes not allowed in a header, sending without them"
                ),
            }
        }

        let resp = req.send().await.map_err(TokenRequestError::RequestSend)?;
        let status = resp.status();

        tracing::debug!(
            response.status = status.as_u16(),
            "received token response from issuing authority"
        );

        if let Err(error) = resp.error_for_status_ref() {
            let body = resp
                .text()
                .await
                .map_err(TokenRequestError::BodyReadError)?;

            return match serde_json::from_str::<dto::RawTokenResponse>(&body) {
                Ok(dto::RawTokenResponse {
                    error: Some(code),
                    error_description,
                    ..
                }) => Err(TokenRequestError::Rejected {
                    status: status.as_u16(),
                    code,
                    description: error_description,
                }),
                _ => Err(TokenRequestError::ErrorWithBody {
                    source: error,
                    body,
                }),
            };
        }

        let body = resp
            .bytes()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        let raw: dto::RawTokenResponse = serde_json::from_slice(&body)?;

        if let (None, Some(code)) = (&raw.token.access_token, raw.error) {
            return Err(TokenRequestError::Rejected {
                status: status.as_u16(),
                code,
                description: raw.error_description,
            });
        }

        tracing::info!(
            has_access_token = raw.token.access_token.is_some(),
            has_refresh_token = raw.token.refresh_token.is_some(),
            expires_in = ?raw.token.expires_in,
            "received new tokens"
        );

        Ok(raw.token)
    }
}
