//! The OAuth token endpoint used to obtain access tokens

use std::fmt;

use async_trait::async_trait;

pub mod dto;
mod remote;

pub use self::remote::{HttpTokenEndpoint, TokenRequestError};

/// An authority that exchanges credentials for access tokens
///
/// The platform exposes this as `POST {base_url}/oauth/token`. Tests and
/// embedders may substitute their own implementation.
#[async_trait]
pub trait TokenEndpoint: Send + Sync + fmt::Debug {
    /// Performs a single token exchange
    ///
    /// A response carrying an OAuth `error` must be reported as
    /// [`TokenRequestError::Rejected`].
    async fn oauth_token(
        &self,
        request: dto::TokenRequest,
    ) -> Result<dto::TokenResponse, TokenRequestError>;
}
