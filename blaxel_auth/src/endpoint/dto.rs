//! DTOs for interacting with the platform's token endpoint

use serde::{Deserialize, Serialize};

use crate::{AccessToken, DeviceCode, EncodedClientCredentials, RefreshToken};

/// The grant being exchanged, serialized as the JSON request body
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum Grant {
    /// The client credentials flow; the credentials travel in the
    /// `Authorization` header rather than the body
    ClientCredentials,
    /// The refresh token flow following a device login
    RefreshToken {
        /// The device code issued at login
        device_code: DeviceCode,
        /// The refresh token to redeem
        #[serde(skip_serializing_if = "Option::is_none")]
        refresh_token: Option<RefreshToken>,
    },
}

impl Grant {
    /// The OAuth `grant_type` value for this grant
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// A request for a new access token
#[derive(Clone, Debug)]
pub struct TokenRequest {
    /// The grant to exchange
    pub grant: Grant,

    /// Credentials to present as `Authorization: Basic <credentials>`
    pub basic_authorization: Option<EncodedClientCredentials>,
}

/// A successful response from the token endpoint
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TokenResponse {
    /// The issued access token
    #[serde(default)]
    pub access_token: Option<AccessToken>,

    /// A replacement refresh token, when the authority rotates them
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,

    /// Lifetime of the access token in seconds, if reported
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// A response carrying only an access token
    pub fn with_access_token(access_token: impl Into<AccessToken>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct RawTokenResponse {
    #[serde(flatten)]
    pub token: TokenResponse,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_credentials_body_carries_only_the_grant_type() {
        let body = serde_json::to_value(Grant::ClientCredentials).unwrap();
        assert_eq!(body, serde_json::json!({ "grant_type": "client_credentials" }));
    }

    #[test]
    fn refresh_token_body_carries_device_code_and_refresh_token() {
        let grant = Grant::RefreshToken {
            device_code: DeviceCode::from_static("dev-123"),
            refresh_token: Some(RefreshToken::from_static("rt-456")),
        };

        let body = serde_json::to_value(&grant).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "grant_type": "refresh_token",
                "device_code": "dev-123",
                "refresh_token": "rt-456",
            })
        );
    }

    #[test]
    fn error_responses_are_recognized() {
        let raw: RawTokenResponse = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#,
        )
        .unwrap();

        assert!(raw.token.access_token.is_none());
        assert_eq!(raw.error.as_deref(), Some("invalid_grant"));
        assert_eq!(raw.error_description.as_deref(), Some("refresh token revoked"));
    }
}
