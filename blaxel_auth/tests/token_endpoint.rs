//! Token exchanges against a mock platform authority

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use blaxel_auth::{
    config::ConfigSource,
    endpoint::{
        dto::{Grant, TokenRequest},
        HttpTokenEndpoint, TokenEndpoint, TokenRequestError,
    },
    Authentication, DeviceCode, EncodedClientCredentials, RefreshToken, Settings, Strategy,
    AUTHORIZATION, WORKSPACE,
};
use futures::future::join_all;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(server: &MockServer) -> HttpTokenEndpoint {
    let token_url = format!("{}/v0/oauth/token", server.uri()).parse().unwrap();
    HttpTokenEndpoint::new(reqwest::Client::new(), token_url)
}

fn client_credentials_request() -> TokenRequest {
    TokenRequest {
        grant: Grant::ClientCredentials,
        basic_authorization: Some(EncodedClientCredentials::from_static("abc")),
    }
}

fn long_lived_jwt() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(json!({ "iat": now, "exp": now + 3600 }).to_string());
    format!("{}.{}.sig", header, claims)
}

#[tokio::test]
async fn client_credentials_are_sent_as_basic_authorization() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v0/oauth/token"))
        .and(header("Authorization", "Basic abc"))
        .and(body_json(json!({ "grant_type": "client_credentials" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok1",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = endpoint(&server)
        .oauth_token(client_credentials_request())
        .await
        .unwrap();

    assert_eq!(response.access_token.unwrap().as_str(), "tok1");
    assert_eq!(response.expires_in, Some(3600));
    assert!(response.refresh_token.is_none());
}

#[tokio::test]
async fn device_grant_sends_the_refresh_token_and_device_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v0/oauth/token"))
        .and(body_json(json!({
            "grant_type": "refresh_token",
            "device_code": "dc",
            "refresh_token": "rt",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok2",
            "refresh_token": "rt-next",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = endpoint(&server)
        .oauth_token(TokenRequest {
            grant: Grant::RefreshToken {
                device_code: DeviceCode::from_static("dc"),
                refresh_token: Some(RefreshToken::from_static("rt")),
            },
            basic_authorization: None,
        })
        .await
        .unwrap();

    assert_eq!(response.access_token.unwrap().as_str(), "tok2");
    assert_eq!(response.refresh_token.unwrap().as_str(), "rt-next");
}

#[tokio::test]
async fn oauth_error_is_reported_as_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v0/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "unknown client",
        })))
        .mount(&server)
        .await;

    let error = endpoint(&server)
        .oauth_token(client_credentials_request())
        .await
        .unwrap_err();

    match error {
        TokenRequestError::Rejected {
            status,
            code,
            description,
        } => {
            assert_eq!(status, 400);
            assert_eq!(code, "invalid_client");
            assert_eq!(description.as_deref(), Some("unknown client"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn oauth_error_with_success_status_is_reported_as_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v0/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "access_denied" })),
        )
        .mount(&server)
        .await;

    let error = endpoint(&server)
        .oauth_token(client_credentials_request())
        .await
        .unwrap_err();

    assert_eq!(error.code(), Some("access_denied"));
}

#[tokio::test]
async fn unexpected_error_body_is_kept() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v0/oauth/token"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let error = endpoint(&server)
        .oauth_token(client_credentials_request())
        .await
        .unwrap_err();

    match error {
        TokenRequestError::ErrorWithBody { body, .. } => assert_eq!(body, "bad gateway"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn malformed_token_body_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v0/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let error = endpoint(&server)
        .oauth_token(client_credentials_request())
        .await
        .unwrap_err();

    assert!(matches!(error, TokenRequestError::TokenBodyError(_)));
}

mod settings_from_environment {
    use super::*;

    fn source(server: &MockServer) -> ConfigSource {
        ConfigSource::EnvironmentOnly(
            [
                ("BL_CLIENT_CREDENTIALS", "abc".to_owned()),
                ("BL_WORKSPACE", "ws1".to_owned()),
                ("BL_API_URL", format!("{}/v0", server.uri())),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[tokio::test]
    async fn client_credentials_authenticate_against_the_configured_api() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v0/oauth/token"))
            .and(header("Authorization", "Basic abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok1",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = Authentication::new(Settings::builder(source(&server)).build().unwrap());
        auth.authenticate().await.unwrap();

        let settings = auth.settings();
        assert_eq!(settings.strategy(), Strategy::ClientCredentials);
        assert_eq!(
            settings.token_url().as_str(),
            format!("{}/v0/oauth/token", server.uri())
        );

        let headers = auth.headers();
        assert_eq!(headers[&AUTHORIZATION], "Bearer tok1");
        assert_eq!(headers[&WORKSPACE], "ws1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_share_one_token_exchange() {
        let server = MockServer::start().await;
        let token = long_lived_jwt();

        Mock::given(method("POST"))
            .and(path("/v0/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": token }))
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let auth = Authentication::new(Settings::builder(source(&server)).build().unwrap());

        let tasks = (0..8).map(|_| {
            let auth = auth.clone();
            tokio::spawn(async move { auth.authenticate().await })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        auth.authenticate().await.unwrap();

        assert_eq!(
            auth.headers()[&AUTHORIZATION],
            format!("Bearer {}", token).as_str()
        );
    }

    #[tokio::test]
    async fn rejected_exchange_is_reported_to_the_caller() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v0/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
            })))
            .mount(&server)
            .await;

        let auth = Authentication::new(Settings::builder(source(&server)).build().unwrap());

        let error = auth.authenticate().await.unwrap_err();

        assert_eq!(error.code(), Some("invalid_client"));
        assert!(auth.headers().get(&AUTHORIZATION).is_none());
    }
}
