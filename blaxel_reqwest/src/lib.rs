//! Middleware that authenticates requests to the Blaxel platform
//!
//! [`AuthenticationMiddleware`] makes the platform credentials current before
//! each request and attaches the platform headers. [`ErrorDocumentationMiddleware`]
//! points callers at the authentication docs when the platform answers with
//! `401 Unauthorized` or `403 Forbidden`.
//!
//! [`client()`] assembles both around a new client:
//!
//! ```
//! use blaxel_auth::{config::ConfigSource, Authentication, Settings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = ConfigSource::EnvironmentOnly(
//!     [("BL_API_KEY", "sk_test"), ("BL_WORKSPACE", "ws1")]
//!         .into_iter()
//!         .collect(),
//! );
//! let auth = Authentication::new(Settings::builder(source).build()?);
//!
//! let client = blaxel_reqwest::client(auth);
//!
//! let req = client.get("https://api.blaxel.ai/v0/agents");
//! # drop(req);
//! # Ok(())
//! # }
//! ```
//!
//! An individual request can opt out by carrying the [`SkipAuthentication`]
//! extension:
//!
//! ```
//! # use blaxel_auth::{config::ConfigSource, Authentication, Settings};
//! use blaxel_reqwest::SkipAuthentication;
//! # let auth = Authentication::new(Settings::builder(ConfigSource::None).build().unwrap());
//! # let client = blaxel_reqwest::client(auth);
//!
//! let req = client
//!     .get("https://example.com/public")
//!     .with_extension(SkipAuthentication);
//! ```
//!
//! The platform headers can also be restricted to particular hosts:
//!
//! ```
//! # use blaxel_auth::{config::ConfigSource, Authentication, Settings};
//! use blaxel_reqwest::{AuthenticationMiddleware, ExactHostMatch};
//! # let auth = Authentication::new(Settings::builder(ConfigSource::None).build().unwrap());
//!
//! let platform = ExactHostMatch::platform(&auth.settings());
//! let middleware = AuthenticationMiddleware::new(auth).with_predicate(platform);
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use blaxel_auth::{Authentication, Settings};
use bytes::Bytes;
use predicates::{constant::BooleanPredicate, prelude::*, reflection};
use reqwest::{header, Request, Response, ResponseBuilderExt, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Error, Middleware, Next, Result};

/// Text appended to authentication failures
pub const DOCUMENTATION: &str = "For more information on authentication, see https://docs.blaxel.ai/sdk-reference/introduction#how-authentication-works-on-the-sdks";

/// Builds a client that authenticates every request with `auth`
///
/// Token requests and platform requests share the same underlying connection
/// pool.
pub fn client(auth: Authentication) -> ClientWithMiddleware {
    let http_client = auth.settings().http_client().clone();
    attach(ClientBuilder::new(http_client), auth).build()
}

/// Adds the authentication pipeline to a client under construction
///
/// Responses pass through [`ErrorDocumentationMiddleware`] after every other
/// middleware has seen them.
pub fn attach(builder: ClientBuilder, auth: Authentication) -> ClientBuilder {
    builder
        .with(ErrorDocumentationMiddleware)
        .with(AuthenticationMiddleware::new(auth))
}

/// Marks a request that must be sent without platform credentials
///
/// Attach with [`RequestBuilder::with_extension()`](reqwest_middleware::RequestBuilder::with_extension).
#[derive(Clone, Copy, Debug, Default)]
pub struct SkipAuthentication;

/// A middleware that attaches the platform headers to outgoing requests
#[derive(Clone, Debug)]
pub struct AuthenticationMiddleware<P = BooleanPredicate> {
    auth: Authentication,
    predicate: P,
}

impl AuthenticationMiddleware {
    /// Constructs a middleware that authenticates every request
    ///
    /// To restrict which requests receive the platform headers, provide a
    /// predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(auth: Authentication) -> Self {
        Self {
            auth,
            predicate: predicate::always(),
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AuthenticationMiddleware<P> {
        AuthenticationMiddleware {
            auth: self.auth,
            predicate,
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AuthenticationMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if extensions.get::<SkipAuthentication>().is_some() {
            tracing::trace!(url = %req.url(), "authentication skipped by request");
            return next.run(req, extensions).await;
        }

        if !self.predicate.eval(&req) {
            tracing::trace!(url = %req.url(), "request not eligible for platform credentials");
            return next.run(req, extensions).await;
        }

        let settings = self.auth.settings();
        settings.authenticate().await.map_err(Error::middleware)?;

        let headers = settings.headers();
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                url = %req.url(),
                strategy = %settings.strategy(),
                authorized = headers.contains_key(&blaxel_auth::AUTHORIZATION),
                workspace = ?settings.workspace(),
                "attaching platform headers"
            );
        }
        req.headers_mut().extend(headers);

        next.run(req, extensions).await
    }
}

/// Only attach platform headers if the request is being sent to one of the
/// hosts specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    hosts: Vec<String>,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new<S>(host: S) -> Self
    where
        S: ToString,
    {
        Self {
            hosts: vec![host.to_string()],
        }
    }

    /// Construct a predicate matching the platform API and run hosts
    pub fn platform(settings: &Settings) -> Self {
        let hosts = [settings.base_url(), settings.run_url()]
            .into_iter()
            .filter_map(|url| url.host_str())
            .map(str::to_owned)
            .collect();

        Self { hosts }
    }

    /// Also match `host`
    pub fn or_host<S>(mut self, host: S) -> Self
    where
        S: ToString,
    {
        self.hosts.push(host.to_string());
        self
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url()
            .host_str()
            .map_or(false, |host| self.hosts.iter().any(|h| h == host))
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "host",
                    req.url()
                        .host_str()
                        .unwrap_or("<no host>")
                        .to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host in [")?;
        f.write_str(&self.hosts.join(", "))?;
        f.write_str("]")
    }
}

/// A middleware that adds a pointer to the authentication docs to
/// `401 Unauthorized` and `403 Forbidden` responses
///
/// A JSON object body gains a `documentation` field. Any other UTF-8 body
/// gains a trailing line. Other bodies are left as they are.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorDocumentationMiddleware;

#[async_trait::async_trait]
impl Middleware for ErrorDocumentationMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let resp = next.run(req, extensions).await?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => document(resp).await,
            _ => Ok(resp),
        }
    }
}

struct Head {
    status: StatusCode,
    version: http::Version,
    headers: header::HeaderMap,
    url: reqwest::Url,
    extensions: http::Extensions,
}

impl Head {
    fn take(resp: &mut Response) -> Self {
        Self {
            status: resp.status(),
            version: resp.version(),
            headers: resp.headers().clone(),
            url: resp.url().clone(),
            extensions: std::mem::take(resp.extensions_mut()),
        }
    }

    fn with_body(self, body: reqwest::Body) -> Result<Response> {
        let mut resp = http::Response::builder()
            .url(self.url)
            .body(body)
            .map_err(Error::middleware)?;

        *resp.status_mut() = self.status;
        *resp.version_mut() = self.version;
        *resp.headers_mut() = self.headers;
        resp.extensions_mut().extend(self.extensions);

        Ok(Response::from(resp))
    }
}

async fn document(mut resp: Response) -> Result<Response> {
    let mut head = Head::take(&mut resp);

    let body = match resp.bytes().await {
        Ok(body) => body,
        Err(error) => {
            tracing::debug!(
                status = head.status.as_u16(),
                error = %error,
                "unable to read authentication failure body"
            );
            let replay = futures::stream::iter([Err::<Bytes, _>(error)]);
            return head.with_body(reqwest::Body::wrap_stream(replay));
        }
    };

    let Some(enriched) = with_documentation(&body) else {
        return head.with_body(body.into());
    };

    tracing::debug!(
        status = head.status.as_u16(),
        "added authentication documentation to response"
    );

    head.headers
        .insert(header::CONTENT_LENGTH, header::HeaderValue::from(enriched.len()));
    head.with_body(enriched.into())
}

fn with_documentation(body: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(body).ok()?;

    if let Ok(serde_json::Value::Object(mut object)) = serde_json::from_str(text) {
        object.insert("documentation".to_owned(), DOCUMENTATION.into());
        return serde_json::to_vec(&object).ok();
    }

    let mut enriched = String::with_capacity(text.len() + DOCUMENTATION.len() + 1);
    enriched.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        enriched.push('\n');
    }
    enriched.push_str(DOCUMENTATION);
    Some(enriched.into_bytes())
}
