//! Credential resolution and coalesced token refresh for the Blaxel platform
//!
//! Every request to the platform carries two headers: `x-blaxel-authorization`
//! with a bearer value and `x-blaxel-workspace` naming the workspace to act
//! on. This crate decides where the bearer value comes from and keeps it
//! valid.
//!
//! Credentials are resolved once, in priority order:
//!
//! 1. `BL_API_KEY`, a static key used as-is
//! 2. `BL_CLIENT_CREDENTIALS`, exchanged for an access token using the client
//!    credentials flow
//! 3. the entry for the selected workspace in `~/.blaxel/config.yaml`, which
//!    may hold an API key, client credentials, or the results of a device
//!    login that are exchanged using a refresh token
//!
//! With none of these, requests are sent anonymously.
//!
//! Access tokens are refreshed once less than half of their lifetime
//! remains. Any number of concurrent callers of
//! [`authenticate()`][Authentication::authenticate()] share a single token
//! exchange and all observe its outcome.
//!
//! ```
//! use blaxel_auth::{config::ConfigSource, Authentication, Settings};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = ConfigSource::EnvironmentOnly(
//!     [("BL_API_KEY", "sk_test"), ("BL_WORKSPACE", "ws1")]
//!         .into_iter()
//!         .collect(),
//! );
//!
//! let auth = Authentication::new(Settings::builder(source).build()?);
//! auth.authenticate().await?;
//!
//! let headers = auth.headers();
//! assert_eq!(headers["x-blaxel-authorization"], "Bearer sk_test");
//! assert_eq!(headers["x-blaxel-workspace"], "ws1");
//! # Ok(())
//! # }
//! ```
//!
//! Applications usually start from [`Authentication::from_env()`], which reads
//! the process environment and the local config file.
//!
//! # Features
//!
//! * `file` (default): reads credentials from the local config file.
//! * `default-tls` (default) and `rustls-tls`: select the TLS backend used for
//!   token requests.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authentication;
mod braids;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod resolver;
mod settings;
pub mod single_flight;
mod tokens;

pub use authentication::Authentication;
pub use braids::*;
pub use credentials::{AuthError, Credentials, Strategy};
pub use settings::{
    ConfigError, Environment, Settings, SettingsBuilder, AUTHORIZATION, WORKSPACE,
};
pub use tokens::{ClaimsError, RefreshPolicy, TokenLifetime};
