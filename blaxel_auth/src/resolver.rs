//! Determines which credentials are in effect
//!
//! The first match wins:
//!
//! 1. `BL_API_KEY`
//! 2. `BL_CLIENT_CREDENTIALS`
//! 3. the config file entry for the selected workspace
//!
//! Credentials from the environment act on `BL_WORKSPACE`. For the config
//! file, the selected workspace is `BL_WORKSPACE`, falling back to the file's
//! active context. Resolution performs no network I/O and never fails; an
//! unreadable config file is the same as no config file.

use std::cell::OnceCell;

use crate::config::{vars, ConfigFile, ConfigSource, StoredCredentials};
use crate::{AccessToken, ApiKey, DeviceCode, EncodedClientCredentials, RefreshToken, Workspace};

/// The credentials in effect and the workspace they act on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialsType {
    /// The workspace requests are made against
    pub workspace: Option<Workspace>,
    /// The credential material
    pub kind: CredentialKind,
}

/// The kinds of credential material
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialKind {
    /// A static API key
    ApiKey(ApiKey),
    /// Packed OAuth client credentials
    ClientCredentials(EncodedClientCredentials),
    /// The results of a device login
    Device {
        /// The device code issued at login
        device_code: DeviceCode,
        /// The refresh token issued at login
        refresh_token: Option<RefreshToken>,
        /// The most recent access token, if saved
        access_token: Option<AccessToken>,
    },
}

/// The outcome of a successful resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    /// The credentials in effect
    pub credentials: CredentialsType,
    /// The environment declared by the config file's workspace entry, reported
    /// only when `BL_ENV` is not already set
    pub default_env: Option<String>,
}

/// Resolves credentials from a configuration source
pub fn resolve(source: &ConfigSource) -> Option<Resolved> {
    Resolver::new(source).resolve()
}

/// Resolves credentials, reading the config file at most once
#[derive(Debug)]
pub struct Resolver<'a> {
    source: &'a ConfigSource,
    file: OnceCell<Option<ConfigFile>>,
}

impl<'a> Resolver<'a> {
    /// Constructs a resolver over `source`
    pub fn new(source: &'a ConfigSource) -> Self {
        Self {
            source,
            file: OnceCell::new(),
        }
    }

    fn config_file(&self) -> Option<&ConfigFile> {
        self.file
            .get_or_init(|| self.source.config_file())
            .as_ref()
    }

    /// The workspace selected by the environment or the config file's context
    pub fn workspace(&self) -> Option<Workspace> {
        if let Some(workspace) = self.source.var(vars::WORKSPACE) {
            return Some(Workspace::from(workspace));
        }

        self.config_file()
            .and_then(|config| config.context.workspace.clone())
            .filter(|w| !w.as_str().is_empty())
    }

    /// Determines the credentials in effect, if any
    pub fn resolve(&self) -> Option<Resolved> {
        if let Some(api_key) = self.source.var(vars::API_KEY) {
            tracing::debug!(source = vars::API_KEY, "resolved API key credentials");
            return Some(Resolved {
                credentials: CredentialsType {
                    workspace: self.env_workspace(),
                    kind: CredentialKind::ApiKey(ApiKey::from(api_key)),
                },
                default_env: None,
            });
        }

        if let Some(credentials) = self.source.var(vars::CLIENT_CREDENTIALS) {
            tracing::debug!(
                source = vars::CLIENT_CREDENTIALS,
                "resolved client credentials"
            );
            return Some(Resolved {
                credentials: CredentialsType {
                    workspace: self.env_workspace(),
                    kind: CredentialKind::ClientCredentials(EncodedClientCredentials::from(
                        credentials,
                    )),
                },
                default_env: None,
            });
        }

        let workspace = self.workspace()?;
        let entry = self.config_file()?.workspace(&workspace)?;
        let kind = stored_kind(&entry.credentials)?;

        tracing::debug!(workspace = %workspace, "resolved credentials from config file");

        let default_env = if self.source.var(vars::ENV).is_some() {
            None
        } else {
            entry.env.clone().filter(|e| !e.is_empty())
        };

        Some(Resolved {
            credentials: CredentialsType {
                workspace: Some(workspace),
                kind,
            },
            default_env,
        })
    }

    fn env_workspace(&self) -> Option<Workspace> {
        self.source.var(vars::WORKSPACE).map(Workspace::from)
    }
}

fn non_empty<T: AsRef<str>>(value: &Option<T>) -> Option<&T> {
    value.as_ref().filter(|v| !v.as_ref().is_empty())
}

fn stored_kind(stored: &StoredCredentials) -> Option<CredentialKind> {
    if let Some(api_key) = non_empty(&stored.api_key) {
        return Some(CredentialKind::ApiKey(api_key.clone()));
    }

    if let Some(credentials) = non_empty(&stored.client_credentials) {
        return Some(CredentialKind::ClientCredentials(credentials.clone()));
    }

    non_empty(&stored.device_code).map(|device_code| CredentialKind::Device {
        device_code: device_code.clone(),
        refresh_token: non_empty(&stored.refresh_token).cloned(),
        access_token: non_empty(&stored.access_token).cloned(),
    })
}
