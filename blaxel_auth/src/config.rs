//! Where credentials and settings are read from
//!
//! A [`ConfigSource`] is chosen once at startup. Embedders without a
//! filesystem use [`ConfigSource::EnvironmentOnly`] or [`ConfigSource::None`]
//! instead of having the SDK probe for one.

use std::{collections::HashMap, fmt};
#[cfg(feature = "file")]
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AccessToken, ApiKey, DeviceCode, EncodedClientCredentials, RefreshToken, Workspace};

/// Names of the environment variables the SDK reads
pub mod vars {
    /// A platform API key
    pub const API_KEY: &str = "BL_API_KEY";
    /// Packed OAuth client credentials
    pub const CLIENT_CREDENTIALS: &str = "BL_CLIENT_CREDENTIALS";
    /// The workspace to act on
    pub const WORKSPACE: &str = "BL_WORKSPACE";
    /// The platform environment, `prod` or `dev`
    pub const ENV: &str = "BL_ENV";
    /// Overrides the platform API base URL
    pub const API_URL: &str = "BL_API_URL";
    /// Overrides the platform run URL
    pub const RUN_URL: &str = "BL_RUN_URL";
}

/// A snapshot of environment variables
///
/// Empty values are treated as unset.
#[derive(Clone, Default)]
pub struct Variables(HashMap<String, String>);

impl Variables {
    /// Captures the current process environment
    pub fn from_process() -> Self {
        std::env::vars().collect()
    }

    /// Gets a variable's value if it is set and non-empty
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whether a variable is set to a non-empty value
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Debug for Variables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.0.keys().collect();
        names.sort();
        f.debug_set().entries(names).finish()
    }
}

/// The capability used to look up configuration
#[derive(Clone, Debug)]
pub enum ConfigSource {
    /// Environment variables plus a YAML config file
    #[cfg(feature = "file")]
    #[cfg_attr(docsrs, doc(cfg(feature = "file")))]
    Filesystem {
        /// The environment snapshot
        variables: Variables,
        /// Location of the config file, which need not exist
        path: PathBuf,
    },
    /// Environment variables only
    EnvironmentOnly(Variables),
    /// Nothing; the SDK runs anonymously unless given explicit credentials
    None,
}

impl ConfigSource {
    /// Selects the richest source available to this process
    ///
    /// Uses `~/.blaxel/config.yaml` when a home directory can be determined
    /// and the `file` feature is enabled, otherwise only the environment.
    pub fn detect() -> Self {
        let variables = Variables::from_process();

        #[cfg(feature = "file")]
        {
            if let Some(path) = default_config_path() {
                return Self::Filesystem { variables, path };
            }
        }

        Self::EnvironmentOnly(variables)
    }

    /// The environment snapshot, if this source has one
    pub fn variables(&self) -> Option<&Variables> {
        match self {
            #[cfg(feature = "file")]
            Self::Filesystem { variables, .. } => Some(variables),
            Self::EnvironmentOnly(variables) => Some(variables),
            Self::None => None,
        }
    }

    /// Gets an environment variable's value if it is set and non-empty
    pub fn var(&self, name: &str) -> Option<&str> {
        self.variables().and_then(|v| v.get(name))
    }

    /// Reads and parses the config file
    ///
    /// Any failure is logged and reported as no file.
    pub fn config_file(&self) -> Option<ConfigFile> {
        match self {
            #[cfg(feature = "file")]
            Self::Filesystem { path, .. } => read_config_file(path),
            _ => None,
        }
    }
}

/// The default location of the config file
#[cfg(feature = "file")]
#[cfg_attr(docsrs, doc(cfg(feature = "file")))]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".blaxel").join("config.yaml"))
}

#[cfg(feature = "file")]
fn read_config_file(path: &Path) -> Option<ConfigFile> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => {
            tracing::debug!(
                path = %path.display(),
                error = (&error as &dyn std::error::Error),
                "config file not readable, ignoring it"
            );
            return None;
        }
    };

    match serde_yaml::from_str(&contents) {
        Ok(config) => Some(config),
        Err(error) => {
            tracing::debug!(
                path = %path.display(),
                error = (&error as &dyn std::error::Error),
                "config file not parseable, ignoring it"
            );
            None
        }
    }
}

/// The contents of the local config file written by the platform's CLI
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// The active context
    #[serde(default)]
    pub context: Context,
    /// Every workspace the user has logged into
    #[serde(default)]
    pub workspaces: Vec<WorkspaceEntry>,
}

impl ConfigFile {
    /// Finds the entry for a workspace
    pub fn workspace(&self, name: &crate::WorkspaceRef) -> Option<&WorkspaceEntry> {
        self.workspaces
            .iter()
            .find(|w| w.name.as_str() == name.as_str())
    }
}

/// The active context in the config file
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Context {
    /// The selected workspace
    #[serde(default)]
    pub workspace: Option<Workspace>,
}

/// A workspace the user has logged into
#[derive(Clone, Debug, Deserialize)]
pub struct WorkspaceEntry {
    /// The workspace name
    pub name: Workspace,
    /// The environment this workspace lives in
    #[serde(default)]
    pub env: Option<String>,
    /// The stored credentials
    #[serde(default)]
    pub credentials: StoredCredentials,
}

/// Credentials saved by a login
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StoredCredentials {
    /// A platform API key
    #[serde(default, rename = "apiKey", alias = "api_key")]
    pub api_key: Option<ApiKey>,
    /// Packed OAuth client credentials
    #[serde(default, alias = "clientCredentials")]
    pub client_credentials: Option<EncodedClientCredentials>,
    /// The device code of a device login
    #[serde(default)]
    pub device_code: Option<DeviceCode>,
    /// The refresh token of a device login
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    /// The last access token issued to a device login
    #[serde(default)]
    pub access_token: Option<AccessToken>,
}
