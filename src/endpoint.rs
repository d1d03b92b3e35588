//! Upload endpoint: the live, atomically swappable URL and its persisted copy

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::ConfigError;

/// Parse and check a user-supplied endpoint address
pub fn parse_endpoint(input: &str) -> Result<Url, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ConfigError::EmptyEndpoint);
    }

    let url = Url::parse(input).map_err(|err| ConfigError::InvalidEndpoint {
        url: input.to_string(),
        reason: err.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidEndpoint {
            url: input.to_string(),
            reason: format!("unsupported scheme '{other}', expected http or https"),
        }),
    }
}

/// Current upload target.
///
/// Writers replace the whole URL; readers take an `Arc` snapshot, so a request
/// keeps the URL it started with even if the endpoint changes mid-flight.
#[derive(Debug)]
pub struct EndpointConfig {
    url: ArcSwap<Url>,
}

impl EndpointConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url: ArcSwap::from_pointee(url),
        }
    }

    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        parse_endpoint(input).map(Self::new)
    }

    pub fn snapshot(&self) -> Arc<Url> {
        self.url.load_full()
    }

    /// Swap in a new URL, returning the one it replaced
    pub fn replace(&self, url: Url) -> Arc<Url> {
        self.url.swap(Arc::new(url))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    server_url: String,
}

/// Persists the endpoint across restarts in a small toml file
#[derive(Debug, Clone)]
pub struct EndpointStore {
    path: PathBuf,
}

impl EndpointStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved endpoint, or `None` if nothing has been saved yet
    pub fn load(&self) -> Result<Option<String>, ConfigError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved endpoint");
                return Ok(None);
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let state: PersistedState = toml::from_str(&text).map_err(|err| ConfigError::State {
            path: self.path.clone(),
            reason: err.to_string(),
        })?;
        Ok(Some(state.server_url))
    }

    /// Overwrite the saved endpoint
    pub fn save(&self, url: &Url) -> Result<(), ConfigError> {
        let state = PersistedState {
            server_url: url.to_string(),
        };
        let text = toml::to_string(&state).map_err(|err| ConfigError::State {
            path: self.path.clone(),
            reason: err.to_string(),
        })?;

        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        info!(path = %self.path.display(), %url, "Saved endpoint");
        Ok(())
    }
}
