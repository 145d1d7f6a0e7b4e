//! Daemon configuration.
//!
//! Loaded from an optional YAML file; command-line flags override whatever
//! the file says. Protocol tunables live under `swim:`:
//!
//! ```yaml
//! listen: 0.0.0.0:26502
//! advertise: node-1.internal:26502
//! memberId: "1"
//! contacts:
//!   - node-0.internal:26502
//! swim:
//!   probeInterval: 1000
//!   syncInterval: 10000
//! ```

use crate::poll::DEFAULT_POLL_LIMIT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use swim_core::{MemberId, MemberIdError, SwimConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid member id {value:?}: {source}")]
    MemberId {
        value: String,
        source: MemberIdError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Socket address to bind
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Address other members use to reach us (defaults to the bound address)
    #[serde(default)]
    pub advertise: Option<String>,

    /// Our member id (random when absent)
    #[serde(default)]
    pub member_id: Option<String>,

    /// Contact points to join through. Empty means we seed a new cluster.
    #[serde(default)]
    pub contacts: Vec<String>,

    /// Inbound requests handled per poll
    #[serde(default = "default_poll_limit")]
    pub poll_limit: usize,

    #[serde(default)]
    pub swim: SwimConfig,
}

fn default_listen() -> String {
    "0.0.0.0:26502".to_string()
}

fn default_poll_limit() -> usize {
    DEFAULT_POLL_LIMIT
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            advertise: None,
            member_id: None,
            contacts: Vec::new(),
            poll_limit: default_poll_limit(),
            swim: SwimConfig::default(),
        }
    }
}

/// Values given on the command line. `None` / empty leaves the file's value.
#[derive(Debug, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub advertise: Option<String>,
    pub member_id: Option<String>,
    pub contacts: Vec<String>,
}

impl DaemonConfig {
    /// Load `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if overrides.advertise.is_some() {
            self.advertise = overrides.advertise;
        }
        if overrides.member_id.is_some() {
            self.member_id = overrides.member_id;
        }
        if !overrides.contacts.is_empty() {
            self.contacts = overrides.contacts;
        }
        self
    }

    /// The configured member id, or a fresh random one.
    pub fn resolve_member_id(&self) -> Result<MemberId, ConfigError> {
        match &self.member_id {
            Some(value) => value.parse().map_err(|source| ConfigError::MemberId {
                value: value.clone(),
                source,
            }),
            None => Ok(MemberId::generate()),
        }
    }
}
