//! Configuration presence tracking
//!
//! Whether the gateway has been provisioned is derived from the existence of a
//! marker file written by the onboarding flow. Nothing is cached: every check
//! hits the filesystem so that a file written moments earlier is observed.

use crate::error::GatewayError;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Provisioning state of the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationState {
    Unconfigured,
    Configured,
}

/// Read-only view of the configuration marker
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inspect the marker, reporting filesystem errors other than "not found"
    pub async fn check(&self) -> Result<ConfigurationState, GatewayError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(ConfigurationState::Configured),
            Ok(_) => Ok(ConfigurationState::Unconfigured),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ConfigurationState::Unconfigured),
            Err(source) => Err(GatewayError::ConfigurationRead {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Current state; read errors count as unconfigured
    pub async fn state(&self) -> ConfigurationState {
        self.check().await.unwrap_or_else(|e| {
            warn!(error = %e, "Treating gateway as unconfigured");
            ConfigurationState::Unconfigured
        })
    }

    pub async fn is_configured(&self) -> bool {
        self.state().await == ConfigurationState::Configured
    }
}
