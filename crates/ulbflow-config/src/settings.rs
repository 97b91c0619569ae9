//! Settings model
//!
//! The file layout mirrors the two concerns a provider needs: how to talk to
//! the UCloud API (`credentials`) and how patient the reconciler should be
//! while the control plane converges (`reconcile`).

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.ucloud.cn";
pub const DEFAULT_REGION: &str = "cn-bj2";

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UlbflowConfig {
    pub credentials: Credentials,
    pub reconcile: ReconcileSettings,
}

/// UCloud API credentials and endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub public_key: String,
    pub private_key: String,
    pub region: String,
    pub project_id: Option<String>,
    pub base_url: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            private_key: String::new(),
            region: DEFAULT_REGION.to_string(),
            project_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl Credentials {
    /// Override fields from `UCLOUD_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("UCLOUD_PUBLIC_KEY") {
            self.public_key = v;
        }
        if let Ok(v) = std::env::var("UCLOUD_PRIVATE_KEY") {
            self.private_key = v;
        }
        if let Ok(v) = std::env::var("UCLOUD_REGION") {
            self.region = v;
        }
        if let Ok(v) = std::env::var("UCLOUD_PROJECT_ID") {
            self.project_id = Some(v);
        }
        if let Ok(v) = std::env::var("UCLOUD_API_BASE_URL") {
            self.base_url = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.public_key.is_empty() {
            return Err(ConfigError::MissingCredential("public_key".to_string()));
        }
        if self.private_key.is_empty() {
            return Err(ConfigError::MissingCredential("private_key".to_string()));
        }
        if self.region.is_empty() {
            return Err(ConfigError::MissingCredential("region".to_string()));
        }
        Ok(())
    }
}

/// How backend additions are submitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// One `AllocateBackendBatch` call per chunk of line items
    #[default]
    Batch,
    /// One `AllocateBackend` call per member
    PerMember,
}

/// Reconciler timing and behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// Ceiling for convergence polling after a mutation
    pub timeout_secs: u64,
    /// Wait before the first convergence check
    pub initial_delay_secs: u64,
    pub poll_interval_secs: u64,
    /// Floor applied to the poll interval
    pub min_interval_secs: u64,
    /// Ceiling for the release-and-recheck loop on delete
    pub delete_timeout_secs: u64,
    pub allocation: AllocationMode,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            initial_delay_secs: 5,
            poll_interval_secs: 5,
            min_interval_secs: 3,
            delete_timeout_secs: 300,
            allocation: AllocationMode::Batch,
        }
    }
}

impl ReconcileSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting(
                "reconcile.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.delete_timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting(
                "reconcile.delete_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
