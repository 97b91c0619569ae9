//! UCloud provider for ulbflow
//!
//! This crate implements the `LoadBalancerApi` trait against the UCloud
//! HTTP API, so the reconciler in `ulbflow-cloud` can attach hosts to ULB
//! listeners.
//!
//! # Requirements
//!
//! - Credentials in `ulbflow.yaml` or `UCLOUD_PUBLIC_KEY`, `UCLOUD_PRIVATE_KEY`
//!   and `UCLOUD_REGION` env vars
//!
//! # Example
//!
//! ```ignore
//! use ulbflow_cloud::{AttachmentManager, LbAttachmentConfig, ReconcileConfig, StateStore};
//! use ulbflow_cloud_ucloud::UCloudProvider;
//!
//! let config = ulbflow_config::load()?;
//! let provider = UCloudProvider::from_config(&config)?;
//! let manager = AttachmentManager::new(provider, ReconcileConfig::from(&config.reconcile));
//!
//! let desired: LbAttachmentConfig = serde_yaml::from_str(&declaration)?;
//! let state = manager.reconcile(&StateStore::new("."), &desired).await?;
//! println!("{} is {}", state.id, state.status);
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod provider;
pub mod udb;

pub use api::{UDBSet, ULBSet};
pub use client::{Params, UCloudClient, sign};
pub use error::{Result, UCloudError};
pub use provider::UCloudProvider;
