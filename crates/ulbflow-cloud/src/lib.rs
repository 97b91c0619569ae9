//! ulbflow Cloud Reconciler
//!
//! This crate keeps the backends attached to a UCloud load balancer listener
//! in line with a declaration, and waits until the control plane reports
//! every attached host as running.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                AttachmentManager                 │
//! │          (create / read / update / delete)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 ulbflow-cloud                    │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────────────┐ │
//! │  │   diff   │ │ mutator  │ │  poller / retry  │ │
//! │  └──────────┘ └──────────┘ └──────────────────┘ │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────────────┐ │
//! │  │  lookup  │ │projector │ │    State Mgmt    │ │
//! │  └──────────┘ └──────────┘ └──────────────────┘ │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   trait LoadBalancerApi { ... }          │   │
//! │  └──────────────────────────────────────────┘   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼───────┐
//!           │    ucloud     │
//!           │   provider    │
//!           └───────────────┘
//! ```

pub mod action;
pub mod attachment;
pub mod clock;
pub mod diff;
pub mod error;
pub mod lookup;
pub mod model;
pub mod mutator;
pub mod poller;
pub mod projector;
pub mod provider;
pub mod state;

#[cfg(test)]
mod fake;

// Re-exports
pub use action::{Action, ActionKind, AppliedStep, ApplyReport, Plan, PlanSummary};
pub use attachment::{
    AttachmentManager, AttachmentState, BackendGroup, LbAttachmentConfig, ReconcileConfig,
    ServerType,
};
pub use clock::{Clock, ManualClock, TokioClock};
pub use diff::{Change, Diff, DiffResult, diff, diff_by};
pub use error::{CloudError, Result};
pub use lookup::{
    BackendDirectory, backend_directory, describe_backend, describe_policy, resolve_backend_ids,
};
pub use model::{
    AttachmentSet, BackendLine, BackendRecord, BackendUpdate, Instance, IpEntry, Listener,
    ListenerRef, Member, ObservedBackend, Policy,
};
pub use mutator::{MutatorOptions, apply, release_members};
pub use poller::{PollConfig, PollState, RetryError, await_convergence, evaluate, retry};
pub use projector::{observe, project};
pub use provider::{EXCEPTION_RUNNING, LoadBalancerApi, NORMAL_RUNNING, StatusTable};
pub use state::{StateFile, StateLock, StateStore};
