//! Load balancer attachment resource
//!
//! A declaration attaches groups of hosts to one listener. The lifecycle
//! follows the usual create / read / update / delete contract:
//!
//! ```text
//! declaration ──▶ diff ──▶ mutator ──▶ poller ──▶ read-back ──▶ AttachmentState
//!                  ▲                                                │
//!                  └──────────── refreshed previous state ◀─────────┘
//! ```
//!
//! `AttachmentState` is always rebuilt from what the listener reports, so a
//! refresh followed by a diff exposes drift (ports changed or backends removed
//! out of band) as ordinary changes.

use crate::action::Plan;
use crate::clock::{Clock, TokioClock};
use crate::diff::diff;
use crate::error::{CloudError, Result};
use crate::lookup::{BackendDirectory, backend_directory};
use crate::model::{AttachmentSet, ListenerRef, Member, ObservedBackend};
use crate::mutator::{self, MutatorOptions, RESOURCE_TYPE_UHOST, release_members};
use crate::poller::{PollConfig, RetryError, await_convergence, retry};
use crate::projector::observe;
use crate::provider::{LoadBalancerApi, NORMAL_RUNNING};
use crate::state::{StateLock, StateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ulbflow_config::ReconcileSettings;

pub const MAX_BACKEND_GROUPS: usize = 20;
pub const MAX_SERVERS_PER_GROUP: usize = 20;

/// Kind of host attached as a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    #[default]
    Instance,
}

impl ServerType {
    /// Resource type the UCloud API expects
    pub fn resource_type(&self) -> &'static str {
        match self {
            Self::Instance => RESOURCE_TYPE_UHOST,
        }
    }
}

/// Hosts sharing one port and enabled flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendGroup {
    pub server_ids: Vec<String>,
    pub port: u16,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Declared attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbAttachmentConfig {
    pub load_balancer_id: String,
    pub listener_id: String,
    #[serde(default)]
    pub server_type: ServerType,
    pub backends: Vec<BackendGroup>,
}

impl LbAttachmentConfig {
    pub fn listener(&self) -> ListenerRef {
        ListenerRef::new(self.load_balancer_id.clone(), self.listener_id.clone())
    }

    /// State key, `lb_id/listener_id`
    pub fn key(&self) -> String {
        self.listener().to_string()
    }

    pub fn validate(&self) -> Result<()> {
        if self.load_balancer_id.is_empty() {
            return Err(CloudError::InvalidConfig(
                "load_balancer_id must not be empty".to_string(),
            ));
        }
        if self.listener_id.is_empty() {
            return Err(CloudError::InvalidConfig(
                "listener_id must not be empty".to_string(),
            ));
        }
        if self.backends.is_empty() || self.backends.len() > MAX_BACKEND_GROUPS {
            return Err(CloudError::InvalidConfig(format!(
                "expected 1-{} backend groups, got {}",
                MAX_BACKEND_GROUPS,
                self.backends.len()
            )));
        }
        for group in &self.backends {
            if group.server_ids.is_empty() || group.server_ids.len() > MAX_SERVERS_PER_GROUP {
                return Err(CloudError::InvalidConfig(format!(
                    "expected 1-{} server_ids in the group on port {}, got {}",
                    MAX_SERVERS_PER_GROUP,
                    group.port,
                    group.server_ids.len()
                )));
            }
        }
        self.members().map(|_| ())
    }

    /// Flatten the groups into one member set
    pub fn members(&self) -> Result<AttachmentSet> {
        AttachmentSet::new(
            self.backends
                .iter()
                .flat_map(|g| {
                    g.server_ids
                        .iter()
                        .map(move |id| Member::new(id.clone(), g.port, g.enabled))
                })
                .collect(),
        )
    }

    /// Rebuild a declaration from observed members, grouping by port and flag
    pub fn from_members(
        listener: &ListenerRef,
        server_type: ServerType,
        members: &[Member],
    ) -> Self {
        let mut backends: Vec<BackendGroup> = Vec::new();
        for member in members {
            let slot = backends.iter_mut().find(|g| {
                g.port == member.port
                    && g.enabled == member.enabled
                    && g.server_ids.len() < MAX_SERVERS_PER_GROUP
            });
            match slot {
                Some(group) => group.server_ids.push(member.id.clone()),
                None => backends.push(BackendGroup {
                    server_ids: vec![member.id.clone()],
                    port: member.port,
                    enabled: member.enabled,
                }),
            }
        }

        Self {
            load_balancer_id: listener.lb_id.clone(),
            listener_id: listener.listener_id.clone(),
            server_type,
            backends,
        }
    }
}

/// Attachment as last observed on the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentState {
    /// Backend ids joined with `-`
    pub id: String,
    pub config: LbAttachmentConfig,
    pub backends: Vec<ObservedBackend>,
    /// `normalRunning` when every backend is, otherwise the first other status
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttachmentState {
    pub fn key(&self) -> String {
        self.config.key()
    }

    pub fn is_running(&self) -> bool {
        self.status == NORMAL_RUNNING
    }
}

/// Timing and behavior of a reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub poll: PollConfig,
    pub delete_timeout: Duration,
    pub delete_interval: Duration,
    pub mutator: MutatorOptions,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        let poll = PollConfig::default();
        Self {
            delete_interval: poll.wait_between(),
            poll,
            delete_timeout: Duration::from_secs(300),
            mutator: MutatorOptions::default(),
        }
    }
}

impl From<&ReconcileSettings> for ReconcileConfig {
    fn from(settings: &ReconcileSettings) -> Self {
        let poll = PollConfig::from(settings);
        Self {
            delete_interval: poll.wait_between(),
            poll,
            delete_timeout: settings.delete_timeout(),
            mutator: MutatorOptions::from(settings),
        }
    }
}

/// Drives attachments through their lifecycle against one API handle
pub struct AttachmentManager<A, C = TokioClock> {
    api: A,
    clock: C,
    config: ReconcileConfig,
}

impl<A: LoadBalancerApi> AttachmentManager<A, TokioClock> {
    pub fn new(api: A, config: ReconcileConfig) -> Self {
        Self::with_clock(api, TokioClock, config)
    }
}

impl<A: LoadBalancerApi, C: Clock> AttachmentManager<A, C> {
    pub fn with_clock(api: A, clock: C, config: ReconcileConfig) -> Self {
        Self { api, clock, config }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// What applying `desired` on top of `previous` would do
    pub fn plan(
        &self,
        previous: Option<&AttachmentState>,
        desired: &LbAttachmentConfig,
    ) -> Result<Plan> {
        desired.validate()?;
        let new = desired.members()?;
        let old = match previous {
            Some(state) if state.config.listener() == desired.listener() => {
                state.config.members()?
            }
            _ => AttachmentSet::empty(),
        };
        Ok(Plan::from_diff(desired.listener(), &diff(&old, &new)))
    }

    /// Attach every declared member and wait until they run
    pub async fn create(&self, desired: &LbAttachmentConfig) -> Result<AttachmentState> {
        desired.validate()?;
        let new = desired.members()?;
        self.converge(desired, &AttachmentSet::empty(), &new, Utc::now())
            .await
    }

    /// Refresh `state` from the listener.
    ///
    /// `Ok(None)` means the attachment is gone: the listener was deleted or
    /// none of its members is attached anymore.
    pub async fn read(&self, state: &AttachmentState) -> Result<Option<AttachmentState>> {
        let members = state.config.members()?;
        self.refresh(&state.config, members.members(), state.created_at)
            .await
    }

    /// Move an attachment from `previous` to `desired`
    pub async fn update(
        &self,
        previous: &AttachmentState,
        desired: &LbAttachmentConfig,
    ) -> Result<AttachmentState> {
        desired.validate()?;

        if previous.config.listener() != desired.listener() {
            tracing::info!(
                "Attachment moves from {} to {}, replacing it",
                previous.config.listener(),
                desired.listener()
            );
            self.delete(previous).await?;
            return self.create(desired).await;
        }

        let old = previous.config.members()?;
        let new = desired.members()?;
        self.converge(desired, &old, &new, previous.created_at).await
    }

    /// Release every member and wait until none resolves anymore
    pub async fn delete(&self, state: &AttachmentState) -> Result<()> {
        let listener = state.config.listener();
        let members = state.config.members()?;

        let api = &self.api;
        let listener = &listener;
        let members = members.members();

        retry(
            &self.clock,
            &format!("release of attachment {}", state.id),
            self.config.delete_timeout,
            self.config.delete_interval,
            || async move {
                match release_members(api, listener, members).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(RetryError::NonRetryable(e)),
                }

                let directory = match backend_directory(api, listener).await {
                    Ok(directory) => directory,
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(RetryError::NonRetryable(e)),
                };

                let remaining: Vec<String> = members
                    .iter()
                    .filter(|m| directory.find(&m.id, m.port).is_some())
                    .map(Member::attachment_key)
                    .collect();

                if remaining.is_empty() {
                    Ok(())
                } else {
                    Err(RetryError::Retryable(CloudError::StateError(format!(
                        "backends still attached to {}: {}",
                        listener,
                        remaining.join(", ")
                    ))))
                }
            },
        )
        .await?;

        tracing::info!("Deleted attachment {} on {}", state.id, listener);
        Ok(())
    }

    /// Refresh, then create or update, then record the result in `store`
    pub async fn reconcile(
        &self,
        store: &StateStore,
        desired: &LbAttachmentConfig,
    ) -> Result<AttachmentState> {
        desired.validate()?;
        let lock = store.lock().await?;

        let result = async {
            let mut global = store.load().await?;
            let key = desired.key();
            let new = desired.members()?;

            // Include the desired members so backends allocated by an
            // interrupted earlier run are adopted instead of allocated twice.
            let previous = match global.get(&key) {
                Some(stored) => {
                    let mut known = stored.config.members()?.members().to_vec();
                    let unknown: Vec<Member> = new
                        .iter()
                        .filter(|m| known.iter().all(|k| k.id != m.id))
                        .cloned()
                        .collect();
                    known.extend(unknown);
                    self.refresh(&stored.config, &known, stored.created_at)
                        .await?
                }
                None => self.refresh(desired, new.members(), Utc::now()).await?,
            };

            let next = match previous {
                Some(previous) => self.update(&previous, desired).await?,
                None => self.create(desired).await?,
            };

            global.upsert(next.clone());
            store.save(&global).await?;
            Ok::<_, CloudError>(next)
        }
        .await;

        release_lock(lock, result).await
    }

    /// Delete the attachment stored under `key`; `false` if none was stored
    pub async fn destroy(&self, store: &StateStore, key: &str) -> Result<bool> {
        let lock = store.lock().await?;

        let result = async {
            let mut global = store.load().await?;
            let Some(state) = global.get(key).cloned() else {
                tracing::debug!("No attachment stored under {}", key);
                return Ok(false);
            };

            self.delete(&state).await?;
            global.remove(key);
            store.save(&global).await?;
            Ok::<_, CloudError>(true)
        }
        .await;

        release_lock(lock, result).await
    }

    async fn converge(
        &self,
        desired: &LbAttachmentConfig,
        old: &AttachmentSet,
        new: &AttachmentSet,
        created_at: DateTime<Utc>,
    ) -> Result<AttachmentState> {
        let listener = desired.listener();
        let changes = diff(old, new);

        if !changes.is_empty() {
            let options = MutatorOptions {
                resource_type: desired.server_type.resource_type().to_string(),
                ..self.config.mutator.clone()
            };
            let report = mutator::apply(&self.api, &listener, &changes, &options).await?;
            tracing::info!(
                "Applied {} call(s) to {} in {}ms",
                report.steps.len(),
                listener,
                report.duration_ms
            );

            // Only mutated members are waited on; unchanged ones keep
            // whatever status they report and show up in the read-back.
            let touched: Vec<Member> = changes
                .added
                .iter()
                .chain(changes.changed_after())
                .cloned()
                .collect();
            if !touched.is_empty() {
                await_convergence(
                    &self.api,
                    &self.clock,
                    &listener,
                    &touched,
                    &self.config.poll,
                )
                .await?;
            }
        }

        self.refresh(desired, new.members(), created_at)
            .await?
            .ok_or_else(|| CloudError::not_found("attachment", desired.key()))
    }

    async fn refresh(
        &self,
        declared: &LbAttachmentConfig,
        members: &[Member],
        created_at: DateTime<Utc>,
    ) -> Result<Option<AttachmentState>> {
        let listener = declared.listener();
        let directory = match backend_directory(&self.api, &listener).await {
            Ok(directory) => directory,
            Err(e) if e.is_not_found() => {
                tracing::warn!("Listener {} is gone: {}", listener, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let backends = observe_members(&directory, members, &self.api.status_table());
        if backends.is_empty() {
            tracing::warn!("No declared backend is attached to {}", listener);
            return Ok(None);
        }
        if backends.len() < members.len() {
            tracing::warn!(
                "{} of {} declared backend(s) missing from {}",
                members.len() - backends.len(),
                members.len(),
                listener
            );
        }

        let observed: Vec<Member> = backends
            .iter()
            .map(|b| Member::new(b.resource_id.clone(), b.port, b.enabled))
            .collect();

        Ok(Some(AttachmentState {
            id: backends
                .iter()
                .map(|b| b.backend_id.as_str())
                .collect::<Vec<_>>()
                .join("-"),
            config: LbAttachmentConfig::from_members(&listener, declared.server_type, &observed),
            status: aggregate_status(&backends),
            backends,
            created_at,
            updated_at: Utc::now(),
        }))
    }
}

/// Release `lock`; an error already in `result` wins over a failed release
async fn release_lock<T>(lock: StateLock, result: Result<T>) -> Result<T> {
    match (lock.release().await, result) {
        (Ok(()), result) => result,
        (Err(e), Ok(value)) => {
            tracing::warn!("Failed to release state lock: {}", e);
            Err(e)
        }
        (Err(e), Err(original)) => {
            tracing::warn!("Failed to release state lock: {}", e);
            Err(original)
        }
    }
}

/// Pick each member's backend, preferring the declared port
fn observe_members(
    directory: &BackendDirectory,
    members: &[Member],
    statuses: &crate::provider::StatusTable,
) -> Vec<ObservedBackend> {
    members
        .iter()
        .filter_map(|m| {
            directory
                .find(&m.id, m.port)
                .or_else(|| directory.for_resource(&m.id).first())
        })
        .map(|record| observe(record, statuses))
        .collect()
}

fn aggregate_status(backends: &[ObservedBackend]) -> String {
    backends
        .iter()
        .find(|b| b.status != NORMAL_RUNNING)
        .map(|b| b.status.clone())
        .unwrap_or_else(|| NORMAL_RUNNING.to_string())
}
