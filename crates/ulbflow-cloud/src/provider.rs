//! Load balancer API abstraction

use crate::error::Result;
use crate::model::{BackendLine, BackendUpdate, Instance, Listener, ListenerRef};
use async_trait::async_trait;
use std::collections::HashMap;

/// Domain status of a backend that is ready for traffic
pub const NORMAL_RUNNING: &str = "normalRunning";
pub const EXCEPTION_RUNNING: &str = "exceptionRunning";

/// Control-plane operations the reconciler consumes
///
/// Implementations map vendor "not found" codes onto
/// [`CloudError::NotFound`](crate::CloudError::NotFound); every other failure
/// is returned as is and annotated by the caller.
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    /// Returns the provider name (e.g., "ucloud")
    fn name(&self) -> &str;

    /// Live backend and policy sets of a listener
    async fn describe_listener(&self, listener: &ListenerRef) -> Result<Listener>;

    /// Host instances with their address sets; unknown ids are omitted
    async fn describe_instances(&self, ids: &[String]) -> Result<Vec<Instance>>;

    /// Allocate several backends in one call, returning their backend ids
    async fn allocate_backend_batch(
        &self,
        listener: &ListenerRef,
        lines: &[BackendLine],
    ) -> Result<Vec<String>>;

    /// Allocate a single backend, returning its backend id
    async fn allocate_backend(
        &self,
        listener: &ListenerRef,
        resource_type: &str,
        resource_id: &str,
        port: u16,
        enabled: bool,
    ) -> Result<String>;

    async fn release_backend(&self, lb_id: &str, backend_id: &str) -> Result<()>;

    async fn update_backend_attribute(
        &self,
        lb_id: &str,
        backend_id: &str,
        update: &BackendUpdate,
    ) -> Result<()>;

    /// Mapping from raw backend status codes to domain states
    fn status_table(&self) -> StatusTable {
        StatusTable::default()
    }
}

/// Lookup table from vendor status code to domain status
///
/// Codes without an entry pass through unchanged, so an unknown code never
/// reads as `normalRunning`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTable {
    entries: HashMap<String, String>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, raw: impl Into<String>, domain: impl Into<String>) -> Self {
        self.entries.insert(raw.into(), domain.into());
        self
    }

    pub fn transform(&self, raw: &str) -> String {
        self.entries
            .get(raw)
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }

    pub fn is_running(&self, raw: &str) -> bool {
        self.transform(raw) == NORMAL_RUNNING
    }
}

impl Default for StatusTable {
    /// ULB backend codes
    fn default() -> Self {
        Self::new()
            .with("0", NORMAL_RUNNING)
            .with("1", EXCEPTION_RUNNING)
    }
}
