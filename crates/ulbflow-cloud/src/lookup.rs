//! Backend directory lookup
//!
//! Resolves member ids to backend ids by reading the listener's live backend
//! set. A member that does not resolve is treated as already absent: earlier
//! partial failures or manual changes may have removed it, and the caller
//! decides what "absent" means.

use crate::error::{CloudError, Result};
use crate::model::{BackendRecord, ListenerRef, Policy};
use crate::provider::LoadBalancerApi;
use std::collections::HashMap;

/// Snapshot of a listener's backends indexed by resource id
#[derive(Debug, Clone, Default)]
pub struct BackendDirectory {
    by_resource: HashMap<String, Vec<BackendRecord>>,
    len: usize,
}

impl BackendDirectory {
    pub fn from_records(records: impl IntoIterator<Item = BackendRecord>) -> Self {
        let mut directory = Self::default();
        for record in records {
            directory
                .by_resource
                .entry(record.resource_id.clone())
                .or_default()
                .push(record);
            directory.len += 1;
        }
        directory
    }

    /// The backend attaching `resource_id` on `port`
    pub fn find(&self, resource_id: &str, port: u16) -> Option<&BackendRecord> {
        self.by_resource
            .get(resource_id)?
            .iter()
            .find(|r| r.port == port)
    }

    /// All backends of one resource, any port
    pub fn for_resource(&self, resource_id: &str) -> &[BackendRecord] {
        self.by_resource
            .get(resource_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Backend ids for the given members on `port`, skipping unmatched ids
    pub fn resolve(&self, member_ids: &[String], port: u16) -> Vec<String> {
        member_ids
            .iter()
            .filter_map(|id| self.find(id, port))
            .map(|r| r.backend_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Read the listener once and index its backends
pub async fn backend_directory<A>(api: &A, listener: &ListenerRef) -> Result<BackendDirectory>
where
    A: LoadBalancerApi + ?Sized,
{
    let current = api
        .describe_listener(listener)
        .await
        .map_err(|e| CloudError::remote("DescribeVServer", listener.to_string(), e))?;

    tracing::debug!(
        "Listener {} has {} backend(s)",
        listener,
        current.backend_set.len()
    );
    Ok(BackendDirectory::from_records(current.backend_set))
}

/// Backend ids of `member_ids` attached on `port`
///
/// Never fails for a missing member, only when the listener itself is gone.
pub async fn resolve_backend_ids<A>(
    api: &A,
    listener: &ListenerRef,
    member_ids: &[String],
    port: u16,
) -> Result<Vec<String>>
where
    A: LoadBalancerApi + ?Sized,
{
    let directory = backend_directory(api, listener).await?;
    let ids = directory.resolve(member_ids, port);
    if ids.len() < member_ids.len() {
        tracing::debug!(
            "{} of {} member(s) not attached to {} on port {}",
            member_ids.len() - ids.len(),
            member_ids.len(),
            listener,
            port
        );
    }
    Ok(ids)
}

/// A single backend of the listener by backend id
pub async fn describe_backend<A>(
    api: &A,
    listener: &ListenerRef,
    backend_id: &str,
) -> Result<BackendRecord>
where
    A: LoadBalancerApi + ?Sized,
{
    let current = api
        .describe_listener(listener)
        .await
        .map_err(|e| CloudError::remote("DescribeVServer", listener.to_string(), e))?;

    current
        .backend_set
        .into_iter()
        .find(|b| b.backend_id == backend_id)
        .ok_or_else(|| CloudError::not_found("backend", backend_id))
}

/// A forwarding policy of the listener by policy id
pub async fn describe_policy<A>(api: &A, listener: &ListenerRef, policy_id: &str) -> Result<Policy>
where
    A: LoadBalancerApi + ?Sized,
{
    let current = api
        .describe_listener(listener)
        .await
        .map_err(|e| CloudError::remote("DescribeVServer", listener.to_string(), e))?;

    current
        .policy_set
        .into_iter()
        .find(|p| p.policy_id == policy_id)
        .ok_or_else(|| CloudError::not_found("policy", policy_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeLoadBalancer;

    fn listener() -> ListenerRef {
        ListenerRef::new("ulb-1", "vserver-1")
    }

    #[tokio::test]
    async fn test_resolve_skips_missing_members() {
        let api = FakeLoadBalancer::new().with_listener(&listener());
        let b1 = api.seed_backend(&listener(), "uhost-1", 80, "0");
        api.seed_backend(&listener(), "uhost-2", 8080, "0");

        let ids = resolve_backend_ids(
            &api,
            &listener(),
            &["uhost-1".to_string(), "uhost-2".to_string(), "uhost-9".to_string()],
            80,
        )
        .await
        .unwrap();

        // uhost-2 is attached on another port, uhost-9 not at all
        assert_eq!(ids, vec![b1]);
    }

    #[tokio::test]
    async fn test_resolve_fails_only_for_missing_listener() {
        let api = FakeLoadBalancer::new();

        let err = resolve_backend_ids(&api, &listener(), &["uhost-1".to_string()], 80)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "listener not found: vserver-1");
    }

    #[tokio::test]
    async fn test_directory_indexes_by_resource() {
        let api = FakeLoadBalancer::new().with_listener(&listener());
        api.seed_backend(&listener(), "uhost-1", 80, "0");
        api.seed_backend(&listener(), "uhost-1", 443, "1");

        let directory = backend_directory(&api, &listener()).await.unwrap();

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.for_resource("uhost-1").len(), 2);
        assert_eq!(directory.find("uhost-1", 443).unwrap().status, "1");
        assert!(directory.find("uhost-1", 8080).is_none());
        assert!(directory.for_resource("uhost-2").is_empty());
    }

    #[tokio::test]
    async fn test_describe_backend_and_policy() {
        let api = FakeLoadBalancer::new()
            .with_listener(&listener())
            .with_policy(
                &listener(),
                Policy {
                    policy_id: "policy-1".to_string(),
                    policy_type: "Custom".to_string(),
                    match_expr: "api.example.com".to_string(),
                    backend_ids: vec![],
                },
            );
        let b1 = api.seed_backend(&listener(), "uhost-1", 80, "0");

        let backend = describe_backend(&api, &listener(), &b1).await.unwrap();
        assert_eq!(backend.resource_id, "uhost-1");

        let err = describe_backend(&api, &listener(), "backend-404").await.unwrap_err();
        assert_eq!(err.to_string(), "backend not found: backend-404");

        let policy = describe_policy(&api, &listener(), "policy-1").await.unwrap();
        assert_eq!(policy.match_expr, "api.example.com");
        assert!(describe_policy(&api, &listener(), "policy-2").await.unwrap_err().is_not_found());
    }
}
