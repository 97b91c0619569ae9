//! Batch mutator: turns a diff into control-plane calls
//!
//! Removals run first, then in-place updates, then allocations. The first
//! failing item stops the apply; nothing is rolled back. Retrying means
//! diffing again against what the control plane now reports.

use crate::action::{ActionKind, ApplyReport};
use crate::diff::DiffResult;
use crate::error::{CloudError, Result};
use crate::lookup::{BackendDirectory, backend_directory};
use crate::model::{BackendLine, BackendUpdate, ListenerRef, Member};
use crate::provider::LoadBalancerApi;
use std::time::Instant;
use ulbflow_config::{AllocationMode, ReconcileSettings};

/// Line items per `AllocateBackendBatch` call
pub const MAX_BATCH_SIZE: usize = 20;

/// UCloud resource type of a cloud host
pub const RESOURCE_TYPE_UHOST: &str = "UHost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutatorOptions {
    /// Vendor resource type written into allocation requests
    pub resource_type: String,
    pub allocation: AllocationMode,
}

impl Default for MutatorOptions {
    fn default() -> Self {
        Self {
            resource_type: RESOURCE_TYPE_UHOST.to_string(),
            allocation: AllocationMode::Batch,
        }
    }
}

impl From<&ReconcileSettings> for MutatorOptions {
    fn from(settings: &ReconcileSettings) -> Self {
        Self {
            allocation: settings.allocation,
            ..Default::default()
        }
    }
}

/// Apply `diff` to `listener`.
///
/// If a step fails after others already went through, the error is a
/// [`CloudError::PartialFailure`] listing what was done.
pub async fn apply<A>(
    api: &A,
    listener: &ListenerRef,
    diff: &DiffResult,
    options: &MutatorOptions,
) -> Result<ApplyReport>
where
    A: LoadBalancerApi + ?Sized,
{
    let start = Instant::now();
    let mut report = ApplyReport::new();

    if diff.is_empty() {
        tracing::debug!("No backend changes for {}", listener);
        return Ok(report);
    }

    tracing::info!(
        "Applying {} backend change(s) to {}",
        diff.change_count(),
        listener
    );

    match run(api, listener, diff, options, &mut report).await {
        Ok(()) => {
            report.duration_ms = start.elapsed().as_millis() as u64;
            Ok(report)
        }
        Err(e) if report.is_empty() => Err(e),
        Err(e) => Err(CloudError::PartialFailure {
            completed: report.completed(),
            source: Box::new(e),
        }),
    }
}

async fn run<A>(
    api: &A,
    listener: &ListenerRef,
    diff: &DiffResult,
    options: &MutatorOptions,
    report: &mut ApplyReport,
) -> Result<()>
where
    A: LoadBalancerApi + ?Sized,
{
    let directory = if diff.removed.is_empty() && diff.changed.is_empty() {
        BackendDirectory::default()
    } else {
        backend_directory(api, listener).await?
    };

    let mut updates = Vec::new();
    let mut additions: Vec<Member> = Vec::new();
    for change in &diff.changed {
        match directory.find(&change.before.id, change.before.port) {
            Some(record) => updates.push((record, change)),
            None => {
                tracing::warn!(
                    "Backend {}:{} is gone from {}, allocating it again",
                    change.before.id,
                    change.before.port,
                    listener
                );
                additions.push(change.after.clone());
            }
        }
    }
    additions.extend(diff.added.iter().cloned());

    // A missing private address must fail before anything is mutated
    let lines = if additions.is_empty() {
        Vec::new()
    } else {
        backend_lines(api, &additions, &options.resource_type).await?
    };

    release(api, listener, &directory, &diff.removed, report).await?;

    for (record, change) in updates {
        let update = BackendUpdate::between(&change.before, &change.after);
        api.update_backend_attribute(&listener.lb_id, &record.backend_id, &update)
            .await
            .map_err(|e| CloudError::remote("UpdateBackendAttribute", &record.backend_id, e))?;

        tracing::info!(
            "Updated backend {} ({}) to port {} enabled {}",
            record.backend_id,
            change.after.id,
            change.after.port,
            change.after.enabled
        );
        report.record(
            ActionKind::Update,
            vec![change.after.attachment_key()],
            vec![record.backend_id.clone()],
        );
    }

    if !lines.is_empty() {
        allocate(api, listener, &lines, options, report).await?;
    }

    Ok(())
}

/// Release the backends of `members`, resolving them first.
///
/// Returns the released backend ids. Members that no longer resolve are
/// skipped.
pub async fn release_members<A>(
    api: &A,
    listener: &ListenerRef,
    members: &[Member],
) -> Result<Vec<String>>
where
    A: LoadBalancerApi + ?Sized,
{
    let directory = backend_directory(api, listener).await?;
    let mut report = ApplyReport::new();
    release(api, listener, &directory, members, &mut report).await?;
    Ok(report.backend_ids(ActionKind::Release))
}

async fn release<A>(
    api: &A,
    listener: &ListenerRef,
    directory: &BackendDirectory,
    members: &[Member],
    report: &mut ApplyReport,
) -> Result<()>
where
    A: LoadBalancerApi + ?Sized,
{
    for member in members {
        let Some(record) = directory.find(&member.id, member.port) else {
            tracing::debug!(
                "Backend {} is not attached to {}, nothing to release",
                member.attachment_key(),
                listener
            );
            continue;
        };

        match api.release_backend(&listener.lb_id, &record.backend_id).await {
            Ok(()) => {
                tracing::info!("Released backend {} ({})", record.backend_id, member.id);
                report.record(
                    ActionKind::Release,
                    vec![member.attachment_key()],
                    vec![record.backend_id.clone()],
                );
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("Backend {} already released", record.backend_id);
            }
            Err(e) => return Err(CloudError::remote("ReleaseBackend", &record.backend_id, e)),
        }
    }
    Ok(())
}

async fn allocate<A>(
    api: &A,
    listener: &ListenerRef,
    lines: &[BackendLine],
    options: &MutatorOptions,
    report: &mut ApplyReport,
) -> Result<()>
where
    A: LoadBalancerApi + ?Sized,
{
    match options.allocation {
        AllocationMode::Batch => {
            for chunk in lines.chunks(MAX_BATCH_SIZE) {
                let target = chunk
                    .iter()
                    .map(|l| l.resource_id.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                let ids = api
                    .allocate_backend_batch(listener, chunk)
                    .await
                    .map_err(|e| CloudError::remote("AllocateBackendBatch", &target, e))?;

                tracing::info!("Allocated {} backend(s) on {}", ids.len(), listener);
                report.record(
                    ActionKind::Allocate,
                    chunk.iter().map(|l| l.resource_id.clone()).collect(),
                    ids,
                );
            }
        }
        AllocationMode::PerMember => {
            for line in lines {
                let id = api
                    .allocate_backend(
                        listener,
                        &line.resource_type,
                        &line.resource_id,
                        line.port,
                        line.enabled,
                    )
                    .await
                    .map_err(|e| CloudError::remote("AllocateBackend", &line.resource_id, e))?;

                tracing::info!("Allocated backend {} ({})", id, line.resource_id);
                report.record(ActionKind::Allocate, vec![line.resource_id.clone()], vec![id]);
            }
        }
    }

    Ok(())
}

/// Resolve private addresses and build allocation line items
async fn backend_lines<A>(api: &A, members: &[Member], resource_type: &str) -> Result<Vec<BackendLine>>
where
    A: LoadBalancerApi + ?Sized,
{
    let ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
    let instances = api
        .describe_instances(&ids)
        .await
        .map_err(|e| CloudError::remote("DescribeUHostInstance", ids.join(","), e))?;

    members
        .iter()
        .map(|member| {
            let private_ip = instances
                .iter()
                .find(|i| i.id == member.id)
                .and_then(|i| i.private_ip())
                .ok_or_else(|| CloudError::MissingAddress {
                    id: member.id.clone(),
                })?;

            Ok(BackendLine {
                resource_id: member.id.clone(),
                resource_type: resource_type.to_string(),
                port: member.port,
                enabled: member.enabled,
                private_ip: private_ip.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::fake::FakeLoadBalancer;
    use crate::model::AttachmentSet;

    fn listener() -> ListenerRef {
        ListenerRef::new("ulb-1", "vserver-1")
    }

    fn set(members: &[(&str, u16, bool)]) -> AttachmentSet {
        AttachmentSet::new(
            members
                .iter()
                .map(|(id, port, enabled)| Member::new(*id, *port, *enabled))
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_additions_use_one_batch_call() {
        let api = FakeLoadBalancer::new()
            .with_listener(&listener())
            .with_host("uhost-1", "10.9.0.1")
            .with_host("uhost-2", "10.9.0.2");
        let new = set(&[("uhost-1", 80, true), ("uhost-2", 80, false)]);

        let report = apply(&api, &listener(), &diff(&AttachmentSet::empty(), &new), &MutatorOptions::default())
            .await
            .unwrap();

        assert_eq!(report.allocated().len(), 2);
        assert_eq!(api.count_calls("AllocateBackendBatch"), 1);
        assert_eq!(api.count_calls("DescribeVServer"), 0);

        let backends = api.backends(&listener());
        assert_eq!(backends[0].private_ip, "10.9.0.1");
        assert!(!backends[1].enabled);
    }

    #[tokio::test]
    async fn test_batches_are_chunked() {
        let mut api = FakeLoadBalancer::new().with_listener(&listener());
        let mut members = Vec::new();
        for i in 0..45 {
            let id = format!("uhost-{}", i);
            api = api.with_host(&id, &format!("10.9.0.{}", i));
            members.push(Member::new(id, 80, true));
        }
        let new = AttachmentSet::new(members).unwrap();

        let report = apply(&api, &listener(), &diff(&AttachmentSet::empty(), &new), &MutatorOptions::default())
            .await
            .unwrap();

        assert_eq!(report.allocated().len(), 45);
        assert_eq!(api.count_calls("AllocateBackendBatch"), 3);
    }

    #[tokio::test]
    async fn test_per_member_allocation() {
        let api = FakeLoadBalancer::new()
            .with_listener(&listener())
            .with_host("uhost-1", "10.9.0.1")
            .with_host("uhost-2", "10.9.0.2");
        let options = MutatorOptions {
            allocation: AllocationMode::PerMember,
            ..Default::default()
        };
        let new = set(&[("uhost-1", 80, true), ("uhost-2", 80, true)]);

        let report = apply(&api, &listener(), &diff(&AttachmentSet::empty(), &new), &options)
            .await
            .unwrap();

        assert_eq!(report.allocated().len(), 2);
        assert_eq!(api.count_calls("AllocateBackend"), 2);
        assert_eq!(api.count_calls("AllocateBackendBatch"), 0);
    }

    #[tokio::test]
    async fn test_missing_private_address() {
        let api = FakeLoadBalancer::new()
            .with_listener(&listener())
            .with_public_only_host("uhost-1");
        let new = set(&[("uhost-1", 80, true)]);

        let err = apply(&api, &listener(), &diff(&AttachmentSet::empty(), &new), &MutatorOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::MissingAddress { ref id } if id == "uhost-1"));
        assert_eq!(api.count_calls("AllocateBackendBatch"), 0);
    }

    #[tokio::test]
    async fn test_unknown_host_has_no_address() {
        let api = FakeLoadBalancer::new().with_listener(&listener());
        let new = set(&[("uhost-404", 80, true)]);

        let err = apply(&api, &listener(), &diff(&AttachmentSet::empty(), &new), &MutatorOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::MissingAddress { .. }));
    }

    #[tokio::test]
    async fn test_change_updates_in_place() {
        let api = FakeLoadBalancer::new().with_listener(&listener());
        let backend_id = api.seed_backend(&listener(), "uhost-1", 80, "0");

        let old = set(&[("uhost-1", 80, true)]);
        let new = set(&[("uhost-1", 8080, true)]);
        let report = apply(&api, &listener(), &diff(&old, &new), &MutatorOptions::default())
            .await
            .unwrap();

        assert_eq!(report.backend_ids(ActionKind::Update), vec![backend_id.clone()]);
        assert_eq!(api.count_calls("ReleaseBackend"), 0);
        assert_eq!(api.count_calls("UpdateBackendAttribute"), 1);

        let backends = api.backends(&listener());
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].backend_id, backend_id);
        assert_eq!(backends[0].port, 8080);
    }

    #[tokio::test]
    async fn test_changed_member_missing_remotely_is_reallocated() {
        let api = FakeLoadBalancer::new()
            .with_listener(&listener())
            .with_host("uhost-1", "10.9.0.1");

        let old = set(&[("uhost-1", 80, true)]);
        let new = set(&[("uhost-1", 8080, true)]);
        let report = apply(&api, &listener(), &diff(&old, &new), &MutatorOptions::default())
            .await
            .unwrap();

        assert_eq!(report.allocated().len(), 1);
        assert_eq!(api.count_calls("UpdateBackendAttribute"), 0);
        assert_eq!(api.backends(&listener())[0].port, 8080);
    }

    #[tokio::test]
    async fn test_removal_of_absent_member_is_noop() {
        let api = FakeLoadBalancer::new().with_listener(&listener());
        api.seed_backend(&listener(), "uhost-2", 80, "0");

        let old = set(&[("uhost-1", 80, true), ("uhost-2", 80, true)]);
        let new = set(&[("uhost-2", 80, true)]);
        let report = apply(&api, &listener(), &diff(&old, &new), &MutatorOptions::default())
            .await
            .unwrap();

        assert!(report.is_empty());
        assert_eq!(api.count_calls("ReleaseBackend"), 0);
        assert_eq!(api.backends(&listener()).len(), 1);
    }

    #[tokio::test]
    async fn test_release_of_vanished_backend_succeeds() {
        let api = FakeLoadBalancer::new().with_listener(&listener());
        let b1 = api.seed_backend(&listener(), "uhost-1", 80, "0");
        api.seed_backend(&listener(), "uhost-2", 80, "0");
        api.vanish_on("ReleaseBackend", &b1);

        let old = set(&[("uhost-1", 80, true), ("uhost-2", 80, true)]);
        let new = set(&[("uhost-2", 80, true)]);
        let report = apply(&api, &listener(), &diff(&old, &new), &MutatorOptions::default())
            .await
            .unwrap();

        assert!(report.is_empty());
        assert_eq!(api.count_calls("ReleaseBackend"), 1);
    }

    #[tokio::test]
    async fn test_missing_address_stops_before_any_mutation() {
        let api = FakeLoadBalancer::new()
            .with_listener(&listener())
            .with_public_only_host("uhost-2");
        api.seed_backend(&listener(), "uhost-1", 80, "0");

        let old = set(&[("uhost-1", 80, true)]);
        let new = set(&[("uhost-2", 80, true)]);
        let err = apply(&api, &listener(), &diff(&old, &new), &MutatorOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::MissingAddress { ref id } if id == "uhost-2"));
        assert_eq!(api.count_calls("ReleaseBackend"), 0);
        assert_eq!(api.backends(&listener()).len(), 1);
    }

    #[tokio::test]
    async fn test_removal_releases_backend() {
        let api = FakeLoadBalancer::new().with_listener(&listener());
        let b1 = api.seed_backend(&listener(), "uhost-1", 80, "0");
        api.seed_backend(&listener(), "uhost-2", 80, "0");

        let released = release_members(&api, &listener(), &[Member::new("uhost-1", 80, true)])
            .await
            .unwrap();

        assert_eq!(released, vec![b1]);
        assert_eq!(api.backends(&listener()).len(), 1);
    }

    #[tokio::test]
    async fn test_failure_after_progress_is_partial() {
        let api = FakeLoadBalancer::new()
            .with_listener(&listener())
            .with_host("uhost-3", "10.9.0.3");
        let b1 = api.seed_backend(&listener(), "uhost-1", 80, "0");
        api.fail_on("AllocateBackendBatch", "uhost-3");

        let old = set(&[("uhost-1", 80, true)]);
        let new = set(&[("uhost-3", 80, true)]);
        let err = apply(&api, &listener(), &diff(&old, &new), &MutatorOptions::default())
            .await
            .unwrap_err();

        match err {
            CloudError::PartialFailure { completed, source } => {
                assert_eq!(completed.len(), 1);
                assert!(completed[0].contains(&b1));
                assert!(source.to_string().starts_with("do AllocateBackendBatch failed for uhost-3"));
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_step_failure_is_plain_remote_error() {
        let api = FakeLoadBalancer::new().with_listener(&listener());
        let b1 = api.seed_backend(&listener(), "uhost-1", 80, "0");
        api.fail_on("ReleaseBackend", &b1);

        let old = set(&[("uhost-1", 80, true)]);
        let new = set(&[("uhost-2", 80, true)]);
        let err = apply(&api, &listener(), &diff(&old, &new), &MutatorOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::Remote { ref operation, ref target, .. }
            if operation == "ReleaseBackend" && *target == b1));
    }

    #[tokio::test]
    async fn test_empty_diff_makes_no_calls() {
        let api = FakeLoadBalancer::new().with_listener(&listener());
        let s = set(&[("uhost-1", 80, true)]);

        let report = tokio_test::assert_ok!(
            apply(&api, &listener(), &diff(&s, &s), &MutatorOptions::default()).await
        );

        assert!(report.is_empty());
        assert!(api.calls().is_empty());
    }
}
