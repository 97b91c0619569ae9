//! Read-back of attachment attributes from the control plane

use crate::error::Result;
use crate::lookup::describe_backend;
use crate::model::{BackendRecord, ListenerRef, ObservedBackend};
use crate::provider::{LoadBalancerApi, StatusTable};

/// Observed attributes of one attachment.
///
/// A missing backend or listener yields `Ok(None)`: the attachment no longer
/// exists and the caller should plan to recreate it.
pub async fn project<A>(
    api: &A,
    listener: &ListenerRef,
    backend_id: &str,
) -> Result<Option<ObservedBackend>>
where
    A: LoadBalancerApi + ?Sized,
{
    match describe_backend(api, listener, backend_id).await {
        Ok(record) => Ok(Some(observe(&record, &api.status_table()))),
        Err(e) if e.is_not_found() => {
            tracing::warn!("Backend {} not found on {}: {}", backend_id, listener, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Convert a raw record into observed attributes with a domain status
pub fn observe(record: &BackendRecord, statuses: &StatusTable) -> ObservedBackend {
    ObservedBackend {
        backend_id: record.backend_id.clone(),
        resource_id: record.resource_id.clone(),
        resource_type: record.resource_type.clone(),
        port: record.port,
        private_ip: record.private_ip.clone(),
        enabled: record.enabled,
        status: statuses.transform(&record.status),
    }
}
