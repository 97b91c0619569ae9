//! UCloud load balancer provider

use crate::api::{
    AllocateBackendBatchResponse, AllocateBackendResponse, DescribeULBResponse,
    DescribeUHostInstanceResponse, DescribeVServerResponse, EmptyResponse, ULBSet,
};
use crate::client::{Params, UCloudClient};
use crate::error::{Result, UCloudError};
use async_trait::async_trait;
use ulbflow_cloud::{
    BackendLine, BackendUpdate, Instance, Listener, ListenerRef, LoadBalancerApi,
};
use ulbflow_config::{Credentials, UlbflowConfig};

/// "resource not exist" on ULB actions
pub const CODE_RESOURCE_NOT_FOUND: i64 = 4103;
/// "ulb not exist" on DescribeULB
pub const CODE_ULB_NOT_FOUND: i64 = 4086;

/// UCloud provider
pub struct UCloudProvider {
    client: UCloudClient,
}

impl UCloudProvider {
    pub fn new(credentials: Credentials) -> Result<Self> {
        Ok(Self {
            client: UCloudClient::new(credentials)?,
        })
    }

    pub fn from_config(config: &UlbflowConfig) -> Result<Self> {
        Self::new(config.credentials.clone())
    }

    /// Build from the discovered configuration file and `UCLOUD_*` variables
    pub fn from_env() -> Result<Self> {
        let config = ulbflow_config::load()?;
        Self::from_config(&config)
    }

    pub fn client(&self) -> &UCloudClient {
        &self.client
    }

    /// Look up a load balancer
    pub async fn describe_load_balancer(&self, lb_id: &str) -> Result<ULBSet> {
        let resp: DescribeULBResponse = self
            .client
            .call("DescribeULB", Params::new().set("ULBId", lb_id))
            .await
            .map_err(|e| {
                not_found_on(e, &[CODE_RESOURCE_NOT_FOUND, CODE_ULB_NOT_FOUND], "lb", lb_id)
            })?;

        resp.data_set
            .into_iter()
            .next()
            .ok_or_else(|| not_found("lb", lb_id))
    }

    async fn describe_vserver(&self, listener: &ListenerRef) -> Result<Listener> {
        let params = Params::new()
            .set("ULBId", &listener.lb_id)
            .set("VServerId", &listener.listener_id);
        let resp: DescribeVServerResponse = self
            .client
            .call("DescribeVServer", params)
            .await
            .map_err(|e| {
                not_found_on(e, &[CODE_RESOURCE_NOT_FOUND], "listener", &listener.listener_id)
            })?;

        resp.data_set
            .into_iter()
            .next()
            .map(Listener::from)
            .ok_or_else(|| not_found("listener", &listener.listener_id))
    }
}

/// Map the listed API codes to `NotFound`
pub(crate) fn not_found_on(err: UCloudError, codes: &[i64], kind: &str, id: &str) -> UCloudError {
    match err {
        UCloudError::Api { code, .. } if codes.contains(&code) => not_found(kind, id),
        other => other,
    }
}

pub(crate) fn not_found(kind: &str, id: &str) -> UCloudError {
    UCloudError::NotFound {
        kind: kind.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl LoadBalancerApi for UCloudProvider {
    fn name(&self) -> &str {
        "ucloud"
    }

    async fn describe_listener(&self, listener: &ListenerRef) -> ulbflow_cloud::Result<Listener> {
        Ok(self.describe_vserver(listener).await?)
    }

    async fn describe_instances(&self, ids: &[String]) -> ulbflow_cloud::Result<Vec<Instance>> {
        let resp: DescribeUHostInstanceResponse = self
            .client
            .call(
                "DescribeUHostInstance",
                Params::new()
                    .set("Limit", ids.len())
                    .set_list("UHostIds", ids),
            )
            .await?;

        Ok(resp.uhost_set.into_iter().map(Instance::from).collect())
    }

    async fn allocate_backend_batch(
        &self,
        listener: &ListenerRef,
        lines: &[BackendLine],
    ) -> ulbflow_cloud::Result<Vec<String>> {
        let params = Params::new()
            .set("ULBId", &listener.lb_id)
            .set("VServerId", &listener.listener_id)
            .set_list("Backends", lines);
        let resp: AllocateBackendBatchResponse =
            self.client.call("AllocateBackendBatch", params).await?;

        Ok(resp.backend_set.into_iter().map(|b| b.backend_id).collect())
    }

    async fn allocate_backend(
        &self,
        listener: &ListenerRef,
        resource_type: &str,
        resource_id: &str,
        port: u16,
        enabled: bool,
    ) -> ulbflow_cloud::Result<String> {
        let params = Params::new()
            .set("ULBId", &listener.lb_id)
            .set("VServerId", &listener.listener_id)
            .set("ResourceType", resource_type)
            .set("ResourceId", resource_id)
            .set("Port", port)
            .set("Enabled", u8::from(enabled));
        let resp: AllocateBackendResponse = self.client.call("AllocateBackend", params).await?;

        Ok(resp.backend_id)
    }

    async fn release_backend(&self, lb_id: &str, backend_id: &str) -> ulbflow_cloud::Result<()> {
        let params = Params::new()
            .set("ULBId", lb_id)
            .set("BackendId", backend_id);
        self.client
            .call::<EmptyResponse>("ReleaseBackend", params)
            .await
            .map_err(|e| not_found_on(e, &[CODE_RESOURCE_NOT_FOUND], "backend", backend_id))?;
        Ok(())
    }

    async fn update_backend_attribute(
        &self,
        lb_id: &str,
        backend_id: &str,
        update: &BackendUpdate,
    ) -> ulbflow_cloud::Result<()> {
        let mut params = Params::new()
            .set("ULBId", lb_id)
            .set("BackendId", backend_id);
        if let Some(port) = update.port {
            params = params.set("Port", port);
        }
        if let Some(enabled) = update.enabled {
            params = params.set("Enabled", u8::from(enabled));
        }

        self.client
            .call::<EmptyResponse>("UpdateBackendAttribute", params)
            .await
            .map_err(|e| not_found_on(e, &[CODE_RESOURCE_NOT_FOUND], "backend", backend_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_on_listed_codes_only() {
        let api = |code| UCloudError::Api {
            code,
            message: "x".to_string(),
        };

        assert!(matches!(
            not_found_on(api(4103), &[4103, 4086], "lb", "ulb-1"),
            UCloudError::NotFound { .. }
        ));
        assert!(matches!(
            not_found_on(api(4086), &[4103], "listener", "vserver-1"),
            UCloudError::Api { code: 4086, .. }
        ));
    }
}
