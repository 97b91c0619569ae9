//! UCloud response bodies

use serde::Deserialize;
use ulbflow_cloud::{BackendRecord, Instance, IpEntry, Listener, Policy};

#[derive(Debug, Deserialize)]
pub struct DescribeVServerResponse {
    #[serde(rename = "DataSet", default)]
    pub data_set: Vec<VServerSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VServerSet {
    #[serde(rename = "VServerId")]
    pub vserver_id: String,
    pub backend_set: Vec<BackendSet>,
    pub policy_set: Vec<PolicySet>,
}

impl From<VServerSet> for Listener {
    fn from(set: VServerSet) -> Self {
        Listener {
            listener_id: set.vserver_id,
            backend_set: set.backend_set.into_iter().map(Into::into).collect(),
            policy_set: set.policy_set.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BackendSet {
    pub backend_id: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(rename = "PrivateIP")]
    pub private_ip: String,
    pub port: u16,
    pub enabled: i64,
    pub status: i64,
}

impl From<BackendSet> for BackendRecord {
    fn from(set: BackendSet) -> Self {
        BackendRecord {
            backend_id: set.backend_id,
            resource_id: set.resource_id,
            resource_type: set.resource_type,
            port: set.port,
            private_ip: set.private_ip,
            enabled: set.enabled == 1,
            status: set.status.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PolicySet {
    pub policy_id: String,
    #[serde(rename = "Type")]
    pub policy_type: String,
    #[serde(rename = "Match")]
    pub match_expr: String,
    pub backend_set: Vec<PolicyBackendSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PolicyBackendSet {
    pub backend_id: String,
}

impl From<PolicySet> for Policy {
    fn from(set: PolicySet) -> Self {
        Policy {
            policy_id: set.policy_id,
            policy_type: set.policy_type,
            match_expr: set.match_expr,
            backend_ids: set.backend_set.into_iter().map(|b| b.backend_id).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DescribeUHostInstanceResponse {
    #[serde(rename = "UHostSet", default)]
    pub uhost_set: Vec<UHostSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UHostSet {
    #[serde(rename = "UHostId")]
    pub uhost_id: String,
    #[serde(rename = "IPSet")]
    pub ip_set: Vec<IpSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IpSet {
    #[serde(rename = "Type")]
    pub ip_type: String,
    #[serde(rename = "IP")]
    pub ip: String,
}

impl From<UHostSet> for Instance {
    fn from(set: UHostSet) -> Self {
        Instance {
            id: set.uhost_id,
            ip_set: set
                .ip_set
                .into_iter()
                .map(|s| IpEntry {
                    ip_type: s.ip_type,
                    ip: s.ip,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AllocateBackendBatchResponse {
    #[serde(rename = "BackendSet", default)]
    pub backend_set: Vec<AllocatedBackend>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AllocatedBackend {
    pub backend_id: String,
    pub resource_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AllocateBackendResponse {
    #[serde(rename = "BackendId")]
    pub backend_id: String,
}

/// Reply of actions that only report success
#[derive(Debug, Deserialize)]
pub struct EmptyResponse {}

#[derive(Debug, Deserialize)]
pub struct DescribeULBResponse {
    #[serde(rename = "DataSet", default)]
    pub data_set: Vec<ULBSet>,
}

/// Load balancer summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ULBSet {
    #[serde(rename = "ULBId")]
    pub ulb_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ULBType")]
    pub ulb_type: String,
    #[serde(rename = "VPCId")]
    pub vpc_id: String,
    #[serde(rename = "PrivateIP")]
    pub private_ip: String,
}

#[derive(Debug, Deserialize)]
pub struct DescribeUDBInstanceResponse {
    #[serde(rename = "DataSet", default)]
    pub data_set: Vec<UDBSet>,
}

/// Database instance summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UDBSet {
    #[serde(rename = "DBId")]
    pub db_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "DBTypeId")]
    pub db_type_id: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "VirtualIP")]
    pub virtual_ip: String,
    #[serde(rename = "Port")]
    pub port: u16,
}
