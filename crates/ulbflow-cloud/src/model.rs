//! Members, listeners and backend records

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A declared backend candidate
///
/// `id` is the diff key; `(id, port)` identifies the attachment on the
/// listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub port: u16,
    pub enabled: bool,
}

impl Member {
    pub fn new(id: impl Into<String>, port: u16, enabled: bool) -> Self {
        Self {
            id: id.into(),
            port,
            enabled,
        }
    }

    /// Attachment key (`id:port`), the same key the poller indexes by
    pub fn attachment_key(&self) -> String {
        attachment_key(&self.id, self.port)
    }
}

pub(crate) fn attachment_key(resource_id: &str, port: u16) -> String {
    format!("{}:{}", resource_id, port)
}

/// Set of members declared against one listener
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentSet {
    members: Vec<Member>,
}

impl AttachmentSet {
    /// Build a declared set, rejecting empty input, port 0 and duplicate ids
    pub fn new(members: Vec<Member>) -> Result<Self> {
        if members.is_empty() {
            return Err(CloudError::InvalidConfig(
                "an attachment needs at least one backend server".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for member in &members {
            if member.port == 0 {
                return Err(CloudError::InvalidConfig(format!(
                    "server {} has port 0, expected 1-65535",
                    member.id
                )));
            }
            if !seen.insert(member.id.as_str()) {
                return Err(CloudError::InvalidConfig(format!(
                    "server {} is declared more than once",
                    member.id
                )));
            }
        }

        Ok(Self { members })
    }

    /// The set used when nothing has been applied yet
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Load balancer id + listener (VServer) id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerRef {
    pub lb_id: String,
    pub listener_id: String,
}

impl ListenerRef {
    pub fn new(lb_id: impl Into<String>, listener_id: impl Into<String>) -> Self {
        Self {
            lb_id: lb_id.into(),
            listener_id: listener_id.into(),
        }
    }
}

impl fmt::Display for ListenerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.lb_id, self.listener_id)
    }
}

/// A backend as the control plane reports it
///
/// `status` is the raw vendor status code; map it through a
/// [`StatusTable`](crate::StatusTable) before comparing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRecord {
    pub backend_id: String,
    pub resource_id: String,
    pub resource_type: String,
    pub port: u16,
    pub private_ip: String,
    pub enabled: bool,
    pub status: String,
}

impl BackendRecord {
    pub fn attachment_key(&self) -> String {
        attachment_key(&self.resource_id, self.port)
    }
}

/// Forwarding policy attached to a listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub policy_type: String,
    pub match_expr: String,
    pub backend_ids: Vec<String>,
}

/// Live listener state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub listener_id: String,
    pub backend_set: Vec<BackendRecord>,
    pub policy_set: Vec<Policy>,
}

/// Address entry of a host instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpEntry {
    /// `Private`, `International`, `BGP`, ...
    pub ip_type: String,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub ip_set: Vec<IpEntry>,
}

impl Instance {
    /// First address on the private network, if any
    pub fn private_ip(&self) -> Option<&str> {
        self.ip_set
            .iter()
            .find(|entry| entry.ip_type == "Private" && !entry.ip.is_empty())
            .map(|entry| entry.ip.as_str())
    }
}

/// One line item of a batch allocation
///
/// Rendered as `id|resourceType|port|enabled|privateIp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendLine {
    pub resource_id: String,
    pub resource_type: String,
    pub port: u16,
    pub enabled: bool,
    pub private_ip: String,
}

impl fmt::Display for BackendLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.resource_id,
            self.resource_type,
            self.port,
            u8::from(self.enabled),
            self.private_ip
        )
    }
}

/// Attribute change for an existing backend; `None` leaves a field as is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendUpdate {
    pub port: Option<u16>,
    pub enabled: Option<bool>,
}

impl BackendUpdate {
    pub fn between(before: &Member, after: &Member) -> Self {
        Self {
            port: (before.port != after.port).then_some(after.port),
            enabled: (before.enabled != after.enabled).then_some(after.enabled),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.port.is_none() && self.enabled.is_none()
    }
}

/// Attributes read back from the control plane for one attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedBackend {
    pub backend_id: String,
    pub resource_id: String,
    pub resource_type: String,
    pub port: u16,
    pub private_ip: String,
    pub enabled: bool,
    /// Domain-level status, e.g. `normalRunning`
    pub status: String,
}
