//! In-memory load balancer used by the unit tests

use crate::error::{CloudError, Result};
use crate::model::{
    BackendLine, BackendRecord, BackendUpdate, Instance, IpEntry, Listener, ListenerRef, Policy,
};
use crate::provider::LoadBalancerApi;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Raw status reported while a backend is still being set up
pub const STATUS_STARTING: &str = "2";

#[derive(Debug, Default)]
struct FakeState {
    listeners: HashMap<ListenerRef, FakeListener>,
    instances: HashMap<String, Instance>,
    next_backend: u32,
    /// Describe calls a fresh backend stays in `STATUS_STARTING`
    warmup_polls: u32,
    /// `(operation, target)` pairs that fail with an API error
    failures: Vec<(String, String)>,
    /// `(operation, target)` pairs that answer NotFound without side effects
    vanished: Vec<(String, String)>,
    calls: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeListener {
    backends: Vec<FakeBackend>,
    policies: Vec<Policy>,
}

#[derive(Debug)]
struct FakeBackend {
    record: BackendRecord,
    polls_left: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FakeLoadBalancer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(self, listener: &ListenerRef) -> Self {
        self.lock()
            .listeners
            .insert(listener.clone(), FakeListener::default());
        self
    }

    pub fn with_host(self, id: &str, private_ip: &str) -> Self {
        self.lock().instances.insert(
            id.to_string(),
            Instance {
                id: id.to_string(),
                ip_set: vec![IpEntry {
                    ip_type: "Private".to_string(),
                    ip: private_ip.to_string(),
                }],
            },
        );
        self
    }

    pub fn with_public_only_host(self, id: &str) -> Self {
        self.lock().instances.insert(
            id.to_string(),
            Instance {
                id: id.to_string(),
                ip_set: vec![IpEntry {
                    ip_type: "BGP".to_string(),
                    ip: "106.75.0.1".to_string(),
                }],
            },
        );
        self
    }

    pub fn with_warmup_polls(self, polls: u32) -> Self {
        self.lock().warmup_polls = polls;
        self
    }

    pub fn with_policy(self, listener: &ListenerRef, policy: Policy) -> Self {
        self.lock()
            .listeners
            .entry(listener.clone())
            .or_default()
            .policies
            .push(policy);
        self
    }

    /// Make `operation` fail when called for `target`
    pub fn fail_on(&self, operation: &str, target: &str) {
        self.lock()
            .failures
            .push((operation.to_string(), target.to_string()));
    }

    /// Make `operation` report NotFound for `target`, as if another client
    /// removed it between the describe and the call
    pub fn vanish_on(&self, operation: &str, target: &str) {
        self.lock()
            .vanished
            .push((operation.to_string(), target.to_string()));
    }

    /// Insert a backend directly, as if it was attached out of band
    pub fn seed_backend(&self, listener: &ListenerRef, resource_id: &str, port: u16, status: &str) -> String {
        let mut state = self.lock();
        state.next_backend += 1;
        let backend_id = format!("backend-{}", state.next_backend);
        let record = BackendRecord {
            backend_id: backend_id.clone(),
            resource_id: resource_id.to_string(),
            resource_type: "UHost".to_string(),
            port,
            private_ip: String::new(),
            enabled: true,
            status: status.to_string(),
        };
        state
            .listeners
            .entry(listener.clone())
            .or_default()
            .backends
            .push(FakeBackend {
                record,
                polls_left: 0,
            });
        backend_id
    }

    /// Remove a backend behind the reconciler's back
    pub fn drop_backend(&self, listener: &ListenerRef, resource_id: &str) {
        if let Some(l) = self.lock().listeners.get_mut(listener) {
            l.backends.retain(|b| b.record.resource_id != resource_id);
        }
    }

    pub fn set_status(&self, listener: &ListenerRef, resource_id: &str, status: &str) {
        if let Some(l) = self.lock().listeners.get_mut(listener) {
            for b in l.backends.iter_mut().filter(|b| b.record.resource_id == resource_id) {
                b.record.status = status.to_string();
                b.polls_left = 0;
            }
        }
    }

    pub fn backends(&self, listener: &ListenerRef) -> Vec<BackendRecord> {
        self.lock()
            .listeners
            .get(listener)
            .map(|l| l.backends.iter().map(|b| b.record.clone()).collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(operation))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

impl FakeState {
    fn record(&mut self, operation: &str, target: &str) -> Result<()> {
        self.calls.push(format!("{} {}", operation, target));
        if self
            .failures
            .iter()
            .any(|(op, t)| op == operation && t == target)
        {
            return Err(CloudError::Api {
                code: 500,
                message: format!("injected failure for {}", target),
            });
        }
        if self
            .vanished
            .iter()
            .any(|(op, t)| op == operation && t == target)
        {
            return Err(CloudError::not_found("backend", target));
        }
        Ok(())
    }

    fn listener_mut(&mut self, listener: &ListenerRef) -> Result<&mut FakeListener> {
        self.listeners
            .get_mut(listener)
            .ok_or_else(|| CloudError::not_found("listener", listener.listener_id.clone()))
    }

    fn push_backend(&mut self, listener: &ListenerRef, mut record: BackendRecord) -> Result<String> {
        self.next_backend += 1;
        let backend_id = format!("backend-{}", self.next_backend);
        record.backend_id = backend_id.clone();
        let polls_left = self.warmup_polls;
        record.status = if polls_left == 0 { "0" } else { STATUS_STARTING }.to_string();
        self.listener_mut(listener)?.backends.push(FakeBackend { record, polls_left });
        Ok(backend_id)
    }
}

#[async_trait]
impl LoadBalancerApi for FakeLoadBalancer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn describe_listener(&self, listener: &ListenerRef) -> Result<Listener> {
        let mut state = self.lock();
        state.record("DescribeVServer", &listener.listener_id)?;
        let l = state.listener_mut(listener)?;

        let snapshot = Listener {
            listener_id: listener.listener_id.clone(),
            backend_set: l.backends.iter().map(|b| b.record.clone()).collect(),
            policy_set: l.policies.clone(),
        };

        for b in l.backends.iter_mut().filter(|b| b.polls_left > 0) {
            b.polls_left -= 1;
            if b.polls_left == 0 {
                b.record.status = "0".to_string();
            }
        }

        Ok(snapshot)
    }

    async fn describe_instances(&self, ids: &[String]) -> Result<Vec<Instance>> {
        let mut state = self.lock();
        state.record("DescribeUHostInstance", &ids.join(","))?;
        Ok(ids
            .iter()
            .filter_map(|id| state.instances.get(id).cloned())
            .collect())
    }

    async fn allocate_backend_batch(
        &self,
        listener: &ListenerRef,
        lines: &[BackendLine],
    ) -> Result<Vec<String>> {
        let mut state = self.lock();
        let target = lines
            .iter()
            .map(|l| l.resource_id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        state.record("AllocateBackendBatch", &target)?;

        let mut ids = Vec::new();
        for line in lines {
            ids.push(state.push_backend(
                listener,
                BackendRecord {
                    backend_id: String::new(),
                    resource_id: line.resource_id.clone(),
                    resource_type: line.resource_type.clone(),
                    port: line.port,
                    private_ip: line.private_ip.clone(),
                    enabled: line.enabled,
                    status: String::new(),
                },
            )?);
        }
        Ok(ids)
    }

    async fn allocate_backend(
        &self,
        listener: &ListenerRef,
        resource_type: &str,
        resource_id: &str,
        port: u16,
        enabled: bool,
    ) -> Result<String> {
        let mut state = self.lock();
        state.record("AllocateBackend", resource_id)?;
        let private_ip = state
            .instances
            .get(resource_id)
            .and_then(|i| i.private_ip().map(str::to_string))
            .unwrap_or_default();
        state.push_backend(
            listener,
            BackendRecord {
                backend_id: String::new(),
                resource_id: resource_id.to_string(),
                resource_type: resource_type.to_string(),
                port,
                private_ip,
                enabled,
                status: String::new(),
            },
        )
    }

    async fn release_backend(&self, lb_id: &str, backend_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.record("ReleaseBackend", backend_id)?;

        let mut found = false;
        for (listener, l) in state.listeners.iter_mut() {
            if listener.lb_id != lb_id {
                continue;
            }
            let before = l.backends.len();
            l.backends.retain(|b| b.record.backend_id != backend_id);
            found |= l.backends.len() != before;
        }

        if found {
            Ok(())
        } else {
            Err(CloudError::not_found("backend", backend_id))
        }
    }

    async fn update_backend_attribute(
        &self,
        lb_id: &str,
        backend_id: &str,
        update: &BackendUpdate,
    ) -> Result<()> {
        let mut state = self.lock();
        state.record("UpdateBackendAttribute", backend_id)?;

        for (listener, l) in state.listeners.iter_mut() {
            if listener.lb_id != lb_id {
                continue;
            }
            if let Some(b) = l
                .backends
                .iter_mut()
                .find(|b| b.record.backend_id == backend_id)
            {
                if let Some(port) = update.port {
                    b.record.port = port;
                }
                if let Some(enabled) = update.enabled {
                    b.record.enabled = enabled;
                }
                return Ok(());
            }
        }

        Err(CloudError::not_found("backend", backend_id))
    }
}
