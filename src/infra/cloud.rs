//! In-memory cloud provider.
//!
//! Tracks identities, secrets, storage and compute in maps so tests and local
//! runs can observe exactly what provisioning created or left behind. Any step
//! can be made to fail with [`InMemoryCloudProvider::fail_on`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::error::{ControlPlaneError, Result};
use crate::core::orchestrator::{CloudProvider, ComputeHandle, ComputeSpec, ResourceConfig};

/// Provisioning step, for failure injection and call logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudStep {
    /// `create_identity`.
    CreateIdentity,
    /// `grant_secret_access`.
    GrantSecretAccess,
    /// `grant_registry_access`.
    GrantRegistryAccess,
    /// `store_secret`.
    StoreSecret,
    /// `delete_secret`.
    DeleteSecret,
    /// `create_storage`.
    CreateStorage,
    /// `write_config`.
    WriteConfig,
    /// `create_compute`.
    CreateCompute,
    /// `delete_compute`.
    DeleteCompute,
    /// `delete_storage`.
    DeleteStorage,
    /// `delete_identity`.
    DeleteIdentity,
}

impl fmt::Display for CloudStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateIdentity => "create_identity",
            Self::GrantSecretAccess => "grant_secret_access",
            Self::GrantRegistryAccess => "grant_registry_access",
            Self::StoreSecret => "store_secret",
            Self::DeleteSecret => "delete_secret",
            Self::CreateStorage => "create_storage",
            Self::WriteConfig => "write_config",
            Self::CreateCompute => "create_compute",
            Self::DeleteCompute => "delete_compute",
            Self::DeleteStorage => "delete_storage",
            Self::DeleteIdentity => "delete_identity",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct CloudState {
    identities: HashMap<String, String>,
    grants: HashSet<(String, &'static str)>,
    secrets: HashMap<String, String>,
    storages: HashMap<String, String>,
    configs: HashMap<String, ResourceConfig>,
    computes: HashMap<String, ComputeSpec>,
    failing: HashSet<CloudStep>,
    calls: Vec<CloudStep>,
}

/// Cloud provider backed by in-process maps.
pub struct InMemoryCloudProvider {
    state: Mutex<CloudState>,
    endpoint_base: String,
    latency: Duration,
}

impl Default for InMemoryCloudProvider {
    fn default() -> Self {
        Self::new("http://resource.local")
    }
}

impl InMemoryCloudProvider {
    /// Provider handing out endpoints under `endpoint_base`.
    pub fn new(endpoint_base: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(CloudState::default()),
            endpoint_base: endpoint_base.into(),
            latency: Duration::ZERO,
        }
    }

    /// Delay every call by `latency` before it takes effect.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make `step` fail with a transient error until [`recover`](Self::recover).
    pub fn fail_on(&self, step: CloudStep) {
        self.state.lock().failing.insert(step);
    }

    /// Stop failing `step`.
    pub fn recover(&self, step: CloudStep) {
        self.state.lock().failing.remove(&step);
    }

    /// Steps attempted so far, in order.
    pub fn calls(&self) -> Vec<CloudStep> {
        self.state.lock().calls.clone()
    }

    /// Live compute resources.
    pub fn compute_count(&self) -> usize {
        self.state.lock().computes.len()
    }

    /// Live storages.
    pub fn storage_count(&self) -> usize {
        self.state.lock().storages.len()
    }

    /// Live identities.
    pub fn identity_count(&self) -> usize {
        self.state.lock().identities.len()
    }

    /// Stored secret value by name.
    pub fn secret(&self, name: &str) -> Option<String> {
        self.state.lock().secrets.get(name).cloned()
    }

    /// Last configuration written to `storage_id`.
    pub fn config(&self, storage_id: &str) -> Option<ResourceConfig> {
        self.state.lock().configs.get(storage_id).cloned()
    }

    async fn settle(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn enter(&self, step: CloudStep) -> Result<parking_lot::MutexGuard<'_, CloudState>> {
        let mut state = self.state.lock();
        state.calls.push(step);
        if state.failing.contains(&step) {
            return Err(ControlPlaneError::TransientInfra(format!(
                "{step} failed"
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl CloudProvider for InMemoryCloudProvider {
    async fn create_identity(&self, tenant_id: &str) -> Result<String> {
        self.settle().await;
        let mut state = self.enter(CloudStep::CreateIdentity)?;
        let id = state
            .identities
            .entry(tenant_id.to_string())
            .or_insert_with(|| format!("identity-{tenant_id}"))
            .clone();
        Ok(id)
    }

    async fn grant_secret_access(&self, identity_id: &str) -> Result<()> {
        self.settle().await;
        let mut state = self.enter(CloudStep::GrantSecretAccess)?;
        state.grants.insert((identity_id.to_string(), "secrets"));
        Ok(())
    }

    async fn grant_registry_access(&self, identity_id: &str) -> Result<()> {
        self.settle().await;
        let mut state = self.enter(CloudStep::GrantRegistryAccess)?;
        state.grants.insert((identity_id.to_string(), "registry"));
        Ok(())
    }

    async fn store_secret(&self, name: &str, value: &str) -> Result<()> {
        self.settle().await;
        let mut state = self.enter(CloudStep::StoreSecret)?;
        state.secrets.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        self.settle().await;
        let mut state = self.enter(CloudStep::DeleteSecret)?;
        state.secrets.remove(name);
        Ok(())
    }

    async fn create_storage(&self, tenant_id: &str) -> Result<String> {
        self.settle().await;
        let mut state = self.enter(CloudStep::CreateStorage)?;
        let id = format!("storage-{tenant_id}");
        state.storages.insert(id.clone(), tenant_id.to_string());
        Ok(id)
    }

    async fn write_config(&self, storage_id: &str, config: &ResourceConfig) -> Result<()> {
        self.settle().await;
        let mut state = self.enter(CloudStep::WriteConfig)?;
        if !state.storages.contains_key(storage_id) {
            return Err(ControlPlaneError::NotFound(format!("storage `{storage_id}`")));
        }
        state.configs.insert(storage_id.to_string(), config.clone());
        Ok(())
    }

    async fn create_compute(&self, spec: &ComputeSpec) -> Result<ComputeHandle> {
        self.settle().await;
        let mut state = self.enter(CloudStep::CreateCompute)?;
        let resource_id = format!("compute-{}", spec.tenant_id);
        state.computes.insert(resource_id.clone(), spec.clone());
        Ok(ComputeHandle {
            endpoint: format!("{}/{}", self.endpoint_base, spec.tenant_id),
            resource_id,
        })
    }

    async fn delete_compute(&self, resource_id: &str) -> Result<()> {
        self.settle().await;
        let mut state = self.enter(CloudStep::DeleteCompute)?;
        state.computes.remove(resource_id);
        Ok(())
    }

    async fn delete_storage(&self, storage_id: &str) -> Result<()> {
        self.settle().await;
        let mut state = self.enter(CloudStep::DeleteStorage)?;
        state.storages.remove(storage_id);
        state.configs.remove(storage_id);
        Ok(())
    }

    async fn delete_identity(&self, identity_id: &str) -> Result<()> {
        self.settle().await;
        let mut state = self.enter(CloudStep::DeleteIdentity)?;
        state.identities.retain(|_, id| id != identity_id);
        state.grants.retain(|(id, _)| id != identity_id);
        Ok(())
    }
}
