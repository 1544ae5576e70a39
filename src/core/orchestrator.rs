//! Tenant resource lifecycle.
//!
//! ```text
//! pending ──provision──> provisioning ──ok──> active ──deprovision──> deprovisioning ──ok──> deleted
//!    ^                        │                                             │
//!    └───────── failure ──────┘                                   failure ──┴──> suspended
//! ```
//!
//! Provisioning failures roll the tenant back to `pending` (retryable).
//! Deprovisioning failures park it in `suspended` for an operator; partial
//! teardown never reports success. Both re-raise the original error.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::audit::{build_audit_event, AuditSink, NoopAuditSink};
use crate::core::context::CallContext;
use crate::core::error::{ControlPlaneError, Result};
use crate::core::model::{Tenant, TenantId, TenantStatus};
use crate::core::spawn::Spawn;
use crate::core::store::{Persistence, TenantPatch};

/// Where the resource's compute, identity and storage come from.
///
/// `create_*` calls must be idempotent per tenant: creating something that
/// already exists for the tenant returns the existing handle. Retrying a
/// rolled-back provisioning relies on this.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create (or return) the isolated identity of a tenant. Returns the identity id.
    async fn create_identity(&self, tenant_id: &str) -> Result<String>;
    /// Allow the identity to read its own secrets only.
    async fn grant_secret_access(&self, identity_id: &str) -> Result<()>;
    /// Allow the identity to pull from the resource registry.
    async fn grant_registry_access(&self, identity_id: &str) -> Result<()>;
    /// Store a secret value server-side.
    async fn store_secret(&self, name: &str, value: &str) -> Result<()>;
    /// Remove a secret.
    async fn delete_secret(&self, name: &str) -> Result<()>;
    /// Create (or return) the tenant's persistent storage. Returns the storage id.
    async fn create_storage(&self, tenant_id: &str) -> Result<String>;
    /// Write configuration into the durable configuration store of `storage_id`.
    async fn write_config(&self, storage_id: &str, config: &ResourceConfig) -> Result<()>;
    /// Create (or return) the compute resource.
    async fn create_compute(&self, spec: &ComputeSpec) -> Result<ComputeHandle>;
    /// Delete the compute resource.
    async fn delete_compute(&self, resource_id: &str) -> Result<()>;
    /// Delete the storage.
    async fn delete_storage(&self, storage_id: &str) -> Result<()>;
    /// Delete the identity.
    async fn delete_identity(&self, identity_id: &str) -> Result<()>;
}

/// Inputs for creating a compute resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeSpec {
    /// Tenant the resource serves.
    pub tenant_id: TenantId,
    /// Identity the resource runs as.
    pub identity_id: String,
    /// Storage mounted into the resource.
    pub storage_id: String,
    /// Secret holding the internal gateway credential.
    pub credential_secret: String,
    /// Image to run.
    pub image: String,
    /// Port the gateway listens on.
    pub gateway_port: u16,
}

/// Handle of a created compute resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeHandle {
    /// Resource identifier.
    pub resource_id: String,
    /// Gateway base URL.
    pub endpoint: String,
}

/// Configuration document written into a resource's storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    /// Tenant served.
    pub tenant_id: TenantId,
    /// Version; the resource compares it with its applied version.
    pub version: u64,
    /// Tenant timezone.
    pub timezone: String,
    /// Gateway port.
    pub gateway_port: u16,
    /// Name of the secret holding the internal credential.
    pub credential_secret: String,
    /// Monthly token budget, if any.
    pub monthly_budget: Option<u64>,
}

impl ResourceConfig {
    /// Configuration for `tenant` at its pending version.
    pub fn generate(tenant: &Tenant, settings: &OrchestratorSettings) -> Self {
        Self {
            tenant_id: tenant.id.clone(),
            version: tenant.pending_config_version,
            timezone: tenant.timezone.clone(),
            gateway_port: settings.gateway_port,
            credential_secret: settings.credential_secret_name(&tenant.id),
            monthly_budget: tenant.monthly_budget,
        }
    }
}

/// Static provisioning parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Image run by every tenant resource.
    pub resource_image: String,
    /// Port the resource gateway listens on.
    pub gateway_port: u16,
    /// Prefix of per-tenant credential secret names.
    pub secret_prefix: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            resource_image: "registry.local/tenant-runtime:latest".into(),
            gateway_port: 8080,
            secret_prefix: "tenant-gateway-credential".into(),
        }
    }
}

impl OrchestratorSettings {
    /// Secret name holding the internal credential of `tenant_id`.
    pub fn credential_secret_name(&self, tenant_id: &str) -> String {
        format!("{}-{tenant_id}", self.secret_prefix)
    }
}

/// Freshly generated internal credential.
#[derive(Clone)]
pub struct InternalCredential {
    /// Secret value; goes to secret storage only.
    pub secret: String,
    /// SHA-256 hex of the secret; the only form persisted on the tenant.
    pub hash: String,
}

impl std::fmt::Debug for InternalCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalCredential")
            .field("secret", &"<redacted>")
            .field("hash", &self.hash)
            .finish()
    }
}

/// 32 random bytes, hex encoded, with its SHA-256 hash.
pub fn generate_credential() -> InternalCredential {
    let secret = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let hash = hash_credential(&secret);
    InternalCredential { secret, hash }
}

/// SHA-256 hex of a credential.
pub fn hash_credential(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Creates default scheduled jobs on a freshly provisioned resource.
#[async_trait]
pub trait JobSeeder: Send + Sync {
    /// Seed defaults for `tenant`.
    async fn seed_defaults(&self, ctx: &CallContext, tenant: &Tenant) -> Result<()>;
}

/// Releases a tenant's in-flight claim on drop.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<TenantId>>,
    tenant_id: TenantId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.tenant_id);
    }
}

/// Owner of the tenant resource state machine.
pub struct ResourceOrchestrator<S> {
    store: Arc<dyn Persistence>,
    cloud: Arc<dyn CloudProvider>,
    seeder: Option<Arc<dyn JobSeeder>>,
    spawner: S,
    settings: OrchestratorSettings,
    audit: Arc<dyn AuditSink>,
    in_flight: Mutex<HashSet<TenantId>>,
}

impl<S> ResourceOrchestrator<S>
where
    S: Spawn + Send + Sync + 'static,
{
    /// Orchestrator over `store` and `cloud`; background work goes through `spawner`.
    pub fn new(
        store: Arc<dyn Persistence>,
        cloud: Arc<dyn CloudProvider>,
        spawner: S,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            cloud,
            seeder: None,
            spawner,
            settings,
            audit: Arc::new(NoopAuditSink),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Seed default jobs after successful provisioning.
    #[must_use]
    pub fn with_seeder(mut self, seeder: Arc<dyn JobSeeder>) -> Self {
        self.seeder = Some(seeder);
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Provisioning parameters.
    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    fn claim(&self, tenant_id: &str) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock();
        if !set.insert(tenant_id.to_string()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            tenant_id: tenant_id.to_string(),
        })
    }

    /// Compare-and-set the stored status, writing `patch` in the same step.
    async fn set_status(
        &self,
        ctx: &CallContext,
        tenant_id: &str,
        from: &[TenantStatus],
        to: TenantStatus,
        patch: &TenantPatch,
    ) -> Result<Tenant> {
        let tenant = self
            .store
            .transition_tenant(ctx, tenant_id, from, to, patch)
            .await?;
        info!(tenant_id, to = %to, "tenant status changed");
        self.audit.record(build_audit_event(
            tenant_id,
            tenant_id,
            format!("status_{to}"),
            Some(format!("{} -> {to}", display_statuses(from))),
        ));
        Ok(tenant)
    }

    /// Bring up the tenant's resource. Only acts from `pending`/`provisioning`.
    ///
    /// Returns the tenant as it stands afterwards (unchanged on a guarded no-op).
    ///
    /// # Errors
    ///
    /// Any failing step; the tenant has been rolled back to `pending` by then.
    pub async fn provision(&self, ctx: &CallContext, tenant_id: &str) -> Result<Tenant> {
        let Some(_claim) = self.claim(tenant_id) else {
            warn!(tenant_id, "provision already in flight; ignoring duplicate trigger");
            return self.store.get_tenant(ctx, tenant_id).await;
        };
        let current = self.store.get_tenant(ctx, tenant_id).await?;
        if !PROVISIONABLE.contains(&current.status) {
            warn!(tenant_id, status = %current.status, "provision ignored outside pending/provisioning");
            return Ok(current);
        }

        let mut tenant = self
            .set_status(ctx, tenant_id, PROVISIONABLE, TenantStatus::Provisioning, &TenantPatch::default())
            .await?;

        if let Err(e) = self.provision_steps(&mut tenant).await {
            error!(tenant_id, error = %e, "provisioning failed; reverting to pending");
            // Identity and storage handles survive so a retry reuses them.
            let rollback = TenantPatch {
                resource_id: Some(None),
                resource_endpoint: Some(None),
                credential_hash: Some(None),
                identity_id: Some(tenant.identity_id.clone()),
                storage_id: Some(tenant.storage_id.clone()),
                ..TenantPatch::default()
            };
            if let Err(persist) = self
                .set_status(ctx, tenant_id, &[TenantStatus::Provisioning], TenantStatus::Pending, &rollback)
                .await
            {
                error!(tenant_id, error = %persist, "failed to persist provisioning rollback");
            }
            self.audit.record(build_audit_event(
                tenant_id,
                tenant_id,
                "provision_failed",
                Some(e.to_string()),
            ));
            return Err(e);
        }

        let patch = TenantPatch {
            config_version: Some(tenant.config_version),
            pending_config_version: Some(tenant.pending_config_version),
            ..TenantPatch::handles_of(&tenant)
        };
        let tenant = self
            .set_status(ctx, tenant_id, &[TenantStatus::Provisioning], TenantStatus::Active, &patch)
            .await?;
        self.spawn_seeding(&tenant);
        Ok(tenant)
    }

    async fn provision_steps(&self, tenant: &mut Tenant) -> Result<()> {
        tenant.pending_config_version = tenant.pending_config_version.max(1);
        let config = ResourceConfig::generate(tenant, &self.settings);

        let identity_id = self.cloud.create_identity(&tenant.id).await?;
        tenant.identity_id = Some(identity_id.clone());
        self.cloud.grant_secret_access(&identity_id).await?;
        self.cloud.grant_registry_access(&identity_id).await?;

        let credential = generate_credential();
        let secret_name = self.settings.credential_secret_name(&tenant.id);
        self.cloud
            .store_secret(&secret_name, &credential.secret)
            .await?;
        tenant.credential_hash = Some(credential.hash);

        let storage_id = self.cloud.create_storage(&tenant.id).await?;
        tenant.storage_id = Some(storage_id.clone());
        self.cloud.write_config(&storage_id, &config).await?;

        let compute = self
            .cloud
            .create_compute(&ComputeSpec {
                tenant_id: tenant.id.clone(),
                identity_id,
                storage_id,
                credential_secret: secret_name,
                image: self.settings.resource_image.clone(),
                gateway_port: self.settings.gateway_port,
            })
            .await?;

        tenant.resource_id = Some(compute.resource_id);
        tenant.resource_endpoint = Some(compute.endpoint);
        tenant.config_version = config.version;
        Ok(())
    }

    fn spawn_seeding(&self, tenant: &Tenant) {
        let Some(seeder) = self.seeder.clone() else {
            return;
        };
        let tenant = tenant.clone();
        self.spawner.spawn(async move {
            let ctx = CallContext::service();
            match seeder.seed_defaults(&ctx, &tenant).await {
                Ok(()) => info!(tenant_id = %tenant.id, "default jobs seeded"),
                Err(e) => warn!(tenant_id = %tenant.id, error = %e, "default job seeding failed"),
            }
        });
    }

    /// Tear the tenant's resource down.
    ///
    /// # Errors
    ///
    /// Any failing step; the tenant is `suspended` by then.
    pub async fn deprovision(&self, ctx: &CallContext, tenant_id: &str) -> Result<Tenant> {
        let Some(_claim) = self.claim(tenant_id) else {
            warn!(tenant_id, "lifecycle operation in flight; ignoring deprovision");
            return self.store.get_tenant(ctx, tenant_id).await;
        };
        let current = self.store.get_tenant(ctx, tenant_id).await?;
        match current.status {
            TenantStatus::Deleted => {
                warn!(tenant_id, "deprovision ignored; tenant already deleted");
                return Ok(current);
            }
            TenantStatus::Provisioning => {
                warn!(tenant_id, "deprovision ignored while provisioning");
                return Ok(current);
            }
            _ => {}
        }

        let mut tenant = self
            .set_status(ctx, tenant_id, DEPROVISIONABLE, TenantStatus::Deprovisioning, &TenantPatch::default())
            .await?;

        if let Err(e) = self.teardown_steps(&mut tenant).await {
            error!(tenant_id, error = %e, "deprovisioning failed; suspending tenant");
            let remaining = TenantPatch::handles_of(&tenant);
            if let Err(persist) = self
                .set_status(ctx, tenant_id, &[TenantStatus::Deprovisioning], TenantStatus::Suspended, &remaining)
                .await
            {
                error!(tenant_id, error = %persist, "failed to persist suspension");
            }
            return Err(e);
        }

        self.set_status(
            ctx,
            tenant_id,
            &[TenantStatus::Deprovisioning],
            TenantStatus::Deleted,
            &TenantPatch::handles_of(&tenant),
        )
        .await
    }

    /// Each handle is cleared as soon as its resource is gone so a retry only redoes the rest.
    async fn teardown_steps(&self, tenant: &mut Tenant) -> Result<()> {
        if let Some(resource_id) = tenant.resource_id.clone() {
            self.cloud.delete_compute(&resource_id).await?;
            tenant.resource_id = None;
            tenant.resource_endpoint = None;
        }
        if let Some(storage_id) = tenant.storage_id.clone() {
            self.cloud.delete_storage(&storage_id).await?;
            tenant.storage_id = None;
        }
        if tenant.credential_hash.is_some() {
            let secret_name = self.settings.credential_secret_name(&tenant.id);
            self.cloud.delete_secret(&secret_name).await?;
            tenant.credential_hash = None;
        }
        if let Some(identity_id) = tenant.identity_id.clone() {
            self.cloud.delete_identity(&identity_id).await?;
            tenant.identity_id = None;
        }
        Ok(())
    }

    /// Push regenerated configuration to an active resource.
    ///
    /// Returns `false` (with a warning) when the tenant is not active.
    ///
    /// # Errors
    ///
    /// `TransientInfra` while another lifecycle operation holds the tenant;
    /// store or write failures otherwise. Tenant status is never changed; a
    /// failed write leaves `config_version < pending_config_version`.
    pub async fn update_config(&self, ctx: &CallContext, tenant_id: &str) -> Result<bool> {
        let Some(_claim) = self.claim(tenant_id) else {
            return Err(ControlPlaneError::TransientInfra(format!(
                "lifecycle operation in flight for tenant `{tenant_id}`"
            )));
        };
        let current = self.store.get_tenant(ctx, tenant_id).await?;
        if current.status != TenantStatus::Active {
            warn!(tenant_id, status = %current.status, "config update ignored; resource not active");
            return Ok(false);
        }
        let Some(storage_id) = current.storage_id.clone() else {
            return Err(ControlPlaneError::Backend(format!(
                "active tenant `{tenant_id}` has no storage"
            )));
        };

        let requested = TenantPatch {
            pending_config_version: Some(current.pending_config_version.saturating_add(1)),
            ..TenantPatch::default()
        };
        let tenant = self
            .store
            .transition_tenant(ctx, tenant_id, &[TenantStatus::Active], TenantStatus::Active, &requested)
            .await?;

        let config = ResourceConfig::generate(&tenant, &self.settings);
        if let Err(e) = self.cloud.write_config(&storage_id, &config).await {
            error!(tenant_id, version = config.version, error = %e, "config push failed");
            return Err(e);
        }

        let written = TenantPatch {
            config_version: Some(config.version),
            ..TenantPatch::default()
        };
        self.store
            .transition_tenant(ctx, tenant_id, &[TenantStatus::Active], TenantStatus::Active, &written)
            .await?;
        info!(tenant_id, version = config.version, "config pushed");
        self.audit.record(build_audit_event(
            tenant_id,
            tenant_id,
            "config_updated",
            Some(format!("version {}", config.version)),
        ));
        Ok(true)
    }
}

const PROVISIONABLE: &[TenantStatus] = &[TenantStatus::Pending, TenantStatus::Provisioning];

const DEPROVISIONABLE: &[TenantStatus] = &[
    TenantStatus::Pending,
    TenantStatus::Active,
    TenantStatus::Suspended,
    TenantStatus::Deprovisioning,
];

fn display_statuses(statuses: &[TenantStatus]) -> String {
    statuses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}
