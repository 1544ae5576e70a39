//! Assembles control-plane components from configuration and injected collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ControlPlaneConfig, QueueBackendConfig};
use crate::core::audit::{AuditSink, NoopAuditSink};
use crate::core::automation::DefaultJobSeeder;
use crate::core::error::{ControlPlaneError, Result};
use crate::core::executor::Executor;
use crate::core::gateway::GatewayClient;
use crate::core::lifecycle::{JobQueue, LifecycleWorker};
use crate::core::orchestrator::{CloudProvider, ResourceOrchestrator};
use crate::core::router::{MessagingEndpoint, OffsetStore, Router};
use crate::core::scheduler::Scheduler;
use crate::core::spawn::Spawn;
use crate::core::store::Persistence;
use crate::infra::offset::FileOffsetStore;
use crate::infra::queue::{FileJobQueue, InMemoryJobQueue};
use crate::infra::rate_limiter::SlidingWindowRateLimiter;
use crate::infra::route_cache::InMemoryRouteCache;

/// Queue chosen by configuration.
pub type DynJobQueue = Box<dyn JobQueue>;

/// Stream name of the file-backed lifecycle queue.
pub const LIFECYCLE_STREAM: &str = "lifecycle";

fn missing(what: &str) -> ControlPlaneError {
    ControlPlaneError::Validation(format!("{what} is required"))
}

/// Builder wiring collaborators into components.
pub struct ControlPlaneBuilder {
    config: ControlPlaneConfig,
    store: Option<Arc<dyn Persistence>>,
    gateway: Option<Arc<dyn GatewayClient>>,
    cloud: Option<Arc<dyn CloudProvider>>,
    audit: Arc<dyn AuditSink>,
    seed_defaults: bool,
}

impl ControlPlaneBuilder {
    /// Builder over `config`.
    ///
    /// # Errors
    ///
    /// `Validation` when the configuration is invalid.
    pub fn new(config: ControlPlaneConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ControlPlaneError::Validation(format!("config invalid: {e}")))?;
        Ok(Self {
            config,
            store: None,
            gateway: None,
            cloud: None,
            audit: Arc::new(NoopAuditSink),
            seed_defaults: true,
        })
    }

    /// Configuration in use.
    pub const fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    /// Persistence collaborator.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    /// Gateway collaborator.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn GatewayClient>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Cloud collaborator.
    #[must_use]
    pub fn with_cloud(mut self, cloud: Arc<dyn CloudProvider>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Audit sink shared by every component.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Disable default job seeding after provisioning.
    #[must_use]
    pub const fn without_default_jobs(mut self) -> Self {
        self.seed_defaults = false;
        self
    }

    fn store(&self) -> Result<Arc<dyn Persistence>> {
        self.store.clone().ok_or_else(|| missing("store"))
    }

    fn gateway(&self) -> Result<Arc<dyn GatewayClient>> {
        self.gateway.clone().ok_or_else(|| missing("gateway client"))
    }

    /// Executor with configured quotas.
    ///
    /// # Errors
    ///
    /// Missing store or gateway.
    pub fn build_executor(&self) -> Result<Arc<Executor>> {
        let executor = Executor::new(
            self.store()?,
            self.gateway()?,
            self.config.executor.policy(&self.config.gateway),
        )
        .with_audit(Arc::clone(&self.audit));
        Ok(Arc::new(executor))
    }

    /// Scheduler with its own executor.
    ///
    /// # Errors
    ///
    /// Missing store or gateway.
    pub fn build_scheduler(&self) -> Result<Scheduler> {
        Ok(Scheduler::new(self.store()?, self.build_executor()?)
            .with_concurrency(self.config.scheduler.concurrency))
    }

    /// Router reading from `endpoint`, with in-memory cache and limiter.
    ///
    /// # Errors
    ///
    /// Missing store or gateway.
    pub fn build_router(&self, endpoint: Arc<dyn MessagingEndpoint>) -> Result<Router> {
        let cfg = &self.config.router;
        let mut router = Router::new(
            endpoint,
            self.store()?,
            self.gateway()?,
            Arc::new(InMemoryRouteCache::new(cfg.cache_ttl())),
            Arc::new(SlidingWindowRateLimiter::new(cfg.rate_limit, cfg.rate_window())),
            cfg.settings(&self.config.gateway),
        );
        if let Some(path) = &cfg.offset_path {
            let offsets: Arc<dyn OffsetStore> = Arc::new(FileOffsetStore::new(path));
            router = router.with_offset_store(offsets);
        }
        Ok(router)
    }

    /// Orchestrator spawning background work through `spawner`.
    ///
    /// # Errors
    ///
    /// Missing store or cloud provider.
    pub fn build_orchestrator<S>(&self, spawner: S) -> Result<Arc<ResourceOrchestrator<S>>>
    where
        S: Spawn + Send + Sync + 'static,
    {
        let store = self.store()?;
        let cloud = self.cloud.clone().ok_or_else(|| missing("cloud provider"))?;
        let mut orchestrator = ResourceOrchestrator::new(
            Arc::clone(&store),
            cloud,
            spawner,
            self.config.lifecycle.orchestrator_settings(),
        )
        .with_audit(Arc::clone(&self.audit));
        if self.seed_defaults {
            orchestrator = orchestrator.with_seeder(Arc::new(DefaultJobSeeder::new(store)));
        }
        Ok(Arc::new(orchestrator))
    }

    /// Lifecycle queue selected by configuration.
    ///
    /// # Errors
    ///
    /// File queue open failures.
    pub fn build_job_queue(&self) -> Result<DynJobQueue> {
        let cfg = &self.config.lifecycle;
        match cfg.queue {
            QueueBackendConfig::InMemory => Ok(Box::new(InMemoryJobQueue::new(cfg.queue_depth))),
            QueueBackendConfig::File => {
                let path = cfg
                    .queue_path
                    .as_ref()
                    .map(PathBuf::from)
                    .ok_or_else(|| missing("lifecycle.queue_path"))?;
                Ok(Box::new(FileJobQueue::new(path, LIFECYCLE_STREAM, cfg.queue_depth)?))
            }
        }
    }

    /// Lifecycle worker draining the configured queue into `orchestrator`.
    ///
    /// # Errors
    ///
    /// Queue construction failures.
    pub fn build_lifecycle_worker<S>(
        &self,
        orchestrator: Arc<ResourceOrchestrator<S>>,
    ) -> Result<LifecycleWorker<DynJobQueue, S>>
    where
        S: Spawn + Send + Sync + 'static,
    {
        let cfg = &self.config.lifecycle;
        Ok(
            LifecycleWorker::new(self.build_job_queue()?, orchestrator, cfg.retry_policy())
                .with_worker_count(cfg.worker_count)
                .with_poll_interval(cfg.poll_interval())
                .with_audit(Arc::clone(&self.audit)),
        )
    }
}
