//! Control-plane components: lifecycle orchestration, scheduling, execution and routing.

pub mod audit;
pub mod automation;
pub mod context;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod lifecycle;
pub mod model;
pub mod orchestrator;
pub mod router;
pub mod scheduler;
pub mod spawn;
pub mod store;

pub use audit::{
    build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink, TracingAuditSink,
};
pub use automation::{AutomationService, DefaultJobSeeder, NewAutomation};
pub use context::{Actor, CallContext};
pub use error::{AppResult, ControlPlaneError, ErrorKind, Result};
pub use executor::{ExecutionPolicy, Executor};
pub use gateway::{
    GatewayClient, GatewayError, GatewayErrorCategory, InvokeRequest, InvokeResponse, TokenBroker,
};
pub use lifecycle::{
    JobQueue, LifecycleCommand, LifecycleJob, LifecycleReport, LifecycleWorker, RetryPolicy,
};
pub use model::{
    AutomationDefinition, AutomationStatus, QuietHours, Run, RunStatus, ScheduleSpec, ScheduleType,
    Tenant, TenantStatus, TriggerSource, Update, UsageEvent,
};
pub use orchestrator::{
    CloudProvider, ComputeHandle, ComputeSpec, JobSeeder, OrchestratorSettings, ResourceConfig,
    ResourceOrchestrator,
};
pub use router::{
    MessagingEndpoint, OffsetStore, RateLimiter, RouteCache, RouteCacheEntry, RouteOutcome, Router,
    RouterSettings,
};
pub use scheduler::{compute_next_run, RunFailure, RunSummary, Scheduler};
pub use spawn::Spawn;
pub use store::{AutomationStore, Persistence, RunStore, TenantPatch, TenantStore, UsageStore};
