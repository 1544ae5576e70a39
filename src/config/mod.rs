//! Configuration models for the scheduler, executor, router, gateway and lifecycle worker.

pub mod control_plane;

pub use control_plane::{
    ControlPlaneConfig, ExecutorConfig, GatewayConfig, LifecycleConfig, QueueBackendConfig,
    RouterConfig, SchedulerConfig, MAX_WINDOW_SECS,
};
