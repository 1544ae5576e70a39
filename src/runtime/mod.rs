//! Runtime adapters and the externally invoked API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{health, trigger_run_due, Health, TriggerRequest, TriggerResponse};
pub use tokio_spawner::TokioSpawner;
