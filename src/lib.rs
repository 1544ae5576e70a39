//! # Prometheus Control Plane
//!
//! A multi-tenant control plane for fleets of per-tenant compute resources.
//!
//! Each tenant gets an isolated resource (compute, identity, storage) that
//! does the actual work. This crate owns the three pieces that coordinate
//! slow, inconsistent external state under concurrency:
//!
//! - **Resource lifecycle** ([`core::orchestrator`], [`core::lifecycle`]):
//!   a `pending → provisioning → active → deprovisioning → deleted` state
//!   machine with rollback to `pending` on provisioning failure and
//!   `suspended` on teardown failure, driven from a retrying work queue.
//! - **Automation scheduling** ([`core::scheduler`], [`core::executor`]):
//!   timezone-aware daily/weekly schedules, per-automation and per-tenant
//!   quotas, and idempotent run creation so a repeated scheduler tick never
//!   dispatches the same job twice.
//! - **Message routing** ([`core::router`]): a single long-poll loop that
//!   resolves senders to tenants, applies rate and budget admission control,
//!   forwards to the tenant's gateway and relays the reply.
//!
//! Storage, cloud, gateway and messaging are collaborators behind traits;
//! [`infra`] ships in-memory and HTTP implementations.
//!
//! ## Running a scheduler batch
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_control_plane::builders::ControlPlaneBuilder;
//! use prometheus_control_plane::config::ControlPlaneConfig;
//! use prometheus_control_plane::infra::{HttpGatewayClient, InMemoryStore, StaticTokenBroker};
//! use prometheus_control_plane::runtime::{trigger_run_due, TriggerRequest};
//!
//! let config = ControlPlaneConfig::from_env()?;
//! let gateway = HttpGatewayClient::new(Arc::new(StaticTokenBroker::new()), config.gateway.timeout());
//! let scheduler = ControlPlaneBuilder::new(config)?
//!     .with_store(Arc::new(InMemoryStore::new()))
//!     .with_gateway(Arc::new(gateway))
//!     .build_scheduler()?;
//!
//! let summary = trigger_run_due(&scheduler, TriggerRequest { now: None, limit: 50 }).await?;
//! println!("{}", serde_json::to_string(&summary)?);
//! std::process::exit(summary.exit_code());
//! ```
//!
//! For complete flows, see the integration tests under `tests/`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Control-plane components and collaborator contracts.
pub mod core;
/// Configuration models and environment loading.
pub mod config;
/// Builders to construct components from configuration.
pub mod builders;
/// Infrastructure adapters: stores, cloud, HTTP clients, queues.
pub mod infra;
/// Runtime adapters and the trigger API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
