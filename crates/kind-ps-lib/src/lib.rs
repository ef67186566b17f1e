//! Host process discovery for kind clusters
//!
//! This crate maps containers running in pods of a kind cluster to the
//! host PIDs executing inside them:
//! - Node discovery through `docker ps`
//! - Runtime inventory (images, pods, containers) through `crictl`
//! - PID resolution through the host cgroup v2 hierarchy
//! - Correlation into one process group per pod container

pub mod cgroup;
pub mod config;
pub mod correlate;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod inventory;
pub mod models;
pub mod observability;
pub mod pipeline;

pub use config::{PipelineConfig, VanishedPidPolicy};
pub use error::{KindPsError, Result};
pub use models::*;
pub use observability::StructuredLogger;
pub use pipeline::Pipeline;
