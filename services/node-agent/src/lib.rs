//! fnagent Node Agent Library
//!
//! The node agent runs on each host that executes functions. Every function
//! invocation runs in a container started from a registry image, and pulling
//! those images is slow, so the agent keeps a bounded set of them on disk.
//!
//! ## Architecture
//!
//! ```text
//! invocation workers ──acquire/release──> ImageLeases ──> ImageCache
//!                                              │              ▲
//!                                           Notify            │
//!                                              ▼              │
//!                                       reclaim loop ──> Reclaimer ──> DockerClient
//! ```
//!
//! ## Modules
//!
//! - `agent`: wires the cache, reclaimer, leases and reclaim loop together
//! - `config`: environment configuration
//! - `docker`: Docker Engine API client used to list and delete images
//! - `gc`: background reclaim loop
//! - `leases`: image pinning for running containers
//! - `runtime`: runtime interface, startup seeding, and a mock runtime

pub mod agent;
pub mod config;
pub mod docker;
pub mod gc;
pub mod leases;
pub mod runtime;

// Re-export commonly used types
pub use agent::Agent;
pub use config::{Config, RuntimeKind};
pub use docker::{DockerClient, DockerError};
pub use leases::ImageLeases;
pub use runtime::{seed_cache, ImageRuntime, MockRuntime};
