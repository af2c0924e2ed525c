//! # libblockcsi — volume lifecycle orchestration core
//!
//! `libblockcsi` implements the orchestration core of a CSI-style storage
//! driver for a distributed block-storage cluster: it accepts volume
//! lifecycle requests (create, stage, publish, unpublish, unstage, delete,
//! expand) and translates them into idempotent, failure-tolerant operations
//! against a remote backend, while serializing per-volume work and
//! deduplicating retried requests.  It follows the usual conventions of this
//! codebase (Tokio async runtime, `tracing` for observability, `thiserror`
//! for structured errors).
//!
//! The transport that decodes wire requests, the storage cluster itself, and
//! process bootstrap all live elsewhere; this crate is consumed through
//! [`Driver`] and the backend capability traits.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Data model: `Volume`, `Assignment`, `MountRecord`, requests. |
//! | [`error`] | [`DriverError`] taxonomy covering all failure modes. |
//! | [`config`] | Immutable [`DriverConfig`] built once at startup. |
//! | [`backend`] | Capability traits (`Provisioning`, `Assignments`, `Mount`) plus the mock and host-mount implementations. |
//! | [`lifecycle`] | The volume lifecycle state machine. |
//! | [`guard`] | Idempotency and per-volume concurrency guard. |
//! | [`driver`] | [`Driver`] — the façade the transport layer invokes. |

pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use config::DriverConfig;
pub use driver::{Driver, DriverInfo};
pub use error::DriverError;
pub use guard::OperationGuard;
pub use lifecycle::{LifecycleEngine, VolumeStage};
pub use types::*;
