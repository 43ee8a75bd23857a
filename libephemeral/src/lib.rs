//! # libephemeral: local ephemeral volumes over CSI
//!
//! `libephemeral` implements a node-local [Container Storage Interface][csi]
//! plugin whose volumes are plain directories under a base path.  A volume
//! is created as a directory, published by bind-mounting it (or a
//! sub-directory of it) at the target path a container runtime asks for,
//! and destroyed together with its contents.  Requests travel over QUIC
//! (via [`quinn`]) instead of gRPC, following the RK8s conventions (Tokio
//! async runtime, `tracing` for observability, `thiserror` for structured
//! errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum covering all failure modes. |
//! | [`status`] | Wire-level [`Status`] and its gRPC-compatible [`Code`]. |
//! | [`config`] | [`DriverConfig`]: driver name, node id, base directory. |
//! | [`fs`] | Filesystem executor: directories, sidecars, mounts, `statvfs`. |
//! | [`registry`] | Concurrent in-memory table of volumes. |
//! | [`manager`] | Volume lifecycle: create, delete, publish, unpublish, usage. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volume create/delete. |
//! | [`node`] | [`CsiNode`] trait: publish, unpublish, stats. |
//! | [`driver`] | [`EphemeralDriver`], the handlers wired to the manager. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod fs;
pub mod identity;
pub mod manager;
pub mod message;
pub mod node;
pub mod registry;
pub mod status;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use config::DriverConfig;
pub use controller::CsiController;
pub use driver::EphemeralDriver;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use manager::VolumeManager;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use status::{Code, Status};
pub use transport::{CsiClient, CsiServer};
pub use types::*;
