#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Cross-project dependency resolution and `yarn.lock` synchronization for
//! monorepos without a single root manifest.

pub mod config;
pub mod error;
pub mod index;
pub mod install;
pub mod lockfile;
pub mod manifest;
pub mod mutate;
pub mod ops;
pub mod range;
pub mod registry;
pub mod store;
pub mod sync;
pub mod version;

pub use config::SyncOptions;
pub use error::SyncError;
pub use lockfile::{LockEntry, Lockfile};
pub use manifest::{DepType, Manifest};
pub use mutate::{Addition, MetadataChanges, Upgrading};
pub use ops::{
    add, check, dedupe, merge, regenerate, remove, sync, upgrade, CheckReport, SyncReport,
};
pub use registry::{RegistryClient, YarnClient};
pub use store::VersionSet;
pub use version::VERSION;
