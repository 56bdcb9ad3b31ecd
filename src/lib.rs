//! Block storage driver that reconciles orchestrator datasets against
//! DigitalOcean volumes.
//!
//! The crate is layered bottom-up: a retrying provider client
//! ([`provider`]), a registry that reads datasets out of volume names
//! ([`registry`]), a pure attachment state machine ([`attachment`]), and the
//! orchestrator-facing [`Reconciler`] that composes them into idempotent
//! create, attach, detach and destroy operations.

pub mod attachment;
pub mod config;
pub mod engine;
pub mod error;
pub mod naming;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod test_support;

pub use attachment::{DatasetState, MAX_ATTACHMENTS_PER_NODE};
pub use config::{ConfigError, DriverConfig};
pub use engine::{Dataset, DestroyOutcome, Reconciler};
pub use error::DriverError;
pub use naming::{DatasetId, VolumeNameError, VolumeNaming};
pub use provider::{
    Action, ActionId, ActionStatus, BlockStorageApi, ComputeNode, DigitalOceanClient, GIB,
    LocalNode, NodeId, ProviderError, ProviderVolume, Region, VolumeId,
};
pub use registry::{RegistrySnapshot, Volume, VolumeRegistry};
pub use retry::{PollSchedule, PollSettings, RetryPolicy};
