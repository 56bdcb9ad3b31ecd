//! Errors surfaced to the orchestrator by the reconciliation engine.

use thiserror::Error;

use crate::config::ConfigError;
use crate::naming::DatasetId;
use crate::provider::{ActionId, NodeId, ProviderError, Region, VolumeId};

/// Typed failures returned by [`crate::Reconciler`] operations.
///
/// Transient provider failures have already been retried by the provider
/// client by the time they surface here as
/// [`DriverError::ProviderUnavailable`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Network failures or 5xx responses outlived the retry budget.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The API token was rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// The dataset, volume, node or action does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The node already holds the maximum number of attached volumes.
    #[error("node {node_id} already has {attached} of {limit} volumes attached")]
    CapacityExceeded {
        /// Target node.
        node_id: NodeId,
        /// Volumes attached when the check ran.
        attached: usize,
        /// Provider attachment limit.
        limit: usize,
    },
    /// The dataset's volume and the target node live in different regions.
    #[error("volume {volume_id} is in {volume_region} but node {node_id} is in {node_region}")]
    RegionMismatch {
        /// Volume backing the dataset.
        volume_id: VolumeId,
        /// Region of the volume.
        volume_region: Region,
        /// Target node.
        node_id: NodeId,
        /// Region of the node.
        node_region: Region,
    },
    /// The attach action did not settle in time. It may still complete.
    #[error("timeout attaching volume {volume_id} to node {node_id}")]
    AttachTimeout {
        /// Volume being attached.
        volume_id: VolumeId,
        /// Target node.
        node_id: NodeId,
    },
    /// The detach action did not settle in time. It may still complete.
    #[error("timeout detaching volume {volume_id} from node {node_id}")]
    DetachTimeout {
        /// Volume being detached.
        volume_id: VolumeId,
        /// Node the volume was attached to.
        node_id: NodeId,
    },
    /// A created volume did not become visible in time.
    #[error("timeout waiting for volume of dataset {dataset_id} to become ready")]
    CreateTimeout {
        /// Dataset whose volume was created.
        dataset_id: DatasetId,
    },
    /// Some other provider action did not settle in time.
    #[error("timeout waiting for {kind} action {action_id}")]
    ActionTimeout {
        /// Action identifier.
        action_id: ActionId,
        /// Action type.
        kind: String,
    },
    /// The provider reported the action as failed.
    #[error("{kind} action {action_id} failed on the provider")]
    ActionFailed {
        /// Action identifier.
        action_id: ActionId,
        /// Action type.
        kind: String,
    },
    /// A destroyed volume is still reported by the provider.
    #[error("volume {volume_id} still present after destroy")]
    ResidualVolume {
        /// Volume that lingered.
        volume_id: VolumeId,
    },
    /// The dataset's volume is not attached anywhere.
    #[error("volume {volume_id} is not attached")]
    NotAttached {
        /// Volume backing the dataset.
        volume_id: VolumeId,
    },
    /// The volume is in a state the requested transition cannot start from,
    /// for example attached to another node.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The provider rejected the request for another reason.
    #[error("provider rejected request: {0}")]
    Rejected(String),
    /// The request cannot be expressed to the provider.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The driver configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ProviderError> for DriverError {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::Unavailable { .. } => Self::ProviderUnavailable(value.to_string()),
            ProviderError::Authentication { message } => Self::AuthenticationFailed(message),
            ProviderError::NotFound { resource } => Self::NotFound(resource),
            ProviderError::Conflict { message } => Self::Conflict(message),
            ProviderError::Rejected { .. } | ProviderError::Decode { .. } => {
                Self::Rejected(value.to_string())
            }
            ProviderError::InvalidRequest(message) => Self::InvalidRequest(message),
        }
    }
}

impl From<ConfigError> for DriverError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
