//! Block storage provider client.
//!
//! [`BlockStorageApi`] is the seam between the reconciliation engine and the
//! remote API. It knows nothing about datasets: it lists, creates and
//! destroys volumes, issues attach and detach actions, and reports action
//! and node state. [`DigitalOceanClient`] implements it over HTTPS; the
//! in-memory double in [`crate::test_support`] implements it for tests.

mod digitalocean;
mod error;
mod types;

use std::future::Future;
use std::pin::Pin;

pub use digitalocean::DigitalOceanClient;
pub use error::ProviderError;
pub use types::{ActionId, NodeId, Region, VolumeId};

/// Bytes in one GiB, the provider's size granularity.
pub const GIB: u64 = 1 << 30;

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Volume as reported by the provider, before any dataset interpretation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderVolume {
    /// Provider volume identifier.
    pub id: VolumeId,
    /// Volume name; carries the dataset id for volumes owned by the driver.
    pub name: String,
    /// Free-form description; carries the cluster id for owned volumes.
    pub description: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Region the volume lives in.
    pub region: Region,
    /// Nodes the volume is attached to. The provider allows at most one.
    pub attached_to: Vec<NodeId>,
}

/// Parameters for creating a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateVolumeRequest {
    /// Volume name following the dataset naming convention.
    pub name: String,
    /// Size in whole GiB.
    pub size_gib: u64,
    /// Target region.
    pub region: Region,
    /// Description recording cluster ownership.
    pub description: String,
}

/// Compute instance as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputeNode {
    /// Node identifier.
    pub id: NodeId,
    /// Region the node runs in.
    pub region: Region,
    /// Power status (`new`, `active`, `off`, `archive`).
    pub status: String,
    /// Volumes currently attached to the node.
    pub volume_ids: Vec<VolumeId>,
}

impl ComputeNode {
    /// Whether the node is powered on.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// Identity of the node the driver runs on, from the metadata service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalNode {
    /// Node identifier.
    pub id: NodeId,
    /// Region the node runs in.
    pub region: Region,
    /// Hostname reported by the metadata service.
    pub hostname: String,
}

/// Settlement state of a provider action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionStatus {
    /// The provider is still working on the action.
    InProgress,
    /// The action finished successfully.
    Completed,
    /// The action failed on the provider side.
    Errored,
}

impl ActionStatus {
    /// Parses the provider's status string. Unknown values are treated as
    /// still in progress so the caller keeps polling until its deadline.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value {
            "completed" => Self::Completed,
            "errored" => Self::Errored,
            _ => Self::InProgress,
        }
    }

    /// Provider spelling of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Errored => "errored",
        }
    }
}

/// Handle for an asynchronous provider operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Action {
    /// Action identifier used for polling.
    pub id: ActionId,
    /// Current status.
    pub status: ActionStatus,
    /// Action type such as `attach`, `detach` or `power_on`.
    pub kind: String,
    /// Identifier of the resource the action targets, when reported.
    pub resource_id: Option<String>,
}

/// Operations the reconciliation engine needs from a block storage provider.
///
/// Implementations retry transient failures themselves; callers see either
/// a settled answer or a typed [`ProviderError`].
pub trait BlockStorageApi: Send + Sync {
    /// Lists every volume, optionally restricted to one region.
    fn list_volumes<'a>(
        &'a self,
        region: Option<&'a Region>,
    ) -> ProviderFuture<'a, Vec<ProviderVolume>>;

    /// Fetches a single volume.
    fn get_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ProviderVolume>;

    /// Creates a volume and returns the provider's view of it.
    fn create_volume<'a>(
        &'a self,
        request: &'a CreateVolumeRequest,
    ) -> ProviderFuture<'a, ProviderVolume>;

    /// Deletes a volume. A missing volume yields [`ProviderError::NotFound`].
    fn destroy_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ()>;

    /// Starts attaching a volume to a node.
    fn attach<'a>(
        &'a self,
        volume_id: &'a VolumeId,
        node_id: &'a NodeId,
        region: &'a Region,
    ) -> ProviderFuture<'a, Action>;

    /// Starts detaching a volume from a node.
    fn detach<'a>(
        &'a self,
        volume_id: &'a VolumeId,
        node_id: &'a NodeId,
        region: &'a Region,
    ) -> ProviderFuture<'a, Action>;

    /// Reads the current state of an action.
    fn get_action<'a>(&'a self, id: &'a ActionId) -> ProviderFuture<'a, Action>;

    /// Fetches a single compute node.
    fn get_node<'a>(&'a self, id: &'a NodeId) -> ProviderFuture<'a, ComputeNode>;

    /// Lists every compute node visible to the token.
    fn list_nodes(&self) -> ProviderFuture<'_, Vec<ComputeNode>>;

    /// Starts powering on a node.
    fn power_on<'a>(&'a self, id: &'a NodeId) -> ProviderFuture<'a, Action>;

    /// Reads the identity of the node this process runs on.
    fn local_node(&self) -> ProviderFuture<'_, LocalNode>;
}
