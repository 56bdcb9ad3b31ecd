//! Orchestrator-facing reconciliation entry points.
//!
//! Every operation observes the provider afresh, asks the attachment state
//! machine for the next provider call, issues it, and waits for the
//! provider to settle before returning. All operations are safe to repeat:
//! calling one when its end state already holds returns the current state.
//!
//! # Caller contract
//!
//! Operations on different datasets may run concurrently. At most one
//! operation per dataset may be in flight at a time; the engine holds no
//! lock to enforce this. Dropping an operation's future cancels it without
//! rolling back provider actions already issued; the next call observes
//! and completes them.

mod wait;

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::attachment::{
    AttachStep, DatasetState, DestroyStep, DetachStep, MAX_ATTACHMENTS_PER_NODE, plan_attach,
    plan_destroy, plan_detach,
};
use crate::config::{ConfigError, DriverConfig};
use crate::error::DriverError;
use crate::naming::{DatasetId, VolumeNaming};
use crate::provider::{
    BlockStorageApi, ComputeNode, CreateVolumeRequest, DigitalOceanClient, GIB, LocalNode, NodeId,
    ProviderError, Region, VolumeId,
};
use crate::registry::{Volume, VolumeRegistry};
use crate::retry::{PollSchedule, PollSettings};

use self::wait::{Settlement, Waited};

/// Directory holding the provider's stable block device links.
pub const DEVICE_DIRECTORY: &str = "/dev/disk/by-id";

/// A dataset the orchestrator wants to exist.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dataset {
    /// Dataset identity.
    pub id: DatasetId,
    /// Requested size in bytes; rounded up to [`Reconciler::allocation_unit`].
    pub size_bytes: u64,
    /// Opaque orchestrator metadata.
    pub metadata: BTreeMap<String, String>,
}

impl Dataset {
    /// Dataset with no metadata.
    #[must_use]
    pub const fn new(id: DatasetId, size_bytes: u64) -> Self {
        Self {
            id,
            size_bytes,
            metadata: BTreeMap::new(),
        }
    }
}

/// Result of [`Reconciler::destroy`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DestroyOutcome {
    /// The dataset's volume was destroyed by this call.
    Destroyed(VolumeId),
    /// No volume backed the dataset.
    AlreadyAbsent,
}

/// Reconciles dataset requests against a block storage provider.
#[derive(Debug)]
pub struct Reconciler<A = DigitalOceanClient> {
    api: A,
    naming: VolumeNaming,
    region: Region,
    cluster_description: Option<String>,
    poll: PollSettings,
}

impl<A: BlockStorageApi> Reconciler<A> {
    /// Builds an engine over `api` using the naming, region, cluster and
    /// polling settings from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn new(api: A, config: &DriverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let naming = config.naming()?;
        let cluster_description = config
            .cluster_id()
            .map(|cluster| naming.cluster_description(cluster));
        Ok(Self {
            api,
            naming,
            region: Region::new(config.region.trim()),
            cluster_description,
            poll: config.poll_settings(),
        })
    }

    /// Builds an engine from already-validated parts.
    #[must_use]
    pub fn from_parts(
        api: A,
        naming: VolumeNaming,
        region: Region,
        cluster_id: Option<&str>,
        poll: PollSettings,
    ) -> Self {
        let cluster_description = cluster_id.map(|cluster| naming.cluster_description(cluster));
        Self {
            api,
            naming,
            region,
            cluster_description,
            poll,
        }
    }

    /// Size granularity of provider volumes, in bytes.
    #[must_use]
    pub const fn allocation_unit(&self) -> u64 {
        GIB
    }

    fn registry(&self) -> VolumeRegistry<'_, A> {
        VolumeRegistry::new(&self.api, &self.naming, self.cluster_description.as_deref())
    }

    fn schedule(&self) -> PollSchedule {
        self.poll.start(Instant::now())
    }

    /// Volume backing `dataset_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the provider cannot be listed.
    pub async fn find_volume_for_dataset(
        &self,
        dataset_id: &DatasetId,
    ) -> Result<Option<Volume>, DriverError> {
        Ok(self.registry().find_volume_for_dataset(dataset_id).await?)
    }

    /// Every dataset with a volume, in dataset order.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the provider cannot be listed.
    #[instrument(skip_all)]
    pub async fn list_datasets(&self) -> Result<Vec<(DatasetId, Volume)>, DriverError> {
        Ok(self.registry().snapshot().await?.into_pairs())
    }

    /// Ensures a volume backs `dataset`, creating it in the configured region
    /// when missing.
    ///
    /// An existing volume is returned unchanged, whatever its size. A create
    /// the provider rejects as a conflict is treated as a resend of an earlier
    /// create and resolved by waiting for the volume to appear.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::CreateTimeout`] when the volume is not listed
    /// before the operation deadline, and other [`DriverError`] variants for
    /// provider failures.
    #[instrument(skip_all, fields(dataset_id = %dataset.id))]
    pub async fn create(&self, dataset: &Dataset) -> Result<Volume, DriverError> {
        let mut schedule = self.schedule();
        if let Some(existing) = self.find_volume_for_dataset(&dataset.id).await? {
            info!(volume_id = %existing.id, "volume already exists");
            return Ok(existing);
        }

        let request = CreateVolumeRequest {
            name: self.naming.format(&dataset.id),
            size_gib: dataset.size_bytes.div_ceil(GIB).max(1),
            region: self.region.clone(),
            description: self.cluster_description.clone().unwrap_or_default(),
        };
        match self.api.create_volume(&request).await {
            Ok(created) => info!(volume_id = %created.id, size_gib = request.size_gib, "volume created"),
            Err(ProviderError::Conflict { message }) => {
                warn!(%message, "create conflicted; waiting for existing volume");
            }
            Err(err) => return Err(err.into()),
        }

        match self
            .wait_for_dataset(&dataset.id, &mut schedule, |found| found.is_some())
            .await?
        {
            Waited::Ready(Some(volume)) => Ok(volume),
            Waited::Ready(None) | Waited::Expired => Err(DriverError::CreateTimeout {
                dataset_id: dataset.id,
            }),
        }
    }

    /// Ensures no volume backs `dataset_id`, detaching it first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::DetachTimeout`] or
    /// [`DriverError::ResidualVolume`] when the provider does not settle
    /// before the operation deadline, and other [`DriverError`] variants for
    /// provider failures.
    #[instrument(skip_all, fields(dataset_id = %dataset_id))]
    pub async fn destroy(&self, dataset_id: DatasetId) -> Result<DestroyOutcome, DriverError> {
        let mut schedule = self.schedule();
        let Some(mut volume) = self.find_volume_for_dataset(&dataset_id).await? else {
            return Ok(DestroyOutcome::AlreadyAbsent);
        };

        loop {
            match plan_destroy(Some(&volume)) {
                DestroyStep::Noop => return Ok(DestroyOutcome::AlreadyAbsent),
                DestroyStep::Detach { node_id, .. } => {
                    match self.detach_volume(&volume, &node_id, &mut schedule).await? {
                        Some(detached) => volume = detached,
                        None => return Ok(DestroyOutcome::Destroyed(volume.id)),
                    }
                }
                DestroyStep::Destroy { volume_id } => {
                    return self.destroy_volume(dataset_id, volume_id, &mut schedule).await;
                }
            }
        }
    }

    async fn destroy_volume(
        &self,
        dataset_id: DatasetId,
        volume_id: VolumeId,
        schedule: &mut PollSchedule,
    ) -> Result<DestroyOutcome, DriverError> {
        match self.api.destroy_volume(&volume_id).await {
            Ok(()) => info!(%volume_id, "volume destroyed"),
            Err(err) if err.is_not_found() => info!(%volume_id, "volume already gone"),
            Err(err) => return Err(err.into()),
        }
        match self
            .wait_for_dataset(&dataset_id, schedule, |found| found.is_none())
            .await?
        {
            Waited::Ready(_) => Ok(DestroyOutcome::Destroyed(volume_id)),
            Waited::Expired => Err(DriverError::ResidualVolume { volume_id }),
        }
    }

    /// Ensures the volume backing `dataset_id` is attached to `node_id`.
    ///
    /// The node's attached-volume count is re-read immediately before the
    /// attach call. Two concurrent attaches to one node can both pass that
    /// check; the provider's own rejection then surfaces as
    /// [`DriverError::CapacityExceeded`].
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`], [`DriverError::Conflict`],
    /// [`DriverError::RegionMismatch`] or [`DriverError::CapacityExceeded`]
    /// before any mutating call, [`DriverError::AttachTimeout`] when the
    /// attach does not settle in time (it may still complete), and
    /// [`DriverError::ActionFailed`] when the provider reports failure.
    #[instrument(skip_all, fields(dataset_id = %dataset_id, node_id = %node_id))]
    pub async fn attach(
        &self,
        dataset_id: DatasetId,
        node_id: &NodeId,
    ) -> Result<Volume, DriverError> {
        let mut schedule = self.schedule();
        let volume = self.find_volume_for_dataset(&dataset_id).await?;
        match (DatasetState::observe(volume.as_ref()), volume.as_ref()) {
            (DatasetState::Attached(holder), Some(held)) if holder == *node_id => {
                return Ok(held.clone());
            }
            (state, _) => debug!(?state, "planning attach"),
        }

        let node = self.api.get_node(node_id).await?;
        let volume_id = match plan_attach(volume.as_ref(), &node, node.volume_ids.len())? {
            AttachStep::Noop => {
                return volume.ok_or_else(|| DriverError::NotFound(dataset_id.to_string()));
            }
            AttachStep::Attach { volume_id } => volume_id,
        };

        let action = match self.api.attach(&volume_id, node_id, &node.region).await {
            Ok(action) => action,
            Err(ProviderError::Conflict { message }) => {
                return Err(self.attach_rejection(node_id, message).await);
            }
            Err(err) => return Err(err.into()),
        };

        let timeout = || DriverError::AttachTimeout {
            volume_id: volume_id.clone(),
            node_id: node_id.clone(),
        };
        match self.settle(action, &mut schedule).await? {
            Settlement::Completed => {}
            Settlement::Errored(failed) => {
                return Err(DriverError::ActionFailed {
                    action_id: failed.id,
                    kind: failed.kind,
                });
            }
            Settlement::Expired(_) => return Err(timeout()),
        }

        match self
            .wait_for_dataset(&dataset_id, &mut schedule, |found| {
                found.is_some_and(|vol| vol.attached_to.as_ref() == Some(node_id))
            })
            .await?
        {
            Waited::Ready(Some(vol)) => {
                info!(volume_id = %vol.id, "volume attached");
                Ok(vol)
            }
            Waited::Ready(None) | Waited::Expired => Err(timeout()),
        }
    }

    /// Maps a provider conflict on attach back to the engine's taxonomy by
    /// re-reading the node.
    async fn attach_rejection(&self, node_id: &NodeId, message: String) -> DriverError {
        match self.api.get_node(node_id).await {
            Ok(node) if node.volume_ids.len() >= MAX_ATTACHMENTS_PER_NODE => {
                DriverError::CapacityExceeded {
                    node_id: node.id,
                    attached: node.volume_ids.len(),
                    limit: MAX_ATTACHMENTS_PER_NODE,
                }
            }
            Ok(_) => DriverError::Conflict(message),
            Err(err) => err.into(),
        }
    }

    /// Ensures the volume backing `dataset_id` is not attached anywhere.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when no volume backs the dataset,
    /// [`DriverError::DetachTimeout`] when the detach does not settle in
    /// time, and other [`DriverError`] variants for provider failures.
    #[instrument(skip_all, fields(dataset_id = %dataset_id))]
    pub async fn detach(&self, dataset_id: DatasetId) -> Result<Volume, DriverError> {
        let mut schedule = self.schedule();
        let volume = self.find_volume_for_dataset(&dataset_id).await?;
        match plan_detach(volume.as_ref())? {
            DetachStep::Noop => volume.ok_or_else(|| DriverError::NotFound(dataset_id.to_string())),
            DetachStep::Detach { node_id, .. } => {
                let Some(current) = volume else {
                    return Err(DriverError::NotFound(dataset_id.to_string()));
                };
                self.detach_volume(&current, &node_id, &mut schedule)
                    .await?
                    .ok_or_else(|| DriverError::NotFound(dataset_id.to_string()))
            }
        }
    }

    /// Detaches `volume` from `node_id` and waits until the registry reports
    /// it unattached. Returns `None` if the volume vanished meanwhile.
    async fn detach_volume(
        &self,
        volume: &Volume,
        node_id: &NodeId,
        schedule: &mut PollSchedule,
    ) -> Result<Option<Volume>, DriverError> {
        let timeout = || DriverError::DetachTimeout {
            volume_id: volume.id.clone(),
            node_id: node_id.clone(),
        };
        match self.api.detach(&volume.id, node_id, &volume.region).await {
            Ok(action) => match self.settle(action, schedule).await? {
                Settlement::Completed => {}
                Settlement::Errored(failed) => {
                    return Err(DriverError::ActionFailed {
                        action_id: failed.id,
                        kind: failed.kind,
                    });
                }
                Settlement::Expired(_) => return Err(timeout()),
            },
            Err(ProviderError::NotFound { resource }) => {
                warn!(%resource, "detach target missing; re-reading volume");
            }
            Err(ProviderError::Conflict { message }) => {
                warn!(%message, "detach conflicted; re-reading volume");
            }
            Err(err) => return Err(err.into()),
        }

        match self
            .wait_for_dataset(&volume.dataset_id, schedule, |found| {
                found.is_none_or(|vol| !vol.is_attached())
            })
            .await?
        {
            Waited::Ready(current) => {
                info!(volume_id = %volume.id, %node_id, "volume detached");
                Ok(current)
            }
            Waited::Expired => Err(timeout()),
        }
    }

    /// Path of the block device for an attached dataset volume.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when no volume backs the dataset and
    /// [`DriverError::NotAttached`] when the volume is not attached.
    pub async fn device_path(&self, dataset_id: &DatasetId) -> Result<Utf8PathBuf, DriverError> {
        let Some(volume) = self.find_volume_for_dataset(dataset_id).await? else {
            return Err(DriverError::NotFound(dataset_id.to_string()));
        };
        if !volume.is_attached() {
            return Err(DriverError::NotAttached {
                volume_id: volume.id,
            });
        }
        Ok(Utf8PathBuf::from(DEVICE_DIRECTORY).join(format!("scsi-0DO_Volume_{}", volume.name)))
    }

    /// Identity of the node this process runs on.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the metadata service cannot be read.
    pub async fn local_node(&self) -> Result<LocalNode, DriverError> {
        Ok(self.api.local_node().await?)
    }

    /// Node id of the host, as used by [`Reconciler::attach`].
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the metadata service cannot be read.
    pub async fn compute_instance_id(&self) -> Result<NodeId, DriverError> {
        Ok(self.local_node().await?.id)
    }

    /// Ids of the nodes that are powered on.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the provider cannot be listed.
    pub async fn list_live_nodes(&self) -> Result<Vec<NodeId>, DriverError> {
        let nodes = self.api.list_nodes().await?;
        Ok(nodes
            .into_iter()
            .filter(ComputeNode::is_active)
            .map(|node| node.id)
            .collect())
    }

    /// Powers on `node_id` if needed and waits until the action settles.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::ActionTimeout`] when the power-on does not
    /// settle in time, [`DriverError::ActionFailed`] when it fails, and other
    /// [`DriverError`] variants for provider failures.
    #[instrument(skip_all, fields(node_id = %node_id))]
    pub async fn start_node(&self, node_id: &NodeId) -> Result<(), DriverError> {
        let mut schedule = self.schedule();
        let node = self.api.get_node(node_id).await?;
        if node.is_active() {
            return Ok(());
        }
        let action = self.api.power_on(node_id).await?;
        match self.settle(action, &mut schedule).await? {
            Settlement::Completed => {
                info!("node powered on");
                Ok(())
            }
            Settlement::Errored(failed) => Err(DriverError::ActionFailed {
                action_id: failed.id,
                kind: failed.kind,
            }),
            Settlement::Expired(pending) => Err(DriverError::ActionTimeout {
                action_id: pending.id,
                kind: pending.kind,
            }),
        }
    }
}
