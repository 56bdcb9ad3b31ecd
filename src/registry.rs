//! Dataset view of the provider's volumes.
//!
//! The registry never caches: every query lists the provider's volumes and
//! keeps those whose name embeds a dataset id (and, when a cluster id is
//! configured, whose description names this cluster). A
//! [`RegistrySnapshot`] is the result of one such listing and lives only as
//! long as the engine call that took it.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::{debug, warn};

use crate::naming::{DatasetId, VolumeNaming};
use crate::provider::{BlockStorageApi, NodeId, ProviderError, ProviderVolume, Region, VolumeId};

/// A provider volume owned by the driver, keyed by its dataset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Provider volume identifier.
    pub id: VolumeId,
    /// Dataset the volume backs.
    pub dataset_id: DatasetId,
    /// Provider volume name.
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Region the volume lives in.
    pub region: Region,
    /// Node the volume is attached to, if any.
    pub attached_to: Option<NodeId>,
}

impl Volume {
    fn from_provider(dataset_id: DatasetId, volume: ProviderVolume) -> Self {
        Self {
            id: volume.id,
            dataset_id,
            name: volume.name,
            size_bytes: volume.size_bytes,
            region: volume.region,
            attached_to: volume.attached_to.into_iter().next(),
        }
    }

    /// Whether the volume is attached to any node.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.attached_to.is_some()
    }
}

/// How the registry treats a provider volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ownership {
    /// Follows the naming convention and belongs to this cluster.
    Owned(DatasetId),
    /// Does not follow the naming convention.
    Foreign,
    /// Follows the naming convention but is stamped with another cluster id.
    OtherCluster(DatasetId),
}

/// Volumes owned by the driver at one point in time.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RegistrySnapshot {
    volumes: BTreeMap<DatasetId, Volume>,
}

impl RegistrySnapshot {
    /// Volume backing `dataset_id`, if any.
    #[must_use]
    pub fn get(&self, dataset_id: &DatasetId) -> Option<&Volume> {
        self.volumes.get(dataset_id)
    }

    /// Iterates over owned volumes in dataset order.
    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values()
    }

    /// Consumes the snapshot into `(dataset, volume)` pairs.
    #[must_use]
    pub fn into_pairs(self) -> Vec<(DatasetId, Volume)> {
        self.volumes.into_iter().collect()
    }

    /// Number of owned volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Whether no owned volume exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Inserts a volume. When two volumes claim the same dataset (a create
    /// that was resent after a timeout), the attached one wins, then the
    /// lowest id, so repeated listings agree.
    fn insert(&mut self, volume: Volume) {
        match self.volumes.entry(volume.dataset_id) {
            Entry::Vacant(slot) => {
                slot.insert(volume);
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                warn!(
                    dataset_id = %volume.dataset_id,
                    kept = %current.id,
                    other = %volume.id,
                    "multiple volumes claim one dataset"
                );
                let replace = match (current.is_attached(), volume.is_attached()) {
                    (false, true) => true,
                    (true, false) => false,
                    _ => volume.id < current.id,
                };
                if replace {
                    slot.insert(volume);
                }
            }
        }
    }
}

impl FromIterator<Volume> for RegistrySnapshot {
    fn from_iter<I: IntoIterator<Item = Volume>>(iter: I) -> Self {
        let mut snapshot = Self::default();
        for volume in iter {
            snapshot.insert(volume);
        }
        snapshot
    }
}

/// Queries the provider and interprets volumes as datasets.
#[derive(Debug)]
pub struct VolumeRegistry<'a, A: ?Sized> {
    api: &'a A,
    naming: &'a VolumeNaming,
    cluster_description: Option<&'a str>,
}

impl<'a, A: BlockStorageApi + ?Sized> VolumeRegistry<'a, A> {
    /// Creates a registry over `api`. Volumes are only recognised when their
    /// description equals `cluster_description`, if one is given.
    #[must_use]
    pub const fn new(
        api: &'a A,
        naming: &'a VolumeNaming,
        cluster_description: Option<&'a str>,
    ) -> Self {
        Self {
            api,
            naming,
            cluster_description,
        }
    }

    /// Decides whether the driver owns `volume`.
    #[must_use]
    pub fn classify(&self, volume: &ProviderVolume) -> Ownership {
        let Ok(dataset_id) = self.naming.parse(&volume.name) else {
            return Ownership::Foreign;
        };
        match self.cluster_description {
            Some(expected) if volume.description != expected => {
                Ownership::OtherCluster(dataset_id)
            }
            _ => Ownership::Owned(dataset_id),
        }
    }

    /// Lists the provider's volumes and keeps those owned by the driver.
    ///
    /// # Errors
    ///
    /// Propagates [`ProviderError`] from the listing call.
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, ProviderError> {
        let listed = self.api.list_volumes(None).await?;
        let mut ignored = 0_usize;
        let mut owned = Vec::with_capacity(listed.len());
        for volume in listed {
            match self.classify(&volume) {
                Ownership::Owned(dataset_id) => {
                    owned.push(Volume::from_provider(dataset_id, volume));
                }
                Ownership::Foreign => ignored += 1,
                Ownership::OtherCluster(dataset_id) => warn!(
                    volume = %volume.name,
                    %dataset_id,
                    description = %volume.description,
                    "volume follows naming convention but is not owned by this cluster"
                ),
            }
        }
        if ignored > 0 {
            debug!(ignored, "ignored unrelated volumes");
        }
        Ok(owned.into_iter().collect())
    }

    /// Returns the volume backing `dataset_id`, if any.
    ///
    /// # Errors
    ///
    /// Propagates [`ProviderError`] from the listing call.
    pub async fn find_volume_for_dataset(
        &self,
        dataset_id: &DatasetId,
    ) -> Result<Option<Volume>, ProviderError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.get(dataset_id).cloned())
    }

    /// Returns every volume owned by the driver.
    ///
    /// # Errors
    ///
    /// Propagates [`ProviderError`] from the listing call.
    pub async fn all_volumes(&self) -> Result<Vec<Volume>, ProviderError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.volumes().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::GIB;
    use crate::test_support::FakeProvider;

    const CLUSTER: &str = "flocker-v1-cluster-id: c1";

    fn provider_volume(id: &str, name: &str, description: &str, node: Option<&str>) -> ProviderVolume {
        ProviderVolume {
            id: VolumeId::from(id),
            name: name.to_owned(),
            description: description.to_owned(),
            size_bytes: 50 * GIB,
            region: Region::from("oxia-planum"),
            attached_to: node.into_iter().map(NodeId::from).collect(),
        }
    }

    fn dataset(value: &str) -> DatasetId {
        value
            .parse()
            .unwrap_or_else(|err| panic!("dataset fixture: {err}"))
    }

    #[test]
    fn classify_sorts_owned_foreign_and_other_cluster() {
        let api = FakeProvider::new();
        let naming = VolumeNaming::default();
        let registry = VolumeRegistry::new(&api, &naming, Some(CLUSTER));

        let owned = provider_volume(
            "1234",
            "flocker-v1-0ff663594f6347c8a950ff5de6f6225e",
            CLUSTER,
            Some("42"),
        );
        let foreign = provider_volume("1236", "custom-volume", CLUSTER, None);
        let other = provider_volume(
            "1237",
            "flocker-v1-bd4c3b596fc34f75a8e69f314404f6a6",
            "this-is-not-a-cluster-volume",
            None,
        );

        assert_eq!(
            registry.classify(&owned),
            Ownership::Owned(dataset("0ff66359-4f63-47c8-a950-ff5de6f6225e"))
        );
        assert_eq!(registry.classify(&foreign), Ownership::Foreign);
        assert_eq!(
            registry.classify(&other),
            Ownership::OtherCluster(dataset("bd4c3b59-6fc3-4f75-a8e6-9f314404f6a6"))
        );
    }

    #[test]
    fn classify_ignores_description_without_cluster_id() {
        let api = FakeProvider::new();
        let naming = VolumeNaming::default();
        let registry = VolumeRegistry::new(&api, &naming, None);
        let volume = provider_volume(
            "1",
            "flocker-v1-bd4c3b596fc34f75a8e69f314404f6a6",
            "anything",
            None,
        );
        assert!(matches!(registry.classify(&volume), Ownership::Owned(_)));
    }

    #[tokio::test]
    async fn all_volumes_lists_owned_volumes_in_dataset_order() {
        let api = FakeProvider::new();
        let naming = VolumeNaming::default();
        let registry = VolumeRegistry::new(&api, &naming, None);
        assert!(registry.snapshot().await.expect("snapshot").is_empty());
        assert!(registry.all_volumes().await.expect("listing").is_empty());

        api.seed_volume(provider_volume(
            "2",
            "flocker-v1-bd4c3b596fc34f75a8e69f314404f6a6",
            "",
            None,
        ));
        api.seed_volume(provider_volume("3", "custom-volume", "", Some("42")));
        api.seed_volume(provider_volume(
            "1",
            "flocker-v1-0ff663594f6347c8a950ff5de6f6225e",
            "",
            Some("42"),
        ));

        let volumes = registry.all_volumes().await.expect("listing");
        let ids: Vec<&str> = volumes.iter().map(|vol| vol.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(
            volumes.first().map(|vol| vol.dataset_id),
            Some(dataset("0ff66359-4f63-47c8-a950-ff5de6f6225e"))
        );
    }

    #[tokio::test]
    async fn snapshot_keeps_only_owned_volumes() {
        let api = FakeProvider::new();
        api.seed_volume(provider_volume(
            "1234",
            "flocker-v1-0ff663594f6347c8a950ff5de6f6225e",
            CLUSTER,
            Some("42"),
        ));
        api.seed_volume(provider_volume(
            "1235",
            "flocker-v1-55eacb0e962c4c60911fb43d34ec3f85",
            CLUSTER,
            None,
        ));
        api.seed_volume(provider_volume("1236", "custom-volume", CLUSTER, None));
        api.seed_volume(provider_volume(
            "1237",
            "flocker-v1-bd4c3b596fc34f75a8e69f314404f6a6",
            "this-is-not-a-cluster-volume",
            None,
        ));
        let naming = VolumeNaming::default();
        let registry = VolumeRegistry::new(&api, &naming, Some(CLUSTER));

        let snapshot = registry.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.len(), 2);
        let attached = snapshot
            .get(&dataset("0ff66359-4f63-47c8-a950-ff5de6f6225e"))
            .expect("owned volume present");
        assert_eq!(attached.attached_to, Some(NodeId::from("42")));
        assert_eq!(attached.size_bytes, 53_687_091_200);

        let missing = registry
            .find_volume_for_dataset(&dataset("bd4c3b59-6fc3-4f75-a8e6-9f314404f6a6"))
            .await
            .expect("lookup");
        assert_eq!(missing, None);
    }

    #[test]
    fn duplicate_claims_prefer_attached_then_lowest_id() {
        let id = dataset("55eacb0e-962c-4c60-911f-b43d34ec3f85");
        let volume = |vol_id: &str, node: Option<&str>| Volume {
            id: VolumeId::from(vol_id),
            dataset_id: id,
            name: String::from("flocker-v1-55eacb0e962c4c60911fb43d34ec3f85"),
            size_bytes: GIB,
            region: Region::from("ams3"),
            attached_to: node.map(NodeId::from),
        };

        let by_attachment: RegistrySnapshot =
            [volume("a", None), volume("b", Some("7"))].into_iter().collect();
        assert_eq!(by_attachment.get(&id).map(|vol| vol.id.as_str()), Some("b"));

        let by_id: RegistrySnapshot = [volume("z", None), volume("c", None)].into_iter().collect();
        assert_eq!(by_id.get(&id).map(|vol| vol.id.as_str()), Some("c"));
        assert_eq!(by_id.len(), 1);
    }
}
