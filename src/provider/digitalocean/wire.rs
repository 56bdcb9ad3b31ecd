//! JSON payloads exchanged with the DigitalOcean v2 API.

use serde::{Deserialize, Serialize};

use super::super::{
    Action, ActionId, ActionStatus, ComputeNode, GIB, LocalNode, NodeId, ProviderError,
    ProviderVolume, Region, VolumeId,
};

#[derive(Debug, Deserialize)]
pub(super) struct WireRegion {
    pub(super) slug: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireVolume {
    pub(super) id: String,
    pub(super) name: String,
    #[serde(default)]
    pub(super) description: Option<String>,
    pub(super) size_gigabytes: u64,
    pub(super) region: WireRegion,
    #[serde(default)]
    pub(super) droplet_ids: Option<Vec<u64>>,
}

impl From<WireVolume> for ProviderVolume {
    fn from(value: WireVolume) -> Self {
        Self {
            id: VolumeId::from(value.id),
            name: value.name,
            description: value.description.unwrap_or_default(),
            size_bytes: value.size_gigabytes.saturating_mul(GIB),
            region: Region::from(value.region.slug),
            attached_to: value
                .droplet_ids
                .unwrap_or_default()
                .into_iter()
                .map(|id| NodeId::from(id.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct VolumeEnvelope {
    pub(super) volume: WireVolume,
}

#[derive(Debug, Deserialize)]
pub(super) struct VolumePage {
    #[serde(default)]
    pub(super) volumes: Vec<WireVolume>,
    #[serde(default)]
    pub(super) links: Option<Links>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct Links {
    #[serde(default)]
    pub(super) pages: Option<Pages>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct Pages {
    #[serde(default)]
    pub(super) next: Option<String>,
}

/// Whether a paginated response advertises another page.
pub(super) fn has_next_page(links: Option<&Links>) -> bool {
    links
        .and_then(|link| link.pages.as_ref())
        .and_then(|pages| pages.next.as_ref())
        .is_some()
}

#[derive(Debug, Deserialize)]
pub(super) struct WireAction {
    pub(super) id: u64,
    pub(super) status: String,
    #[serde(rename = "type")]
    pub(super) kind: String,
    #[serde(default)]
    pub(super) resource_id: Option<u64>,
}

impl From<WireAction> for Action {
    fn from(value: WireAction) -> Self {
        Self {
            id: ActionId::from(value.id.to_string()),
            status: ActionStatus::from_wire(&value.status),
            kind: value.kind,
            resource_id: value.resource_id.map(|id| id.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ActionEnvelope {
    pub(super) action: WireAction,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireDroplet {
    pub(super) id: u64,
    pub(super) status: String,
    pub(super) region: WireRegion,
    #[serde(default)]
    pub(super) volume_ids: Vec<String>,
}

impl From<WireDroplet> for ComputeNode {
    fn from(value: WireDroplet) -> Self {
        Self {
            id: NodeId::from(value.id.to_string()),
            region: Region::from(value.region.slug),
            status: value.status,
            volume_ids: value.volume_ids.into_iter().map(VolumeId::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct DropletEnvelope {
    pub(super) droplet: WireDroplet,
}

#[derive(Debug, Deserialize)]
pub(super) struct DropletPage {
    #[serde(default)]
    pub(super) droplets: Vec<WireDroplet>,
    #[serde(default)]
    pub(super) links: Option<Links>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireMetadata {
    pub(super) droplet_id: u64,
    pub(super) region: String,
    #[serde(default)]
    pub(super) hostname: String,
}

impl From<WireMetadata> for LocalNode {
    fn from(value: WireMetadata) -> Self {
        Self {
            id: NodeId::from(value.droplet_id.to_string()),
            region: Region::from(value.region),
            hostname: value.hostname,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct WireError {
    pub(super) message: String,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateVolumeBody<'a> {
    pub(super) size_gigabytes: u64,
    pub(super) name: &'a str,
    pub(super) description: &'a str,
    pub(super) region: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct VolumeActionBody<'a> {
    #[serde(rename = "type")]
    pub(super) kind: &'static str,
    pub(super) droplet_id: u64,
    pub(super) region: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct DropletActionBody {
    #[serde(rename = "type")]
    pub(super) kind: &'static str,
}

/// Droplet ids are integers on the wire.
pub(super) fn droplet_id(node_id: &NodeId) -> Result<u64, ProviderError> {
    node_id.as_str().trim().parse().map_err(|_| {
        ProviderError::InvalidRequest(format!("node id '{node_id}' is not a droplet id"))
    })
}
