//! Block Storage volume endpoints.

use reqwest::Method;
use tracing::debug;

use super::super::{
    Action, CreateVolumeRequest, NodeId, ProviderError, ProviderVolume, Region, VolumeId,
};
use super::DigitalOceanClient;
use super::request::to_payload;
use super::wire::{
    ActionEnvelope, CreateVolumeBody, VolumeActionBody, VolumeEnvelope, VolumePage, droplet_id,
    has_next_page,
};

const PAGE_SIZE: u32 = 200;

#[derive(Copy, Clone, Debug)]
pub(super) enum VolumeActionKind {
    Attach,
    Detach,
}

impl VolumeActionKind {
    const fn as_wire(self) -> &'static str {
        match self {
            Self::Attach => "attach",
            Self::Detach => "detach",
        }
    }
}

impl DigitalOceanClient {
    pub(super) async fn fetch_volumes(
        &self,
        region: Option<&Region>,
    ) -> Result<Vec<ProviderVolume>, ProviderError> {
        let mut volumes = Vec::new();
        let mut page: u32 = 1;
        loop {
            let mut url = self.url(&format!("volumes?per_page={PAGE_SIZE}&page={page}"));
            if let Some(slug) = region {
                url.push_str("&region=");
                url.push_str(slug.as_str());
            }
            let listing: VolumePage = self.get_json(&url).await?;
            let more = has_next_page(listing.links.as_ref()) && !listing.volumes.is_empty();
            volumes.extend(listing.volumes.into_iter().map(ProviderVolume::from));
            if !more {
                break;
            }
            page = page.saturating_add(1);
        }
        debug!(count = volumes.len(), "listed provider volumes");
        Ok(volumes)
    }

    pub(super) async fn fetch_volume(&self, id: &VolumeId) -> Result<ProviderVolume, ProviderError> {
        let url = self.url(&format!("volumes/{id}"));
        let envelope: VolumeEnvelope = self.get_json(&url).await?;
        Ok(envelope.volume.into())
    }

    pub(super) async fn post_volume(
        &self,
        request: &CreateVolumeRequest,
    ) -> Result<ProviderVolume, ProviderError> {
        let payload = to_payload(&CreateVolumeBody {
            size_gigabytes: request.size_gib,
            name: &request.name,
            description: &request.description,
            region: request.region.as_str(),
        })?;
        let envelope: VolumeEnvelope = self.post_json(&self.url("volumes"), &payload).await?;
        Ok(envelope.volume.into())
    }

    pub(super) async fn delete_volume(&self, id: &VolumeId) -> Result<(), ProviderError> {
        let url = self.url(&format!("volumes/{id}"));
        self.send(Method::DELETE, &url, None, true).await?;
        Ok(())
    }

    pub(super) async fn volume_action(
        &self,
        volume_id: &VolumeId,
        node_id: &NodeId,
        region: &Region,
        kind: VolumeActionKind,
    ) -> Result<Action, ProviderError> {
        let payload = to_payload(&VolumeActionBody {
            kind: kind.as_wire(),
            droplet_id: droplet_id(node_id)?,
            region: region.as_str(),
        })?;
        let url = self.url(&format!("volumes/{volume_id}/actions"));
        let envelope: ActionEnvelope = self.post_json(&url, &payload).await?;
        Ok(envelope.action.into())
    }
}
