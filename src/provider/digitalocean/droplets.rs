//! Droplet, action and metadata endpoints.

use super::super::{Action, ActionId, ComputeNode, LocalNode, NodeId, ProviderError};
use super::DigitalOceanClient;
use super::request::{decode, to_payload};
use super::wire::{
    ActionEnvelope, DropletActionBody, DropletEnvelope, DropletPage, WireMetadata, droplet_id,
    has_next_page,
};

const PAGE_SIZE: u32 = 200;

impl DigitalOceanClient {
    pub(super) async fn fetch_action(&self, id: &ActionId) -> Result<Action, ProviderError> {
        let envelope: ActionEnvelope = self.get_json(&self.url(&format!("actions/{id}"))).await?;
        Ok(envelope.action.into())
    }

    pub(super) async fn fetch_droplet(&self, id: &NodeId) -> Result<ComputeNode, ProviderError> {
        let numeric = droplet_id(id)?;
        let envelope: DropletEnvelope = self
            .get_json(&self.url(&format!("droplets/{numeric}")))
            .await?;
        Ok(envelope.droplet.into())
    }

    pub(super) async fn fetch_droplets(&self) -> Result<Vec<ComputeNode>, ProviderError> {
        let mut nodes = Vec::new();
        let mut page: u32 = 1;
        loop {
            let url = self.url(&format!("droplets?per_page={PAGE_SIZE}&page={page}"));
            let listing: DropletPage = self.get_json(&url).await?;
            let more = has_next_page(listing.links.as_ref()) && !listing.droplets.is_empty();
            nodes.extend(listing.droplets.into_iter().map(ComputeNode::from));
            if !more {
                return Ok(nodes);
            }
            page = page.saturating_add(1);
        }
    }

    pub(super) async fn droplet_power_on(&self, id: &NodeId) -> Result<Action, ProviderError> {
        let numeric = droplet_id(id)?;
        let payload = to_payload(&DropletActionBody { kind: "power_on" })?;
        let url = self.url(&format!("droplets/{numeric}/actions"));
        let envelope: ActionEnvelope = self.post_json(&url, &payload).await?;
        Ok(envelope.action.into())
    }

    /// The metadata service is link-local and unauthenticated.
    pub(super) async fn fetch_metadata(&self) -> Result<LocalNode, ProviderError> {
        let body = self
            .send(reqwest::Method::GET, &self.metadata_url, None, false)
            .await?;
        let metadata: WireMetadata = decode(&body)?;
        Ok(metadata.into())
    }
}
