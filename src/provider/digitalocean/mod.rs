//! DigitalOcean implementation of [`BlockStorageApi`].
//!
//! Volume and droplet calls go straight to the v2 REST API with `reqwest`;
//! every request runs through the bounded retry loop in [`request`].

mod droplets;
mod request;
mod volumes;
mod wire;

use std::fmt;

use crate::config::{ConfigError, DriverConfig};
use crate::retry::RetryPolicy;

use super::{
    Action, ActionId, BlockStorageApi, ComputeNode, CreateVolumeRequest, LocalNode, NodeId,
    ProviderFuture, ProviderVolume, Region, VolumeId,
};

/// HTTP client for the DigitalOcean Block Storage and Droplet APIs.
#[derive(Clone)]
pub struct DigitalOceanClient {
    http: reqwest::Client,
    base_url: String,
    metadata_url: String,
    token: String,
    retry: RetryPolicy,
}

impl fmt::Debug for DigitalOceanClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalOceanClient")
            .field("base_url", &self.base_url)
            .field("metadata_url", &self.metadata_url)
            .field("token", &"<redacted>")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DigitalOceanClient {
    /// Constructs a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation or the
    /// HTTP client cannot be initialised.
    pub fn new(config: &DriverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|err| ConfigError::Invalid(format!("HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim().trim_end_matches('/').to_owned(),
            metadata_url: config.metadata_url.trim().to_owned(),
            token: config.api_token.trim().to_owned(),
            retry: config.retry_policy(),
        })
    }

    /// Retry policy applied to every request.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl BlockStorageApi for DigitalOceanClient {
    fn list_volumes<'a>(
        &'a self,
        region: Option<&'a Region>,
    ) -> ProviderFuture<'a, Vec<ProviderVolume>> {
        Box::pin(async move { self.fetch_volumes(region).await })
    }

    fn get_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ProviderVolume> {
        Box::pin(async move { self.fetch_volume(id).await })
    }

    fn create_volume<'a>(
        &'a self,
        request: &'a CreateVolumeRequest,
    ) -> ProviderFuture<'a, ProviderVolume> {
        Box::pin(async move { self.post_volume(request).await })
    }

    fn destroy_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ()> {
        Box::pin(async move { self.delete_volume(id).await })
    }

    fn attach<'a>(
        &'a self,
        volume_id: &'a VolumeId,
        node_id: &'a NodeId,
        region: &'a Region,
    ) -> ProviderFuture<'a, Action> {
        Box::pin(async move {
            self.volume_action(volume_id, node_id, region, volumes::VolumeActionKind::Attach)
                .await
        })
    }

    fn detach<'a>(
        &'a self,
        volume_id: &'a VolumeId,
        node_id: &'a NodeId,
        region: &'a Region,
    ) -> ProviderFuture<'a, Action> {
        Box::pin(async move {
            self.volume_action(volume_id, node_id, region, volumes::VolumeActionKind::Detach)
                .await
        })
    }

    fn get_action<'a>(&'a self, id: &'a ActionId) -> ProviderFuture<'a, Action> {
        Box::pin(async move { self.fetch_action(id).await })
    }

    fn get_node<'a>(&'a self, id: &'a NodeId) -> ProviderFuture<'a, ComputeNode> {
        Box::pin(async move { self.fetch_droplet(id).await })
    }

    fn list_nodes(&self) -> ProviderFuture<'_, Vec<ComputeNode>> {
        Box::pin(async move { self.fetch_droplets().await })
    }

    fn power_on<'a>(&'a self, id: &'a NodeId) -> ProviderFuture<'a, Action> {
        Box::pin(async move { self.droplet_power_on(id).await })
    }

    fn local_node(&self) -> ProviderFuture<'_, LocalNode> {
        Box::pin(async move { self.fetch_metadata().await })
    }
}

#[cfg(test)]
mod tests;
