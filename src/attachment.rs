//! Per-dataset transition planning.
//!
//! Nothing here talks to the provider. Each `plan_*` function takes the
//! observed state of one dataset (and, for attach, the target node) and
//! names the single next provider call the engine must make, or rejects
//! the transition with a typed error before anything is mutated.
//!
//! ```text
//! Absent -> (create) -> Unattached -> (attach) -> Attached(node)
//! Attached(node) -> (detach) -> Unattached -> (destroy) -> Absent
//! ```

use crate::error::DriverError;
use crate::provider::{ComputeNode, NodeId, VolumeId};
use crate::registry::Volume;

/// Most volumes the provider attaches to one node at a time.
pub const MAX_ATTACHMENTS_PER_NODE: usize = 5;

/// Observed state of one dataset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DatasetState {
    /// No volume backs the dataset.
    Absent,
    /// A volume exists and is not attached.
    Unattached,
    /// The volume is attached to the given node.
    Attached(NodeId),
}

impl DatasetState {
    /// Derives the state from the registry's view of the dataset.
    #[must_use]
    pub fn observe(volume: Option<&Volume>) -> Self {
        match volume {
            None => Self::Absent,
            Some(found) => found
                .attached_to
                .clone()
                .map_or(Self::Unattached, Self::Attached),
        }
    }
}

/// Next step towards `Attached(target)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttachStep {
    /// Already attached to the target node.
    Noop,
    /// Issue an attach action for the volume.
    Attach {
        /// Volume to attach.
        volume_id: VolumeId,
    },
}

/// Next step towards `Unattached`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DetachStep {
    /// Already unattached.
    Noop,
    /// Issue a detach action from the node the volume is attached to.
    Detach {
        /// Volume to detach.
        volume_id: VolumeId,
        /// Node the volume is currently attached to.
        node_id: NodeId,
    },
}

/// Next step towards `Absent`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DestroyStep {
    /// Nothing to destroy.
    Noop,
    /// Detach from the node first; destroy is planned again afterwards.
    Detach {
        /// Volume to detach.
        volume_id: VolumeId,
        /// Node the volume is currently attached to.
        node_id: NodeId,
    },
    /// Destroy the unattached volume.
    Destroy {
        /// Volume to destroy.
        volume_id: VolumeId,
    },
}

/// Plans an attach of `volume` to `target`.
///
/// `attached_count` is the number of volumes the provider currently reports
/// on the target node; it is read just before calling this.
///
/// # Errors
///
/// - [`DriverError::NotFound`] when no volume backs the dataset.
/// - [`DriverError::Conflict`] when the volume is attached to another node.
/// - [`DriverError::RegionMismatch`] when the volume and node regions differ.
/// - [`DriverError::CapacityExceeded`] when the node has no free slot.
pub fn plan_attach(
    volume: Option<&Volume>,
    target: &ComputeNode,
    attached_count: usize,
) -> Result<AttachStep, DriverError> {
    let Some(found) = volume else {
        return Err(DriverError::NotFound(String::from("dataset volume")));
    };
    match &found.attached_to {
        Some(node) if *node == target.id => return Ok(AttachStep::Noop),
        Some(node) => {
            return Err(DriverError::Conflict(format!(
                "volume {} is attached to node {node}, not {}",
                found.id, target.id
            )));
        }
        None => {}
    }
    if found.region != target.region {
        return Err(DriverError::RegionMismatch {
            volume_id: found.id.clone(),
            volume_region: found.region.clone(),
            node_id: target.id.clone(),
            node_region: target.region.clone(),
        });
    }
    if attached_count >= MAX_ATTACHMENTS_PER_NODE {
        return Err(DriverError::CapacityExceeded {
            node_id: target.id.clone(),
            attached: attached_count,
            limit: MAX_ATTACHMENTS_PER_NODE,
        });
    }
    Ok(AttachStep::Attach {
        volume_id: found.id.clone(),
    })
}

/// Plans a detach of `volume` from whatever node holds it.
///
/// # Errors
///
/// Returns [`DriverError::NotFound`] when no volume backs the dataset.
pub fn plan_detach(volume: Option<&Volume>) -> Result<DetachStep, DriverError> {
    let Some(found) = volume else {
        return Err(DriverError::NotFound(String::from("dataset volume")));
    };
    Ok(found
        .attached_to
        .as_ref()
        .map_or(DetachStep::Noop, |node| DetachStep::Detach {
            volume_id: found.id.clone(),
            node_id: node.clone(),
        }))
}

/// Plans the next step of destroying `volume`. An absent volume is already
/// destroyed.
#[must_use]
pub fn plan_destroy(volume: Option<&Volume>) -> DestroyStep {
    match volume {
        None => DestroyStep::Noop,
        Some(found) => match &found.attached_to {
            Some(node) => DestroyStep::Detach {
                volume_id: found.id.clone(),
                node_id: node.clone(),
            },
            None => DestroyStep::Destroy {
                volume_id: found.id.clone(),
            },
        },
    }
}
