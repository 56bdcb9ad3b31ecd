//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::attachment::MAX_ATTACHMENTS_PER_NODE;
use crate::config::DriverConfig;
use crate::provider::{
    Action, ActionId, ActionStatus, BlockStorageApi, ComputeNode, CreateVolumeRequest, GIB,
    LocalNode, NodeId, ProviderError, ProviderFuture, ProviderVolume, Region, VolumeId,
};

/// Configuration pointing at `base_url` with small retry delays.
#[must_use]
pub fn driver_config(base_url: &str) -> DriverConfig {
    DriverConfig {
        api_token: String::from("test-token"),
        region: String::from("ams3"),
        cluster_id: None,
        volume_prefix: String::from("flocker-v1"),
        api_base_url: base_url.to_owned(),
        metadata_url: format!("{}/metadata/v1.json", base_url.trim_end_matches('/')),
        max_attempts: 3,
        backoff_base_ms: 10,
        backoff_cap_ms: 40,
        poll_interval_ms: 1_000,
        max_poll_interval_ms: 5_000,
        operation_timeout_secs: 300,
        http_timeout_secs: 5,
    }
}

/// Provider operations, used to target injected failures.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    /// [`BlockStorageApi::list_volumes`].
    ListVolumes,
    /// [`BlockStorageApi::get_volume`].
    GetVolume,
    /// [`BlockStorageApi::create_volume`].
    CreateVolume,
    /// [`BlockStorageApi::destroy_volume`].
    DestroyVolume,
    /// [`BlockStorageApi::attach`].
    Attach,
    /// [`BlockStorageApi::detach`].
    Detach,
    /// [`BlockStorageApi::get_action`].
    GetAction,
    /// [`BlockStorageApi::get_node`].
    GetNode,
    /// [`BlockStorageApi::list_nodes`].
    ListNodes,
    /// [`BlockStorageApi::power_on`].
    PowerOn,
    /// [`BlockStorageApi::local_node`].
    LocalNode,
}

/// Records a single call made through [`FakeProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// Volume listing.
    ListVolumes,
    /// Single volume read.
    GetVolume(VolumeId),
    /// Volume creation.
    CreateVolume(CreateVolumeRequest),
    /// Volume deletion.
    DestroyVolume(VolumeId),
    /// Attach action.
    Attach {
        /// Volume being attached.
        volume_id: VolumeId,
        /// Target node.
        node_id: NodeId,
    },
    /// Detach action.
    Detach {
        /// Volume being detached.
        volume_id: VolumeId,
        /// Node the volume was attached to.
        node_id: NodeId,
    },
    /// Action poll.
    GetAction(ActionId),
    /// Single node read.
    GetNode(NodeId),
    /// Node listing.
    ListNodes,
    /// Power-on action.
    PowerOn(NodeId),
    /// Metadata read.
    LocalNode,
}

impl ProviderCall {
    /// Whether the call changes provider state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::CreateVolume(_)
                | Self::DestroyVolume(_)
                | Self::Attach { .. }
                | Self::Detach { .. }
                | Self::PowerOn(_)
        )
    }
}

#[derive(Clone, Debug)]
enum Effect {
    Attach { volume_id: VolumeId, node_id: NodeId },
    Detach { volume_id: VolumeId },
    PowerOn { node_id: NodeId },
}

#[derive(Debug)]
struct PendingAction {
    action: Action,
    polls_left: u32,
    outcome: ActionStatus,
    effect: Effect,
}

#[derive(Debug)]
struct StoredVolume {
    volume: ProviderVolume,
    hidden_listings: u32,
}

#[derive(Debug)]
struct FakeNode {
    region: Region,
    status: String,
    foreign_volumes: Vec<VolumeId>,
}

#[derive(Debug)]
struct FakeState {
    volumes: BTreeMap<VolumeId, StoredVolume>,
    nodes: BTreeMap<NodeId, FakeNode>,
    actions: BTreeMap<ActionId, PendingAction>,
    failures: VecDeque<(Operation, ProviderError)>,
    calls: Vec<ProviderCall>,
    local: Option<LocalNode>,
    next_volume: u64,
    next_action: u64,
    action_polls: u32,
    action_outcome: ActionStatus,
    listing_lag: u32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            volumes: BTreeMap::new(),
            nodes: BTreeMap::new(),
            actions: BTreeMap::new(),
            failures: VecDeque::new(),
            calls: Vec::new(),
            local: None,
            next_volume: 100,
            next_action: 1,
            action_polls: 1,
            action_outcome: ActionStatus::Completed,
            listing_lag: 0,
        }
    }
}

impl FakeState {
    fn take_failure(&mut self, operation: Operation) -> Result<(), ProviderError> {
        let Some(position) = self.failures.iter().position(|(op, _)| *op == operation) else {
            return Ok(());
        };
        match self.failures.remove(position) {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    fn attached_to(&self, node_id: &NodeId) -> Vec<VolumeId> {
        let mut ids: Vec<VolumeId> = self
            .nodes
            .get(node_id)
            .map(|node| node.foreign_volumes.clone())
            .unwrap_or_default();
        ids.extend(
            self.volumes
                .values()
                .filter(|stored| stored.volume.attached_to.contains(node_id))
                .map(|stored| stored.volume.id.clone()),
        );
        ids
    }

    fn compute_node(&self, node_id: &NodeId) -> Result<ComputeNode, ProviderError> {
        let node = self.nodes.get(node_id).ok_or_else(|| ProviderError::NotFound {
            resource: format!("droplets/{node_id}"),
        })?;
        Ok(ComputeNode {
            id: node_id.clone(),
            region: node.region.clone(),
            status: node.status.clone(),
            volume_ids: self.attached_to(node_id),
        })
    }

    fn volume_mut(&mut self, id: &VolumeId) -> Result<&mut ProviderVolume, ProviderError> {
        self.volumes
            .get_mut(id)
            .map(|stored| &mut stored.volume)
            .ok_or_else(|| ProviderError::NotFound {
                resource: format!("volumes/{id}"),
            })
    }

    fn apply(&mut self, effect: &Effect) {
        match effect {
            Effect::Attach { volume_id, node_id } => {
                if let Ok(volume) = self.volume_mut(volume_id) {
                    volume.attached_to = vec![node_id.clone()];
                }
            }
            Effect::Detach { volume_id } => {
                if let Ok(volume) = self.volume_mut(volume_id) {
                    volume.attached_to.clear();
                }
            }
            Effect::PowerOn { node_id } => {
                if let Some(node) = self.nodes.get_mut(node_id) {
                    node.status = String::from("active");
                }
            }
        }
    }

    fn start_action(&mut self, kind: &str, resource: &str, effect: Effect) -> Action {
        let id = ActionId::new(self.next_action.to_string());
        self.next_action = self.next_action.saturating_add(1);
        let mut action = Action {
            id: id.clone(),
            status: ActionStatus::InProgress,
            kind: kind.to_owned(),
            resource_id: Some(resource.to_owned()),
        };
        if self.action_polls == 0 {
            action.status = self.action_outcome;
            if self.action_outcome == ActionStatus::Completed {
                self.apply(&effect);
            }
        }
        self.actions.insert(
            id,
            PendingAction {
                action: action.clone(),
                polls_left: self.action_polls,
                outcome: self.action_outcome,
                effect,
            },
        );
        action
    }

    fn poll_action(&mut self, id: &ActionId) -> Result<Action, ProviderError> {
        let pending = self.actions.get_mut(id).ok_or_else(|| ProviderError::NotFound {
            resource: format!("actions/{id}"),
        })?;
        if pending.action.status != ActionStatus::InProgress {
            return Ok(pending.action.clone());
        }
        pending.polls_left = pending.polls_left.saturating_sub(1);
        if pending.polls_left > 0 {
            return Ok(pending.action.clone());
        }
        pending.action.status = pending.outcome;
        let action = pending.action.clone();
        let effect = pending.effect.clone();
        if action.status == ActionStatus::Completed {
            self.apply(&effect);
        }
        Ok(action)
    }
}

/// In-memory block storage provider.
///
/// Volume ids are assigned as `v-100`, `v-101`, and so on. Attach, detach
/// and power-on actions take effect when they settle, after a configurable
/// number of polls. The fake enforces the provider's own rules: at most
/// [`MAX_ATTACHMENTS_PER_NODE`] volumes per node, one node per volume, same
/// region for volume and node, and no deletion of attached volumes.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    /// Creates an empty provider whose actions settle on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an active node in `region`.
    pub fn add_node(&self, id: &str, region: &str) {
        self.add_node_with_status(id, region, "active");
    }

    /// Registers a node with an explicit power status.
    pub fn add_node_with_status(&self, id: &str, region: &str, status: &str) {
        self.state().nodes.insert(
            NodeId::from(id),
            FakeNode {
                region: Region::from(region),
                status: status.to_owned(),
                foreign_volumes: Vec::new(),
            },
        );
    }

    /// Occupies `count` attachment slots on `node` with volumes the driver
    /// does not own.
    pub fn occupy_slots(&self, node: &str, count: usize) {
        let mut state = self.state();
        let node_id = NodeId::from(node);
        let Some(entry) = state.nodes.get_mut(&node_id) else {
            return;
        };
        let start = entry.foreign_volumes.len();
        entry
            .foreign_volumes
            .extend((start..start + count).map(|slot| VolumeId::new(format!("foreign-{node}-{slot}"))));
    }

    /// Inserts a volume as if created out of band.
    pub fn seed_volume(&self, volume: ProviderVolume) {
        self.state().volumes.insert(
            volume.id.clone(),
            StoredVolume {
                volume,
                hidden_listings: 0,
            },
        );
    }

    /// Sets the number of polls an action needs before it settles. Zero
    /// settles actions as soon as they are issued; `u32::MAX` never settles.
    pub fn set_action_polls(&self, polls: u32) {
        self.state().action_polls = polls;
    }

    /// Sets the status actions settle into.
    pub fn set_action_outcome(&self, outcome: ActionStatus) {
        self.state().action_outcome = outcome;
    }

    /// Hides newly created volumes from the next `listings` volume listings.
    pub fn set_listing_lag(&self, listings: u32) {
        self.state().listing_lag = listings;
    }

    /// Sets the identity returned by [`BlockStorageApi::local_node`].
    pub fn set_local_node(&self, node: LocalNode) {
        self.state().local = Some(node);
    }

    /// Makes the next call of `operation` fail with `error`. Failures queue
    /// per operation.
    pub fn fail_next(&self, operation: Operation, error: ProviderError) {
        self.state().failures.push_back((operation, error));
    }

    /// Every volume the provider holds, in id order.
    #[must_use]
    pub fn volumes(&self) -> Vec<ProviderVolume> {
        self.state()
            .volumes
            .values()
            .map(|stored| stored.volume.clone())
            .collect()
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    /// Returns recorded calls that change provider state.
    #[must_use]
    pub fn mutating_calls(&self) -> Vec<ProviderCall> {
        self.calls()
            .into_iter()
            .filter(ProviderCall::is_mutating)
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn begin(&self, call: ProviderCall, operation: Operation) -> Result<MutexGuard<'_, FakeState>, ProviderError> {
        let mut state = self.state();
        state.calls.push(call);
        state.take_failure(operation)?;
        Ok(state)
    }

    fn list(&self) -> Result<Vec<ProviderVolume>, ProviderError> {
        let mut state = self.begin(ProviderCall::ListVolumes, Operation::ListVolumes)?;
        let mut listed = Vec::new();
        for stored in state.volumes.values_mut() {
            if stored.hidden_listings > 0 {
                stored.hidden_listings -= 1;
                continue;
            }
            listed.push(stored.volume.clone());
        }
        Ok(listed)
    }

    fn create(&self, request: &CreateVolumeRequest) -> Result<ProviderVolume, ProviderError> {
        let mut state = self.begin(
            ProviderCall::CreateVolume(request.clone()),
            Operation::CreateVolume,
        )?;
        if state
            .volumes
            .values()
            .any(|stored| stored.volume.name == request.name)
        {
            return Err(ProviderError::Conflict {
                message: format!("a volume named {} already exists", request.name),
            });
        }
        let id = VolumeId::new(format!("v-{}", state.next_volume));
        state.next_volume = state.next_volume.saturating_add(1);
        let volume = ProviderVolume {
            id: id.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            size_bytes: request.size_gib.saturating_mul(GIB),
            region: request.region.clone(),
            attached_to: Vec::new(),
        };
        let hidden_listings = state.listing_lag;
        state.volumes.insert(
            id,
            StoredVolume {
                volume: volume.clone(),
                hidden_listings,
            },
        );
        Ok(volume)
    }

    fn destroy(&self, id: &VolumeId) -> Result<(), ProviderError> {
        let mut state = self.begin(ProviderCall::DestroyVolume(id.clone()), Operation::DestroyVolume)?;
        let attached = !state.volume_mut(id)?.attached_to.is_empty();
        if attached {
            return Err(ProviderError::Conflict {
                message: format!("volume {id} is attached"),
            });
        }
        state.volumes.remove(id);
        Ok(())
    }

    fn attach_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &NodeId,
        region: &Region,
    ) -> Result<Action, ProviderError> {
        let mut state = self.begin(
            ProviderCall::Attach {
                volume_id: volume_id.clone(),
                node_id: node_id.clone(),
            },
            Operation::Attach,
        )?;
        let node = state.compute_node(node_id)?;
        let volume = state.volume_mut(volume_id)?.clone();
        if !volume.attached_to.is_empty() {
            return Err(ProviderError::Conflict {
                message: format!("volume {volume_id} is already attached"),
            });
        }
        if volume.region != node.region || volume.region != *region {
            return Err(ProviderError::Rejected {
                status: 422,
                message: format!("volume {volume_id} and droplet {node_id} are in different regions"),
            });
        }
        if node.volume_ids.len() >= MAX_ATTACHMENTS_PER_NODE {
            return Err(ProviderError::Conflict {
                message: format!("droplet {node_id} already has the maximum number of volumes"),
            });
        }
        Ok(state.start_action(
            "attach",
            volume_id.as_str(),
            Effect::Attach {
                volume_id: volume_id.clone(),
                node_id: node_id.clone(),
            },
        ))
    }

    fn detach_volume(&self, volume_id: &VolumeId, node_id: &NodeId) -> Result<Action, ProviderError> {
        let mut state = self.begin(
            ProviderCall::Detach {
                volume_id: volume_id.clone(),
                node_id: node_id.clone(),
            },
            Operation::Detach,
        )?;
        let volume = state.volume_mut(volume_id)?;
        if !volume.attached_to.contains(node_id) {
            return Err(ProviderError::Conflict {
                message: format!("volume {volume_id} is not attached to droplet {node_id}"),
            });
        }
        Ok(state.start_action(
            "detach",
            volume_id.as_str(),
            Effect::Detach {
                volume_id: volume_id.clone(),
            },
        ))
    }

    fn power_on_node(&self, id: &NodeId) -> Result<Action, ProviderError> {
        let mut state = self.begin(ProviderCall::PowerOn(id.clone()), Operation::PowerOn)?;
        state.compute_node(id)?;
        Ok(state.start_action(
            "power_on",
            id.as_str(),
            Effect::PowerOn { node_id: id.clone() },
        ))
    }
}

impl BlockStorageApi for FakeProvider {
    fn list_volumes<'a>(
        &'a self,
        region: Option<&'a Region>,
    ) -> ProviderFuture<'a, Vec<ProviderVolume>> {
        let result = self.list().map(|volumes| {
            volumes
                .into_iter()
                .filter(|volume| region.is_none_or(|slug| volume.region == *slug))
                .collect()
        });
        Box::pin(async move { result })
    }

    fn get_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ProviderVolume> {
        let result = self
            .begin(ProviderCall::GetVolume(id.clone()), Operation::GetVolume)
            .and_then(|mut state| state.volume_mut(id).cloned());
        Box::pin(async move { result })
    }

    fn create_volume<'a>(
        &'a self,
        request: &'a CreateVolumeRequest,
    ) -> ProviderFuture<'a, ProviderVolume> {
        let result = self.create(request);
        Box::pin(async move { result })
    }

    fn destroy_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ()> {
        let result = self.destroy(id);
        Box::pin(async move { result })
    }

    fn attach<'a>(
        &'a self,
        volume_id: &'a VolumeId,
        node_id: &'a NodeId,
        region: &'a Region,
    ) -> ProviderFuture<'a, Action> {
        let result = self.attach_volume(volume_id, node_id, region);
        Box::pin(async move { result })
    }

    fn detach<'a>(
        &'a self,
        volume_id: &'a VolumeId,
        node_id: &'a NodeId,
        _region: &'a Region,
    ) -> ProviderFuture<'a, Action> {
        let result = self.detach_volume(volume_id, node_id);
        Box::pin(async move { result })
    }

    fn get_action<'a>(&'a self, id: &'a ActionId) -> ProviderFuture<'a, Action> {
        let result = self
            .begin(ProviderCall::GetAction(id.clone()), Operation::GetAction)
            .and_then(|mut state| state.poll_action(id));
        Box::pin(async move { result })
    }

    fn get_node<'a>(&'a self, id: &'a NodeId) -> ProviderFuture<'a, ComputeNode> {
        let result = self
            .begin(ProviderCall::GetNode(id.clone()), Operation::GetNode)
            .and_then(|state| state.compute_node(id));
        Box::pin(async move { result })
    }

    fn list_nodes(&self) -> ProviderFuture<'_, Vec<ComputeNode>> {
        let result = self
            .begin(ProviderCall::ListNodes, Operation::ListNodes)
            .and_then(|state| {
                state
                    .nodes
                    .keys()
                    .map(|id| state.compute_node(id))
                    .collect::<Result<Vec<_>, _>>()
            });
        Box::pin(async move { result })
    }

    fn power_on<'a>(&'a self, id: &'a NodeId) -> ProviderFuture<'a, Action> {
        let result = self.power_on_node(id);
        Box::pin(async move { result })
    }

    fn local_node(&self) -> ProviderFuture<'_, LocalNode> {
        let result = self
            .begin(ProviderCall::LocalNode, Operation::LocalNode)
            .and_then(|state| {
                state.local.clone().ok_or_else(|| ProviderError::NotFound {
                    resource: String::from("metadata"),
                })
            });
        Box::pin(async move { result })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets or removes `DO_*` style variables while holding [`ENV_LOCK`].
    /// A `None` value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let previous = pairs
            .iter()
            .map(|(key, value)| {
                let old = env::var_os(key);
                // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
                unsafe {
                    match value {
                        Some(val) => env::set_var(key, val),
                        None => env::remove_var(key),
                    }
                }
                ((*key).to_owned(), old)
            })
            .collect();

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
