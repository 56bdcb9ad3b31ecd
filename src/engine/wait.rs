//! Deadline-bounded waits on provider actions and registry state.

use tokio::time::{Instant, sleep};
use tracing::debug;

use super::Reconciler;
use crate::error::DriverError;
use crate::naming::DatasetId;
use crate::provider::{Action, ActionStatus, BlockStorageApi};
use crate::registry::Volume;
use crate::retry::PollSchedule;

/// How an action ended from the engine's point of view.
pub(super) enum Settlement {
    Completed,
    Errored(Action),
    /// Still in progress when the schedule ran out.
    Expired(Action),
}

/// Outcome of waiting for a registry condition.
pub(super) enum Waited<T> {
    Ready(T),
    Expired,
}

impl<A: BlockStorageApi> Reconciler<A> {
    /// Polls `action` until the provider reports it settled or `schedule`
    /// expires.
    pub(super) async fn settle(
        &self,
        action: Action,
        schedule: &mut PollSchedule,
    ) -> Result<Settlement, DriverError> {
        let mut current = action;
        loop {
            match current.status {
                ActionStatus::Completed => return Ok(Settlement::Completed),
                ActionStatus::Errored => return Ok(Settlement::Errored(current)),
                ActionStatus::InProgress => {}
            }
            let Some(wait) = schedule.next_wait(Instant::now()) else {
                return Ok(Settlement::Expired(current));
            };
            debug!(
                action_id = %current.id,
                kind = %current.kind,
                status = current.status.as_str(),
                ?wait,
                "action not settled"
            );
            sleep(wait).await;
            current = self.api.get_action(&current.id).await?;
        }
    }

    /// Re-reads the registry until `ready` holds for the dataset's volume or
    /// `schedule` expires. The first check happens immediately.
    pub(super) async fn wait_for_dataset<F>(
        &self,
        dataset_id: &DatasetId,
        schedule: &mut PollSchedule,
        ready: F,
    ) -> Result<Waited<Option<Volume>>, DriverError>
    where
        F: Fn(Option<&Volume>) -> bool + Send,
    {
        loop {
            let observed = self.find_volume_for_dataset(dataset_id).await?;
            if ready(observed.as_ref()) {
                return Ok(Waited::Ready(observed));
            }
            let Some(wait) = schedule.next_wait(Instant::now()) else {
                return Ok(Waited::Expired);
            };
            sleep(wait).await;
        }
    }
}
