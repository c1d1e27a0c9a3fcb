//! Per-item state machine: lease, execute, finalize.
//!
//! # Design
//! - States advance `NotStarted -> Leased -> Executing -> Finalized`; a
//!   failure is the state reached plus the error carried to finalize.
//! - Finalize consumes the run, so it happens exactly once per item. An item
//!   that never obtained a lease is still released through a finalize-only
//!   lease.
//! - A finalize failure after a successful archive triggers one compensating
//!   delete of the written object; its own failure is only logged.
//! - Cancel is counted minor and never reported to the coordinator.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use copytool_config::Options;
use copytool_core::{
    ActionItem, ActionKind, Coordinator, CoordinatorError, FileId, IdOverrides,
    LayoutDescriptor, LeaseHandle, LeaseRequest, ObjectId, ObjectIdResolver, ObjectStore,
    OpenFlags,
};
use copytool_events::{Event, EventBus, OutcomeKind};
use tracing::{debug, error, info, trace, warn};

use crate::counters::ErrorCounters;
use crate::error::{ActionError, ActionResult};
use crate::transfer::TransferAdapter;

/// Progress of one action item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// No coordinator call has succeeded yet.
    NotStarted,
    /// The lease is held.
    Leased,
    /// The data movement is in progress.
    Executing,
    /// The coordinator was notified.
    Finalized,
}

impl ActionState {
    /// Name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Leased => "leased",
            Self::Executing => "executing",
            Self::Finalized => "finalized",
        }
    }
}

impl Display for ActionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one action item.
#[derive(Debug)]
pub enum ItemOutcome {
    /// Executed and finalized.
    Completed,
    /// Not executed and not reported to the coordinator.
    Skipped {
        /// Human-readable reason.
        reason: &'static str,
    },
    /// Failed; the coordinator was asked to retry.
    Retryable(ActionError),
    /// Failed for good.
    Failed(ActionError),
}

impl ItemOutcome {
    /// Classify `err` by its retryability.
    #[must_use]
    pub fn from_error(err: ActionError) -> Self {
        if err.is_retryable() {
            Self::Retryable(err)
        } else {
            Self::Failed(err)
        }
    }

    /// Positive errno reported to the coordinator, zero on success.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Completed | Self::Skipped { .. } => 0,
            Self::Retryable(err) | Self::Failed(err) => err.errno() as i32,
        }
    }

    /// Whether the coordinator should resubmit the item.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Classification published on the event bus.
    #[must_use]
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Completed => OutcomeKind::Completed,
            Self::Skipped { .. } => OutcomeKind::Skipped,
            Self::Retryable(_) => OutcomeKind::Retryable,
            Self::Failed(_) => OutcomeKind::Failed,
        }
    }

    /// Failure carried by the outcome, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&ActionError> {
        match self {
            Self::Retryable(err) | Self::Failed(err) => Some(err),
            Self::Completed | Self::Skipped { .. } => None,
        }
    }
}

struct ActionRun<'a> {
    item: &'a ActionItem,
    state: ActionState,
    lease: Option<LeaseHandle>,
}

impl<'a> ActionRun<'a> {
    const fn new(item: &'a ActionItem) -> Self {
        Self {
            item,
            state: ActionState::NotStarted,
            lease: None,
        }
    }

    fn leased(&mut self, lease: LeaseHandle) {
        self.lease = Some(lease);
        self.advance(ActionState::Leased);
    }

    fn executing(&mut self) {
        self.advance(ActionState::Executing);
    }

    fn advance(&mut self, next: ActionState) {
        trace!(from = %self.state, to = %next, "action state");
        self.state = next;
    }
}

/// Runs action items against the coordinator and the object store.
pub struct ActionMachine {
    coordinator: Arc<dyn Coordinator>,
    transfer: TransferAdapter,
    options: Arc<Options>,
    counters: Arc<ErrorCounters>,
    events: EventBus,
}

impl ActionMachine {
    /// Machine serving the coordinator's filesystem.
    #[must_use]
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        store: Arc<dyn ObjectStore>,
        options: Arc<Options>,
        counters: Arc<ErrorCounters>,
        events: EventBus,
    ) -> Self {
        let transfer = TransferAdapter::new(
            store,
            coordinator.filesystem_name(),
            Arc::clone(&options),
        );
        Self {
            coordinator,
            transfer,
            options,
            counters,
            events,
        }
    }

    /// Shared error counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<ErrorCounters> {
        &self.counters
    }

    /// Process `item` to a terminal outcome.
    pub async fn process(&self, item: &ActionItem) -> ItemOutcome {
        if self.options.traces_paths() {
            self.trace_path(item).await;
        }
        match item.kind {
            ActionKind::Archive => self.archive(item).await,
            ActionKind::Restore => self.restore(item).await,
            ActionKind::Remove => self.remove(item).await,
            ActionKind::Cancel => {
                info!("cancel not implemented, dropping item");
                self.counters.record_minor();
                ItemOutcome::Skipped {
                    reason: "cancel not implemented",
                }
            }
            ActionKind::Unknown => {
                let err = ActionError::UnsupportedAction { action: item.kind };
                error!(error = %err, "unknown action");
                self.counters.record_minor();
                self.conclude(ActionRun::new(item), ItemOutcome::Failed(err))
                    .await
            }
        }
    }

    async fn trace_path(&self, item: &ActionItem) {
        info!(reclen = item.record_len(), "action received");
        match self.coordinator.fid_to_path(item.fid).await {
            Ok(path) => info!(path = %path.display(), "processing file"),
            Err(err) => warn!(error = %err, "cannot get path of file"),
        }
    }

    async fn archive(&self, item: &ActionItem) -> ItemOutcome {
        let mut run = ActionRun::new(item);
        let lease = match self
            .coordinator
            .begin_lease(item, LeaseRequest::default())
            .await
        {
            Ok(lease) => lease,
            Err(source) => {
                error!(error = %source, "failed to begin archive");
                return self
                    .fail(run, ActionError::coordinator("begin_lease", source))
                    .await;
            }
        };
        run.leased(lease.clone());
        debug!(dfid = %item.dfid, "archiving");

        if self.options.dry_run {
            info!("dry run, archive skipped");
            return self.conclude(run, ItemOutcome::Completed).await;
        }

        run.executing();
        let object_id = match self.archive_data(item, &lease).await {
            Ok(object_id) => object_id,
            Err(err) => {
                error!(error = %err, "archive failed");
                return self.fail(run, err).await;
            }
        };

        match self.finalize(run, &ItemOutcome::Completed).await {
            Ok(()) => {
                info!(object_id = %object_id, "archive completed");
                ItemOutcome::Completed
            }
            Err(err) => {
                self.compensate(item.fid, &object_id).await;
                ItemOutcome::Failed(err)
            }
        }
    }

    async fn archive_data(
        &self,
        item: &ActionItem,
        lease: &LeaseHandle,
    ) -> ActionResult<ObjectId> {
        let source = self
            .coordinator
            .leased_data_handle(lease)
            .await
            .map_err(|source| ActionError::coordinator("leased_data_handle", source))?;
        let layout = match source.layout().await {
            Ok(layout) => layout,
            Err(err) => {
                warn!(error = %err, "cannot read layout of source");
                None
            }
        };
        let hints = item
            .hints()
            .map_err(|source| ActionError::Hints { source })?;
        let object_id = self
            .transfer
            .put(item.fid, None, source, layout.as_ref(), &hints)
            .await?;
        Ok(object_id)
    }

    async fn compensate(&self, fid: FileId, object_id: &ObjectId) {
        warn!(object_id = %object_id, "failed to end archive, deleting object");
        let result = self
            .transfer
            .delete(fid, IdOverrides::alternate(Some(object_id.as_str())))
            .await;
        if let Err(err) = &result {
            error!(object_id = %object_id, error = %err, "compensating delete failed");
        }
        self.events.publish(Event::CompensationIssued {
            fid: fid.to_string(),
            object_id: object_id.to_string(),
            succeeded: result.is_ok(),
        });
    }

    async fn restore(&self, item: &ActionItem) -> ItemOutcome {
        let mut run = ActionRun::new(item);
        let mdt_index = match self.coordinator.mdt_index(item.fid).await {
            Ok(index) => index,
            Err(source) => {
                error!(error = %source, "cannot get mdt index");
                return self
                    .fail(run, ActionError::coordinator("mdt_index", source))
                    .await;
            }
        };

        let alternate = self.alternate_id(item.fid).await;
        let mut open_flags = OpenFlags::NONE;
        let mut layout = None;
        if self.options.restore_layout {
            match self
                .transfer
                .get_layout(item.fid, alternate.as_deref())
                .await
            {
                Ok(recovered) => {
                    debug!(
                        components = recovered.components.len(),
                        "stored layout recovered"
                    );
                    open_flags = OpenFlags::DELAY_LAYOUT_CREATE;
                    layout = Some(recovered);
                }
                Err(err) => warn!(
                    error = %err,
                    "could not get file layout, will proceed with default striping"
                ),
            }
        }

        let request = LeaseRequest {
            mdt_index: Some(mdt_index),
            open_flags,
            finalize_only: false,
        };
        let lease = match self.coordinator.begin_lease(item, request).await {
            Ok(lease) => lease,
            Err(source) => {
                error!(error = %source, "failed to begin restore");
                return self
                    .fail(run, ActionError::coordinator("begin_lease", source))
                    .await;
            }
        };
        run.leased(lease.clone());

        let destination = match self.coordinator.leased_destination(&lease).await {
            Ok(fid) => fid,
            Err(source) => {
                error!(error = %source, "cannot get identity of volatile file");
                return self
                    .fail(run, ActionError::coordinator("leased_destination", source))
                    .await;
            }
        };
        debug!(dfid = %destination, "restoring into volatile file");

        if self.options.dry_run {
            info!("dry run, restore skipped");
            return self.conclude(run, ItemOutcome::Completed).await;
        }

        run.executing();
        match self
            .restore_data(item, &lease, alternate.as_deref(), layout.as_ref())
            .await
        {
            Ok(object_id) => {
                info!(object_id = %object_id, dfid = %destination, "restore completed");
                self.conclude(run, ItemOutcome::Completed).await
            }
            Err(err) => {
                error!(error = %err, "restore failed");
                self.fail(run, err).await
            }
        }
    }

    async fn restore_data(
        &self,
        item: &ActionItem,
        lease: &LeaseHandle,
        alternate: Option<&str>,
        layout: Option<&LayoutDescriptor>,
    ) -> ActionResult<ObjectId> {
        let destination = self
            .coordinator
            .leased_data_handle(lease)
            .await
            .map_err(|source| ActionError::coordinator("leased_data_handle", source))?;
        if let Some(layout) = layout {
            // no interface sets placement on an already created volatile file
            debug!(
                components = layout.components.len(),
                "layout reapplication not supported, keeping default placement"
            );
        }
        let object_id = self.transfer.get(item.fid, alternate, destination).await?;
        Ok(object_id)
    }

    async fn alternate_id(&self, fid: FileId) -> Option<String> {
        match self
            .coordinator
            .read_file_attr(fid, &self.options.fuid_xattr)
            .await
        {
            Ok(raw) => {
                let alternate = ObjectIdResolver::alternate_from_attr(&raw);
                if let Some(id) = &alternate {
                    debug!(object_id = %id, "found object id as xattr");
                }
                alternate
            }
            Err(CoordinatorError::AttributeMissing { .. }) => None,
            Err(err) => {
                debug!(error = %err, "cannot read object id xattr");
                None
            }
        }
    }

    async fn remove(&self, item: &ActionItem) -> ItemOutcome {
        let mut run = ActionRun::new(item);
        let lease = match self
            .coordinator
            .begin_lease(item, LeaseRequest::default())
            .await
        {
            Ok(lease) => lease,
            Err(source) => {
                error!(error = %source, "failed to begin remove");
                return self
                    .fail(run, ActionError::coordinator("begin_lease", source))
                    .await;
            }
        };
        run.leased(lease);

        if self.options.dry_run {
            info!("dry run, remove skipped");
            return self.conclude(run, ItemOutcome::Completed).await;
        }

        run.executing();
        let hints = match item.hints() {
            Ok(hints) => hints,
            Err(source) => {
                error!(error = %source, "invalid hints");
                return self.fail(run, ActionError::Hints { source }).await;
            }
        };
        match self
            .transfer
            .delete(item.fid, IdOverrides::hints(&hints))
            .await
        {
            Ok(object_id) => {
                info!(object_id = %object_id, "remove completed");
                self.conclude(run, ItemOutcome::Completed).await
            }
            Err(err) => {
                error!(error = %err, "remove failed");
                self.fail(run, err.into()).await
            }
        }
    }

    async fn fail(&self, run: ActionRun<'_>, err: ActionError) -> ItemOutcome {
        self.counters.record_major();
        self.conclude(run, ItemOutcome::from_error(err)).await
    }

    /// Finalize and fold a finalize failure into a successful outcome.
    async fn conclude(&self, run: ActionRun<'_>, outcome: ItemOutcome) -> ItemOutcome {
        match self.finalize(run, &outcome).await {
            Ok(()) => outcome,
            Err(err) => match outcome {
                ItemOutcome::Completed => ItemOutcome::Failed(err),
                other => other,
            },
        }
    }

    async fn finalize(&self, run: ActionRun<'_>, outcome: &ItemOutcome) -> ActionResult<()> {
        let ActionRun {
            item,
            state,
            lease,
        } = run;
        let retry = outcome.is_retryable();
        let code = outcome.code();
        debug!(state = %state, retry, code, "action completed, notifying coordinator");

        let lease = match lease {
            Some(lease) => lease,
            None => self
                .coordinator
                .begin_lease(item, LeaseRequest::finalize_only())
                .await
                .map_err(|source| {
                    error!(error = %source, "failed to begin finalize-only lease");
                    ActionError::Finalize { source }
                })?,
        };

        match self
            .coordinator
            .end_lease(lease, item.extent, retry, code)
            .await
        {
            Ok(()) => {
                trace!(to = %ActionState::Finalized, "action state");
                Ok(())
            }
            Err(source) => {
                if matches!(source, CoordinatorError::Canceled { .. }) {
                    error!("completed action has been canceled");
                } else {
                    error!(error = %source, "failed to end action");
                }
                Err(ActionError::Finalize { source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytool_core::{BackendError, HintError, TransferOp};
    use copytool_test_support::fixtures::{self, FS_NAME};
    use copytool_test_support::mocks::{
        CoordinatorCall, Failure, MemoryObjectStore, ScriptedCoordinator,
    };
    use nix::errno::Errno;

    fn machine(
        coordinator: &Arc<ScriptedCoordinator>,
        store: &Arc<MemoryObjectStore>,
        options: Arc<Options>,
    ) -> ActionMachine {
        ActionMachine::new(
            Arc::clone(coordinator) as Arc<dyn Coordinator>,
            Arc::clone(store) as Arc<dyn ObjectStore>,
            options,
            Arc::new(ErrorCounters::new()),
            EventBus::new(),
        )
    }

    #[test]
    fn outcome_codes_follow_errors() {
        assert_eq!(ItemOutcome::Completed.code(), 0);
        let skipped = ItemOutcome::Skipped { reason: "cancel" };
        assert_eq!(skipped.code(), 0);
        assert_eq!(skipped.kind(), OutcomeKind::Skipped);

        let timeout = ItemOutcome::from_error(ActionError::from(
            crate::error::TransferError::Backend {
                op: TransferOp::Get,
                source: BackendError::Timeout {
                    operation: "get",
                    object_id: "x".into(),
                },
            },
        ));
        assert!(timeout.is_retryable());
        assert_eq!(timeout.code(), Errno::ETIMEDOUT as i32);

        let hints = ItemOutcome::from_error(ActionError::Hints {
            source: HintError::MissingValue { key: "k".into() },
        });
        assert_eq!(hints.kind(), OutcomeKind::Failed);
        assert_eq!(hints.code(), Errno::EINVAL as i32);
    }

    #[tokio::test]
    async fn begin_failure_is_released_through_finalize_only_lease() {
        let coordinator = Arc::new(ScriptedCoordinator::new(FS_NAME));
        let store = Arc::new(MemoryObjectStore::new());
        coordinator.fail_begin_lease(Failure::Code(-16));
        let machine = machine(&coordinator, &store, fixtures::options());

        let outcome = machine
            .process(&fixtures::item(ActionKind::Remove, 2))
            .await;

        assert!(matches!(outcome, ItemOutcome::Failed(_)));
        assert_eq!(machine.counters().major(), 1);
        let begins: Vec<_> = coordinator
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                CoordinatorCall::BeginLease { request, .. } => Some(request.finalize_only),
                _ => None,
            })
            .collect();
        assert_eq!(begins, vec![false, true]);
        assert!(coordinator.end_leases().is_empty());
    }

    #[tokio::test]
    async fn finalize_failure_fails_a_completed_remove_without_compensation() {
        let coordinator = Arc::new(ScriptedCoordinator::new(FS_NAME));
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(
            "lustre:0x200000401:0x3:0x0",
            copytool_test_support::mocks::StoredObject::default(),
        );
        coordinator.fail_end_lease(Failure::Canceled);
        let machine = machine(&coordinator, &store, fixtures::options());

        let outcome = machine
            .process(&fixtures::item(ActionKind::Remove, 3))
            .await;

        assert!(matches!(
            outcome,
            ItemOutcome::Failed(ActionError::Finalize {
                source: CoordinatorError::Canceled { .. }
            })
        ));
        assert_eq!(store.requests_for(TransferOp::Delete).len(), 1);
        assert_eq!(machine.counters().major(), 0);
    }

    #[tokio::test]
    async fn path_is_traced_at_info_verbosity() {
        let coordinator = Arc::new(ScriptedCoordinator::new(FS_NAME));
        let store = Arc::new(MemoryObjectStore::new());
        coordinator.fail_fid_to_path(Failure::NotFound);
        let machine = machine(&coordinator, &store, fixtures::options());

        let outcome = machine
            .process(&fixtures::item(ActionKind::Cancel, 4))
            .await;

        assert!(matches!(outcome, ItemOutcome::Skipped { .. }));
        assert_eq!(
            coordinator.calls(),
            vec![CoordinatorCall::FidToPath(fixtures::fid(4))]
        );
    }
}
