//! Control loop turning coordinator batches into item workers.
//!
//! # Design
//! - A single control task; waiting for the next batch is its only
//!   suspension point.
//! - Each well-formed record is copied into its own worker; workers report
//!   only through the counters and the event bus.
//! - Workers still running when the coordinator shuts down are drained;
//!   cancellation and abort-on-error abandon them.
//! - Abort-on-error reads the major counter after each dispatch and after
//!   each batch, while earlier workers may still be running.

use std::sync::Arc;

use copytool_config::Options;
use copytool_core::{ActionBatch, Coordinator, CoordinatorError, ObjectStore, Received};
use copytool_events::{Event, EventBus};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::counters::ErrorCounters;
use crate::error::DispatchError;
use crate::machine::ActionMachine;
use crate::worker::spawn_item;

/// What happened to the records of one accepted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Correlation id published with the batch events.
    pub batch_id: Uuid,
    /// Workers spawned.
    pub dispatched: usize,
    /// Records dropped without a worker.
    pub abandoned: usize,
    /// Whether abort-on-error stopped the batch early.
    pub aborted: bool,
}

/// Dispatch engine owning the control loop.
pub struct Dispatcher {
    coordinator: Arc<dyn Coordinator>,
    machine: Arc<ActionMachine>,
    options: Arc<Options>,
    counters: Arc<ErrorCounters>,
    events: EventBus,
    cancel: CancellationToken,
    workers: TaskTracker,
}

impl Dispatcher {
    /// Engine serving `coordinator` with fresh error counters.
    ///
    /// Cancelling `cancel` stops the control loop and abandons running workers.
    #[must_use]
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        store: Arc<dyn ObjectStore>,
        options: Arc<Options>,
        events: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        let counters = Arc::new(ErrorCounters::new());
        let machine = Arc::new(ActionMachine::new(
            Arc::clone(&coordinator),
            store,
            Arc::clone(&options),
            Arc::clone(&counters),
            events.clone(),
        ));
        Self {
            coordinator,
            machine,
            options,
            counters,
            events,
            cancel,
            workers: TaskTracker::new(),
        }
    }

    /// Error counters shared with the workers.
    #[must_use]
    pub const fn counters(&self) -> &Arc<ErrorCounters> {
        &self.counters
    }

    /// Bus the engine publishes on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    fn should_abort(&self) -> bool {
        self.options.abort_on_error && self.counters.major() > 0
    }

    /// Validate `batch` and spawn one worker per record.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::FsNameMismatch`] when the batch targets another
    /// filesystem (nothing is dispatched) and [`DispatchError::RecordOverrun`]
    /// when a record runs past the batch bound (later records are dropped).
    pub fn process_batch(&self, batch: ActionBatch) -> Result<DispatchReport, DispatchError> {
        let batch_id = Uuid::new_v4();
        let expected = self.coordinator.filesystem_name();
        debug!(
            batch_id = %batch_id,
            fs_name = %batch.fs_name,
            archive_id = batch.archive_id,
            items = batch.items.len(),
            "action batch received"
        );

        if batch.fs_name != expected {
            let err = DispatchError::FsNameMismatch {
                expected: expected.to_string(),
                actual: batch.fs_name.clone(),
            };
            error!(fs_name = %batch.fs_name, expected, "invalid fs name");
            self.counters.record_major();
            self.events.publish(Event::BatchRejected {
                batch_id,
                fs_name: batch.fs_name,
                reason: err.to_string(),
            });
            return Err(err);
        }

        self.events.publish(Event::BatchReceived {
            batch_id,
            fs_name: batch.fs_name.clone(),
            archive_id: batch.archive_id,
            items: batch.items.len(),
        });

        let bound = batch.byte_bound();
        let mut offset = batch.header_len();
        let total = batch.items.len();
        let mut report = DispatchReport {
            batch_id,
            dispatched: 0,
            abandoned: 0,
            aborted: false,
        };

        for (position, item) in batch.items.into_iter().enumerate() {
            let index = position + 1;
            let record_len = item.record_len();
            if offset + record_len > bound {
                let err = DispatchError::RecordOverrun {
                    index,
                    offset,
                    record_len,
                    bound,
                };
                error!(index, offset, record_len, bound, "item past end of batch");
                self.counters.record_major();
                self.abandon(batch_id, total - position, &err.to_string());
                return Err(err);
            }
            offset += item.record_stride();

            self.events.publish(Event::ItemDispatched {
                batch_id,
                fid: item.fid.to_string(),
                cookie: item.cookie,
                action: item.kind.as_str().to_string(),
            });
            drop(spawn_item(
                &self.workers,
                Arc::clone(&self.machine),
                self.events.clone(),
                item,
                batch_id,
                self.cancel.child_token(),
            ));
            report.dispatched += 1;

            if self.should_abort() {
                report.aborted = true;
                report.abandoned = total - index;
                if report.abandoned > 0 {
                    self.abandon(batch_id, report.abandoned, "abort on error");
                }
                break;
            }
        }
        Ok(report)
    }

    fn abandon(&self, batch_id: Uuid, count: usize, reason: &str) {
        warn!(batch_id = %batch_id, count, reason, "abandoning remaining items");
        self.events.publish(Event::ItemsAbandoned {
            batch_id,
            count,
            reason: reason.to_string(),
        });
    }

    /// Receive and dispatch batches until shutdown, cancellation or abort.
    ///
    /// A coordinator shutdown returns once every dispatched worker finished.
    ///
    /// # Errors
    ///
    /// Returns the failure that triggered abort-on-error, or
    /// [`DispatchError::AbortOnError`] when only workers failed.
    pub async fn run(&self) -> Result<(), DispatchError> {
        loop {
            debug!("waiting for action batch");
            let received = tokio::select! {
                () = self.cancel.cancelled() => {
                    self.stopped("canceled");
                    return Ok(());
                }
                received = self.coordinator.receive_batch() => received,
            };

            let outcome = match received {
                Ok(Received::Shutdown) | Err(CoordinatorError::Shutdown) => {
                    self.drain().await;
                    self.stopped("coordinator shutdown");
                    return Ok(());
                }
                Ok(Received::Batch(batch)) => self.process_batch(batch).map(|_| ()),
                Err(source) => {
                    warn!(error = %source, "cannot receive action batch");
                    self.counters.record_major();
                    Err(DispatchError::Receive { source })
                }
            };

            if self.should_abort() {
                let major = self.counters.major();
                error!(major, "stopping on error");
                self.stopped("abort on error");
                return Err(match outcome {
                    Err(err) => err,
                    Ok(()) => DispatchError::AbortOnError { major },
                });
            }
        }
    }

    /// Wait for running workers unless cancellation abandons them first.
    async fn drain(&self) {
        self.workers.close();
        if self.workers.is_empty() {
            return;
        }
        info!(workers = self.workers.len(), "waiting for in-flight actions");
        tokio::select! {
            () = self.cancel.cancelled() => debug!("in-flight actions abandoned"),
            () = self.workers.wait() => debug!("in-flight actions finished"),
        }
    }

    fn stopped(&self, reason: &str) {
        info!(reason, "dispatch loop stopped");
        self.events.publish(Event::Shutdown {
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytool_core::{ActionKind, TransferOp};
    use copytool_test_support::fixtures::{self, FS_NAME};
    use copytool_test_support::mocks::{Failure, MemoryObjectStore, ScriptedCoordinator};
    use std::time::Duration;

    fn dispatcher(coordinator: &Arc<ScriptedCoordinator>, options: Arc<Options>) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(coordinator) as Arc<dyn Coordinator>,
            Arc::new(MemoryObjectStore::new()),
            options,
            EventBus::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn batch_bound_is_enforced_per_record() {
        let coordinator = Arc::new(ScriptedCoordinator::new(FS_NAME));
        let dispatcher = dispatcher(&coordinator, fixtures::options());
        let mut batch = fixtures::batch(vec![
            fixtures::item(ActionKind::Cancel, 1),
            fixtures::item(ActionKind::Cancel, 2),
            fixtures::item(ActionKind::Cancel, 3),
        ]);
        // room for the first record only
        batch.declared_len = Some(batch.header_len() + batch.items[0].record_stride() + 8);

        let result = dispatcher.process_batch(batch);

        assert!(matches!(
            result,
            Err(DispatchError::RecordOverrun { index: 2, .. })
        ));
        assert_eq!(dispatcher.counters().major(), 1);
    }

    #[tokio::test]
    async fn receive_failure_counts_major_and_continues() {
        let coordinator = Arc::new(ScriptedCoordinator::new(FS_NAME));
        coordinator.push_receive_error(Failure::Code(-5));
        coordinator.push_shutdown();
        let dispatcher = dispatcher(&coordinator, fixtures::options());

        assert!(dispatcher.run().await.is_ok());
        assert_eq!(dispatcher.counters().major(), 1);
    }

    #[tokio::test]
    async fn receive_failure_stops_when_aborting_on_error() {
        let coordinator = Arc::new(ScriptedCoordinator::new(FS_NAME));
        coordinator.push_receive_error(Failure::Timeout);
        coordinator.push_batch(fixtures::batch(vec![fixtures::item(
            ActionKind::Archive,
            1,
        )]));
        let options = fixtures::options_builder()
            .abort_on_error(true)
            .build()
            .expect("options");
        let dispatcher = dispatcher(&coordinator, options);

        let result = dispatcher.run().await;

        assert!(matches!(result, Err(DispatchError::Receive { .. })));
        assert!(coordinator.calls().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_a_waiting_loop() {
        let coordinator = Arc::new(ScriptedCoordinator::new(FS_NAME).hang_when_drained());
        let cancel = CancellationToken::new();
        let store = Arc::new(MemoryObjectStore::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&coordinator) as Arc<dyn Coordinator>,
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            fixtures::options(),
            EventBus::new(),
            cancel.clone(),
        );
        let mut stream = dispatcher.events().subscribe();

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), dispatcher.run()).await;

        assert!(matches!(result, Ok(Ok(()))));
        let shutdown = stream.next().await.map(|envelope| envelope.event);
        assert!(matches!(shutdown, Some(Event::Shutdown { .. })));
        assert!(store.requests_for(TransferOp::Put).is_empty());
    }
}
