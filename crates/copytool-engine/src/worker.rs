//! Fire-and-forget item workers.

use std::sync::Arc;

use copytool_core::ActionItem;
use copytool_events::{Event, EventBus};
use copytool_telemetry::action_span;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::machine::{ActionMachine, ItemOutcome};

/// Spawn a worker on `workers` owning `item` and running it to a terminal
/// outcome.
///
/// The handle is never awaited by the dispatcher. Cancelling `cancel` abandons
/// the item at its next suspension point without notifying the coordinator.
pub fn spawn_item(
    workers: &TaskTracker,
    machine: Arc<ActionMachine>,
    events: EventBus,
    item: ActionItem,
    batch_id: Uuid,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let span = action_span(&item.fid.to_string(), item.cookie, item.kind.as_str());
    workers.spawn(
        async move {
            let outcome = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("worker abandoned on shutdown");
                    return;
                }
                outcome = machine.process(&item) => outcome,
            };
            report(&events, &item, batch_id, &outcome);
        }
        .instrument(span),
    )
}

fn report(events: &EventBus, item: &ActionItem, batch_id: Uuid, outcome: &ItemOutcome) {
    match outcome {
        ItemOutcome::Completed => debug!("action completed"),
        ItemOutcome::Skipped { reason } => info!(reason, "action skipped"),
        ItemOutcome::Retryable(err) => warn!(error = %err, "action failed, retry requested"),
        ItemOutcome::Failed(err) => warn!(error = %err, code = outcome.code(), "action failed"),
    }
    events.publish(Event::ItemFinished {
        batch_id,
        fid: item.fid.to_string(),
        cookie: item.cookie,
        action: item.kind.as_str().to_string(),
        outcome: outcome.kind(),
        code: outcome.code(),
    });
}
