//! Live aggregation of adapter snapshot streams.
//!
//! One aggregator task per manager. On every membership tick it rebuilds the
//! combine set from the current adapters (dropping the previous set), then
//! republishes the combined array whenever any single snapshot changes. An
//! empty adapter set publishes an empty array.

use std::sync::Weak;

use berth_core::Resource;
use tokio::sync::watch;
use tracing::debug;

use crate::resources_manager::ResourcesManager;

enum Wake {
    Membership,
    Snapshot { index: usize, alive: bool },
    Closed,
}

pub(crate) fn spawn(
    manager: Weak<ResourcesManager>,
    update_rx: watch::Receiver<u64>,
    resources_tx: watch::Sender<Vec<Resource>>,
) {
    tokio::spawn(run(manager, update_rx, resources_tx));
}

async fn run(
    manager: Weak<ResourcesManager>,
    mut update_rx: watch::Receiver<u64>,
    resources_tx: watch::Sender<Vec<Resource>>,
) {
    loop {
        let Some(strong) = manager.upgrade() else {
            return;
        };
        // Mark the tick seen before snapshotting: a membership change that
        // lands in between re-wakes the select below instead of being lost.
        update_rx.borrow_and_update();
        let mut receivers = strong.snapshot_receivers();
        drop(strong);
        publish(&resources_tx, &receivers);

        loop {
            if receivers.is_empty() {
                if update_rx.changed().await.is_err() {
                    return;
                }
                break;
            }
            let wake = {
                let any_snapshot = futures::future::select_all(
                    receivers.iter_mut().map(|rx| Box::pin(rx.changed())),
                );
                tokio::select! {
                    changed = update_rx.changed() => match changed {
                        Ok(()) => Wake::Membership,
                        Err(_) => Wake::Closed,
                    },
                    (result, index, _) = any_snapshot => Wake::Snapshot {
                        index,
                        alive: result.is_ok(),
                    },
                }
            };
            match wake {
                Wake::Closed => return,
                Wake::Membership => break,
                Wake::Snapshot { index, alive } => {
                    if !alive {
                        // Destroyed adapter; drop it until the next
                        // membership tick confirms the removal.
                        debug!(index, "snapshot stream ended");
                        receivers.remove(index);
                    }
                    publish(&resources_tx, &receivers);
                }
            }
        }
    }
}

fn publish(
    resources_tx: &watch::Sender<Vec<Resource>>,
    receivers: &[watch::Receiver<Option<Resource>>],
) {
    let next: Vec<Resource> = receivers
        .iter()
        .filter_map(|rx| rx.borrow().clone())
        .collect();
    resources_tx.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next.clone();
            true
        }
    });
}
