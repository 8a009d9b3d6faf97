//! Background status ticker.
//!
//! Re-derives device statuses from cached activity on a fixed cadence so
//! "last seen" ages advance, and immediately when the activity tracker
//! announces a new snapshot. It never calls the network.

use crate::inventory::Inventory;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

pub struct StatusTicker {
    inventory: Arc<Mutex<Inventory>>,
    period: Duration,
    stop: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl StatusTicker {
    pub fn new(inventory: Arc<Mutex<Inventory>>, period: Duration) -> Self {
        Self {
            inventory,
            period,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the ticker background task.
    pub async fn start(&self) -> JoinHandle<()> {
        let (tx, mut rx) = broadcast::channel(1);
        *self.stop.lock().await = Some(tx);

        let mut activity = self.inventory.lock().await.tracker().subscribe();
        let inventory = self.inventory.clone();
        let period = self.period;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        refresh_statuses(&inventory).await;
                    }
                    event = activity.recv() => match event {
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            refresh_statuses(&inventory).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("StatusTicker: stopped");
        })
    }

    /// Stop the ticker.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

async fn refresh_statuses(inventory: &Mutex<Inventory>) {
    let mut inventory = inventory.lock().await;
    if inventory.devices().is_empty() {
        return;
    }
    inventory.update_statuses(Utc::now());
}
