// src/scheduler.rs

//! Background polling loop.
//!
//! Rotates a fixed query list at a fixed cadence and drives the ingestion
//! client with a reduced batch size. Total quota exhaustion switches the
//! loop to a long backoff; any other failure is logged and rotation
//! continues. Shutdown is signalled through a watch channel and observed
//! at the top of each iteration and inside both sleeps, so stopping never
//! waits out a full backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::PollConfig;
use crate::error::AppError;
use crate::services::IngestClient;

/// Background scheduler with two states: stopped and running.
pub struct PollScheduler {
    client: Arc<IngestClient>,
    queries: Vec<String>,
    interval: Duration,
    backoff: Duration,
    batch_size: u32,
    worker: Option<Worker>,
}

struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollScheduler {
    pub fn new(client: Arc<IngestClient>, queries: Vec<String>, poll: &PollConfig) -> Self {
        Self {
            client,
            queries,
            interval: Duration::from_secs(poll.interval_secs),
            backoff: Duration::from_secs(poll.backoff_secs),
            batch_size: poll.batch_size,
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start the background worker. A no-op when already running.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            log::warn!("Poll scheduler is already running");
            return;
        }
        if self.queries.is_empty() {
            log::warn!("Poll scheduler has no queries; not starting");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.client.clone(),
            self.queries.clone(),
            self.interval,
            self.backoff,
            self.batch_size,
            stop_rx,
        ));
        self.worker = Some(Worker { stop_tx, handle });

        log::info!(
            "Started poll scheduler: {} queries, interval {:?}",
            self.queries.len(),
            self.interval
        );
    }

    /// Signal the worker to exit after its current iteration and wait for
    /// it to terminate. In-flight remote calls are allowed to finish.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.stop_tx.send(true);
        if let Err(e) = worker.handle.await {
            log::error!("Poll worker did not shut down cleanly: {}", e);
        }
        log::info!("Stopped poll scheduler");
    }
}

async fn run_loop(
    client: Arc<IngestClient>,
    queries: Vec<String>,
    interval: Duration,
    backoff: Duration,
    batch_size: u32,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut index: usize = 0;

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let query = &queries[index % queries.len()];
        index = index.wrapping_add(1);

        log::debug!("Background fetch starting for query: '{}'", query);
        match client.fetch(query, batch_size, None).await {
            Ok(outcome) => {
                if outcome.stored_count > 0 {
                    log::info!(
                        "Background fetch stored {} new videos for query: '{}'",
                        outcome.stored_count,
                        query
                    );
                } else {
                    log::debug!("Background fetch: no new videos for query: '{}'", query);
                }
            }
            Err(AppError::KeysExhausted) => {
                log::warn!(
                    "All API keys exhausted; pausing background fetching for {:?}",
                    backoff
                );
                if sleep_or_stop(&mut stop_rx, backoff).await {
                    break;
                }
                // Resume rotation from the next query without the normal
                // interval sleep.
                continue;
            }
            Err(e) => {
                log::error!("Background fetch failed for query '{}': {}", query, e);
            }
        }

        if sleep_or_stop(&mut stop_rx, interval).await {
            break;
        }
    }

    log::info!("Poll worker exiting");
}

/// Interruptible sleep. Returns true when the stop signal fired.
async fn sleep_or_stop(stop_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        // A closed channel means the scheduler itself is gone; stop too.
        _ = stop_rx.changed() => true,
    }
}
