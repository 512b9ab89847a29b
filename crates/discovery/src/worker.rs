//! Worker pool draining the run queue.
//!
//! A fixed number of workers poll the queue; each claimed request executes
//! one discovery run. Per-connection exclusivity is the orchestrator's
//! job; a request colliding with an in-flight run on the same connection
//! is skipped, not retried. Shutdown propagates through a cancellation
//! token so in-flight runs abort cooperatively.

use crate::error::DiscoveryError;
use crate::orchestrator::DiscoveryOrchestrator;
use crate::queue::RedisRunQueue;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const IDLE_POLL_MS: u64 = 500;

pub struct DiscoveryWorkerPool {
    queue: Arc<RedisRunQueue>,
    orchestrator: Arc<DiscoveryOrchestrator>,
    pool_size: usize,
    shutdown: CancellationToken,
}

impl DiscoveryWorkerPool {
    pub fn new(
        queue: Arc<RedisRunQueue>,
        orchestrator: Arc<DiscoveryOrchestrator>,
        pool_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            pool_size,
            shutdown,
        }
    }

    /// Spawn the worker tasks. Handles resolve once shutdown completes.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        (0..self.pool_size)
            .map(|worker_index| {
                let queue = self.queue.clone();
                let orchestrator = self.orchestrator.clone();
                let shutdown = self.shutdown.clone();

                tokio::spawn(async move {
                    info!(worker_index, "Discovery worker started");

                    loop {
                        let request = tokio::select! {
                            _ = shutdown.cancelled() => break,
                            request = queue.dequeue() => request,
                        };

                        match request {
                            Ok(Some(request)) => {
                                let cancel = shutdown.child_token();
                                let result = orchestrator
                                    .run_discovery(
                                        request.organization_id,
                                        request.connection_id,
                                        cancel,
                                    )
                                    .await;

                                match result {
                                    Ok(run) => info!(
                                        worker_index,
                                        run_id = %run.id,
                                        status = run.status.as_str(),
                                        "Discovery run completed"
                                    ),
                                    Err(DiscoveryError::RunAlreadyActive(connection_id)) => warn!(
                                        worker_index,
                                        connection_id = %connection_id,
                                        "Skipping request; run already active"
                                    ),
                                    Err(e) => error!(
                                        worker_index,
                                        error = %e,
                                        "Discovery run errored"
                                    ),
                                }
                            }
                            Ok(None) => {
                                tokio::select! {
                                    _ = shutdown.cancelled() => break,
                                    _ = tokio::time::sleep(
                                        std::time::Duration::from_millis(IDLE_POLL_MS),
                                    ) => {}
                                }
                            }
                            Err(e) => {
                                error!(worker_index, error = %e, "Queue poll failed");
                                tokio::select! {
                                    _ = shutdown.cancelled() => break,
                                    _ = tokio::time::sleep(
                                        std::time::Duration::from_millis(IDLE_POLL_MS),
                                    ) => {}
                                }
                            }
                        }
                    }

                    info!(worker_index, "Discovery worker stopped");
                })
            })
            .collect()
    }
}
