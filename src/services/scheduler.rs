//! Fixed-interval driver for the poll cycle.
//!
//! Cycles run one after another inside a single task, so two cycles of the
//! same trigger never overlap. A non-empty cycle is persisted as a new
//! execution; an empty one is a no-op; a failed one is logged and retried
//! on the next tick.

use crate::{
    models::execution::TriggerContext,
    services::{
        execution_store::ExecutionStore, poll_service::Trigger, remote_store::RemoteStore,
        staging_service::StagingStore,
    },
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::RwLock,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Result of the most recent cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    NotRun,
    Empty,
    Emitted { execution_id: Uuid, blobs: usize },
    Failed { error: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct CycleStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: CycleOutcome,
    pub consecutive_failures: u32,
    pub executions_emitted: u64,
}

impl Default for CycleStatus {
    fn default() -> Self {
        Self {
            last_run: None,
            last_outcome: CycleOutcome::NotRun,
            consecutive_failures: 0,
            executions_emitted: 0,
        }
    }
}

/// Shared, read-mostly view of the scheduler's progress.
#[derive(Clone, Default)]
pub struct StatusHandle(Arc<RwLock<CycleStatus>>);

impl StatusHandle {
    pub async fn snapshot(&self) -> CycleStatus {
        self.0.read().await.clone()
    }

    pub(crate) async fn record(&self, outcome: &CycleOutcome) {
        let mut status = self.0.write().await;
        status.last_run = Some(Utc::now());
        match outcome {
            CycleOutcome::Failed { .. } => status.consecutive_failures += 1,
            CycleOutcome::Emitted { .. } => {
                status.consecutive_failures = 0;
                status.executions_emitted += 1;
            }
            CycleOutcome::Empty | CycleOutcome::NotRun => status.consecutive_failures = 0,
        }
        status.last_outcome = outcome.clone();
    }
}

pub struct Scheduler {
    trigger: Trigger,
    context: TriggerContext,
    interval: Duration,
    store: Arc<dyn RemoteStore>,
    staging: StagingStore,
    executions: ExecutionStore,
    status: StatusHandle,
}

impl Scheduler {
    pub fn new(
        trigger: Trigger,
        context: TriggerContext,
        interval: Duration,
        store: Arc<dyn RemoteStore>,
        staging: StagingStore,
        executions: ExecutionStore,
    ) -> Self {
        Self {
            trigger,
            context,
            interval,
            store,
            staging,
            executions,
            status: StatusHandle::default(),
        }
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Evaluate exactly one cycle and persist its execution, if any.
    pub async fn run_once(&self) -> CycleOutcome {
        let outcome = match self
            .trigger
            .evaluate(self.store.as_ref(), &self.staging, &self.context)
            .await
        {
            Ok(Some(execution)) => match self.executions.insert(&execution).await {
                Ok(()) => {
                    info!(
                        execution_id = %execution.id,
                        flow_id = %execution.flow_id,
                        "started execution from trigger {}", self.context.trigger_id
                    );
                    CycleOutcome::Emitted {
                        execution_id: execution.id,
                        blobs: execution.trigger.variables.blobs.len(),
                    }
                }
                Err(err) => {
                    // The remote originals may already be moved or deleted,
                    // so the staged copies are kept for manual recovery.
                    let staged = self
                        .staging
                        .execution_path(&self.context, execution.id)
                        .map(|path| path.display().to_string())
                        .unwrap_or_else(|_| "<unknown>".into());
                    error!(
                        execution_id = %execution.id,
                        staged = %staged,
                        "failed to persist execution: {}", err
                    );
                    CycleOutcome::Failed {
                        error: format!(
                            "failed to persist execution {} (payloads kept in {}): {}",
                            execution.id, staged, err
                        ),
                    }
                }
            },
            Ok(None) => {
                debug!("trigger {} found nothing", self.context.trigger_id);
                CycleOutcome::Empty
            }
            Err(err) => {
                error!("trigger {} cycle failed: {}", self.context.trigger_id, err);
                CycleOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        self.status.record(&outcome).await;
        outcome
    }

    /// Tick every `interval` until `shutdown` resolves. The first cycle runs
    /// immediately; a slow cycle delays the following ticks instead of
    /// bunching them up. Shutdown is only observed between cycles.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let listing = self.trigger.listing();
        info!(
            pattern = listing.pattern.as_ref().map(|p| p.as_str()),
            "watching {} every {:?} (action {})",
            listing.location,
            self.interval,
            self.trigger.action()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }
    }
}
