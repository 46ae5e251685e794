//! Poll cycle controller.
//!
//! One cycle runs LISTING → (empty: done) → MATERIALIZING → ACTING →
//! EMITTING. Any failure aborts the whole cycle: nothing is emitted and the
//! files staged so far are discarded. When an execution is returned, every
//! listed object was both staged and acted upon.

use crate::{
    config::TriggerConfig,
    errors::{ConfigError, CycleError},
    models::{
        action::PostAction,
        execution::{CycleContext, Execution, PollResult, TriggerContext},
        listing::{ListingFilter, ListingRequest, Location, NamePattern},
        object::ObjectRef,
    },
    services::{
        action_service, listing_service, remote_store::RemoteStore, staging_service::StagingStore,
    },
};
use futures::{StreamExt, TryStreamExt, stream};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 8;

/// A validated bucket-watch trigger.
#[derive(Clone, Debug)]
pub struct Trigger {
    listing: ListingRequest,
    action: PostAction,
    concurrency: usize,
    cycle_timeout: Option<Duration>,
}

impl Trigger {
    pub fn new(listing: ListingRequest, action: PostAction) -> Self {
        Self {
            listing,
            action,
            concurrency: DEFAULT_CONCURRENCY,
            cycle_timeout: None,
        }
    }

    /// Validate the trigger definition. Fails before any remote call is made.
    ///
    /// The trigger only ever picks up files; directory entries are skipped.
    pub fn from_config(cfg: &TriggerConfig) -> Result<Self, ConfigError> {
        let location = Location::parse(&cfg.from)?;
        let mut listing = ListingRequest::new(location)
            .with_listing_type(cfg.listing_type)
            .with_filter(ListingFilter::Files);
        if let Some(pattern) = cfg.reg_exp.as_deref().filter(|p| !p.is_empty()) {
            listing = listing.with_pattern(NamePattern::new(pattern)?);
        }
        let action = PostAction::from_parts(cfg.action, cfg.move_directory.as_deref())?;
        if cfg.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }

        let mut trigger = Self::new(listing, action).with_concurrency(cfg.concurrency);
        if let Some(timeout) = cfg.cycle_timeout {
            trigger = trigger.with_timeout(timeout);
        }
        Ok(trigger)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = Some(timeout);
        self
    }

    pub fn listing(&self) -> &ListingRequest {
        &self.listing
    }

    pub fn action(&self) -> &PostAction {
        &self.action
    }

    /// Run one cycle and wrap a non-empty result into a new execution.
    pub async fn evaluate(
        &self,
        store: &dyn RemoteStore,
        staging: &StagingStore,
        trigger: &TriggerContext,
    ) -> Result<Option<Execution>, CycleError> {
        let cycle = CycleContext::new(trigger);
        let result = self.poll(store, staging, &cycle).await?;
        Ok(result.map(|result| {
            let execution = Execution::from_poll(&cycle, result);
            info!(
                execution_id = %execution.id,
                blobs = execution.trigger.variables.blobs.len(),
                "emitting execution"
            );
            execution
        }))
    }

    /// Run one cycle. `Ok(None)` means nothing was found, which is not an
    /// error.
    pub async fn poll(
        &self,
        store: &dyn RemoteStore,
        staging: &StagingStore,
        cycle: &CycleContext<'_>,
    ) -> Result<Option<PollResult>, CycleError> {
        let outcome = match self.cycle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_cycle(store, staging, cycle))
                .await
                .unwrap_or(Err(CycleError::Timeout(limit))),
            None => self.run_cycle(store, staging, cycle).await,
        };

        if outcome.is_err() {
            if let Err(err) = staging.discard(cycle).await {
                warn!(
                    execution_id = %cycle.execution_id,
                    "failed to discard staged files: {}", err
                );
            }
        }
        outcome
    }

    async fn run_cycle(
        &self,
        store: &dyn RemoteStore,
        staging: &StagingStore,
        cycle: &CycleContext<'_>,
    ) -> Result<Option<PollResult>, CycleError> {
        debug!(
            execution_id = %cycle.execution_id,
            location = %self.listing.location,
            "listing"
        );
        let listed = listing_service::list(store, &self.listing).await?;
        if listed.is_empty() {
            debug!(location = %self.listing.location, "no objects found");
            return Ok(None);
        }

        debug!(count = listed.len(), "materializing");
        let blobs = self.materialize_all(store, staging, cycle, &listed).await?;

        debug!(action = %self.action, "acting");
        action_service::apply(
            store,
            &listed,
            &self.action,
            &self.listing.location,
            self.concurrency,
        )
        .await?;

        Ok(Some(PollResult { blobs }))
    }

    /// Stage every object, in listing order. Stops at the first failure.
    async fn materialize_all(
        &self,
        store: &dyn RemoteStore,
        staging: &StagingStore,
        cycle: &CycleContext<'_>,
        listed: &[ObjectRef],
    ) -> Result<Vec<ObjectRef>, CycleError> {
        stream::iter(listed)
            .map(|object| staging.materialize(store, object, cycle))
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}
