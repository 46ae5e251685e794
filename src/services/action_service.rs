//! Post-detection actions: keep, move or delete the remote originals once
//! a cycle has staged all of them.

use crate::{
    errors::CycleError,
    models::{action::PostAction, listing::Location, object::ObjectRef},
    services::remote_store::RemoteStore,
};
use futures::{StreamExt, stream::FuturesUnordered};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// One remote mutation planned for a detected object.
enum Step<'a> {
    Delete(&'a ObjectRef),
    Move {
        object: &'a ObjectRef,
        bucket: &'a str,
        destination: String,
    },
}

/// Apply `action` to every object listed under `source`, at most
/// `concurrency` at a time.
///
/// After the first failure no further objects are started; actions already
/// in flight are awaited before the first error is returned, so nothing is
/// left running when the cycle reports failure.
pub async fn apply(
    store: &dyn RemoteStore,
    objects: &[ObjectRef],
    action: &PostAction,
    source: &Location,
    concurrency: usize,
) -> Result<(), CycleError> {
    let steps = match action {
        PostAction::None => {
            debug!(
                "action NONE: {} objects stay in place and will be detected again",
                objects.len()
            );
            return Ok(());
        }
        PostAction::Delete => objects.iter().map(Step::Delete).collect(),
        PostAction::Move { directory } => plan_moves(objects, source, directory)?,
    };

    let limit = concurrency.max(1);
    debug!(action = ?action.kind(), objects = objects.len(), limit, "applying post-detection action");
    let mut pending = steps.iter();
    let mut in_flight = FuturesUnordered::new();
    let mut first_error: Option<CycleError> = None;

    loop {
        while first_error.is_none() && in_flight.len() < limit {
            match pending.next() {
                Some(step) => in_flight.push(apply_one(store, step)),
                None => break,
            }
        }

        match in_flight.next().await {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                warn!("{}", err);
                first_error.get_or_insert(err);
            }
            None => break,
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => {
            info!("applied {} to {} objects", action, objects.len());
            Ok(())
        }
    }
}

/// Destination of every move, keeping each name relative to `source`.
///
/// Fails before anything is copied when two objects would land on the same
/// name, or when a destination is another object of the batch.
fn plan_moves<'a>(
    objects: &'a [ObjectRef],
    source: &Location,
    directory: &'a Location,
) -> Result<Vec<Step<'a>>, CycleError> {
    let sources: HashSet<(&str, &str)> = objects
        .iter()
        .map(|o| (o.bucket.as_str(), o.name.as_str()))
        .collect();
    let mut claimed: HashMap<String, &ObjectRef> = HashMap::new();
    let mut steps = Vec::with_capacity(objects.len());

    for object in objects {
        let destination = directory.child(source.relative_name(&object.name));
        if directory.bucket == object.bucket && destination == object.name {
            warn!(
                "{} is already in move directory {}, leaving it in place",
                object.gs_uri(),
                directory
            );
            continue;
        }

        let conflict = |other: &str| CycleError::MoveConflict {
            object: object.gs_uri(),
            destination: format!("gs://{}/{}", directory.bucket, destination),
            other: other.to_string(),
        };
        if let Some(previous) = claimed.get(&destination) {
            return Err(conflict(&previous.gs_uri()));
        }
        if sources.contains(&(directory.bucket.as_str(), destination.as_str())) {
            return Err(conflict(&format!(
                "gs://{}/{}",
                directory.bucket, destination
            )));
        }

        claimed.insert(destination.clone(), object);
        steps.push(Step::Move {
            object,
            bucket: &directory.bucket,
            destination,
        });
    }
    Ok(steps)
}

async fn apply_one(store: &dyn RemoteStore, step: &Step<'_>) -> Result<(), CycleError> {
    match step {
        Step::Delete(object) => store
            .delete(&object.bucket, &object.name)
            .await
            .map_err(|source| CycleError::Action {
                action: "DELETE",
                object: object.gs_uri(),
                source,
            }),
        Step::Move {
            object,
            bucket,
            destination,
        } => move_object(store, object, bucket, destination).await,
    }
}

/// Copy to `bucket`/`destination`, then delete the source. A failed copy
/// leaves the source untouched; a failed delete leaves both copies in place.
async fn move_object(
    store: &dyn RemoteStore,
    object: &ObjectRef,
    bucket: &str,
    destination: &str,
) -> Result<(), CycleError> {
    let action_error = |source| CycleError::Action {
        action: "MOVE",
        object: object.gs_uri(),
        source,
    };

    store
        .copy(&object.bucket, &object.name, bucket, destination)
        .await
        .map_err(action_error)?;
    store
        .delete(&object.bucket, &object.name)
        .await
        .map_err(action_error)?;

    debug!("moved {} to gs://{}/{}", object.gs_uri(), bucket, destination);
    Ok(())
}
