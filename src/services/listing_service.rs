//! Listing: enumerate the objects at a location and keep the ones the
//! request asks for. Read-only.

use crate::{
    errors::CycleError,
    models::{
        listing::{ListingRequest, ListingType},
        object::ObjectRef,
    },
    services::remote_store::RemoteStore,
};
use tracing::debug;

/// List `request.location`, then apply the name pattern and the type filter
/// in that order. Store errors propagate unchanged in meaning.
pub async fn list(
    store: &dyn RemoteStore,
    request: &ListingRequest,
) -> Result<Vec<ObjectRef>, CycleError> {
    let location = &request.location;
    let recursive = request.listing_type == ListingType::Recursive;

    let entries = store
        .list(&location.bucket, &location.prefix, recursive)
        .await
        .map_err(|source| CycleError::List {
            location: location.to_string(),
            source,
        })?;
    let listed = entries.len();

    let kept: Vec<ObjectRef> = entries
        .into_iter()
        .filter(|entry| {
            request
                .pattern
                .as_ref()
                .is_none_or(|pattern| pattern.is_match(&entry.name))
        })
        .filter(|entry| request.filter.keeps(entry.is_directory))
        .collect();

    debug!(
        "listed {} entries at {}, kept {}",
        listed,
        location,
        kept.len()
    );
    Ok(kept)
}
