//! Remote object store seam.
//!
//! `RemoteStore` is the only surface the poll cycle uses to reach a bucket.
//! `ObjectStoreRemote` implements it on top of the `object_store` crate,
//! either against Google Cloud Storage or an in-process `InMemory` store,
//! building one client per bucket on first use.

use crate::models::object::ObjectRef;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use object_store::{
    ObjectMeta, ObjectStore, PutPayload, gcp::GoogleCloudStorageBuilder, memory::InMemory,
    path::Path,
};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{name}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, name: String },
    #[error("invalid object name `{name}`: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Streamed object payload.
pub type ByteStream = BoxStream<'static, StoreResult<Bytes>>;

/// Operations the trigger needs from a remote object store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List entries under `prefix`. Without `recursive`, nested prefixes are
    /// returned as directory entries instead of being descended into.
    async fn list(&self, bucket: &str, prefix: &str, recursive: bool)
    -> StoreResult<Vec<ObjectRef>>;

    /// Open an object for streaming.
    async fn get(&self, bucket: &str, name: &str) -> StoreResult<ByteStream>;

    /// Copy an object, possibly across buckets. The destination only
    /// appears once the copy has fully succeeded.
    async fn copy(
        &self,
        src_bucket: &str,
        src_name: &str,
        dst_bucket: &str,
        dst_name: &str,
    ) -> StoreResult<()>;

    async fn delete(&self, bucket: &str, name: &str) -> StoreResult<()>;
}

/// Google Cloud credentials, passed through to the client builder.
#[derive(Clone, Default)]
pub struct GcpAuth {
    pub project_id: Option<String>,
    /// Service account key, either inline JSON or a path to a JSON key file.
    /// Application Default Credentials are used when absent.
    pub service_account: Option<String>,
    pub scopes: Vec<String>,
}

impl fmt::Debug for GcpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let service_account = match self.service_account.as_deref() {
            Some(raw) if raw.trim_start().starts_with('{') => Some("<inline key>"),
            other => other,
        };
        f.debug_struct("GcpAuth")
            .field("project_id", &self.project_id)
            .field("service_account", &service_account)
            .field("scopes", &self.scopes)
            .finish()
    }
}

enum Provider {
    Gcs(GcpAuth),
    Memory,
}

/// `RemoteStore` backed by `object_store` clients.
pub struct ObjectStoreRemote {
    provider: Provider,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreRemote {
    pub fn gcs(auth: GcpAuth) -> Self {
        info!(
            project_id = ?auth.project_id,
            scopes = ?auth.scopes,
            "using Google Cloud Storage backend"
        );
        Self {
            provider: Provider::Gcs(auth),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Each bucket gets its own `InMemory` store, kept for the lifetime of
    /// this value.
    pub fn in_memory() -> Self {
        Self {
            provider: Provider::Memory,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Return the client for `bucket`, building it on first use.
    pub(crate) fn store_for(&self, bucket: &str) -> StoreResult<Arc<dyn ObjectStore>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| StoreError::Backend("store registry lock poisoned".into()))?;
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let store: Arc<dyn ObjectStore> = match &self.provider {
            Provider::Memory => Arc::new(InMemory::new()),
            Provider::Gcs(auth) => {
                let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(bucket);
                if let Some(account) = &auth.service_account {
                    builder = if account.trim_start().starts_with('{') {
                        builder.with_service_account_key(account)
                    } else {
                        builder.with_service_account_path(account)
                    };
                }
                let client = builder.build().map_err(|e| {
                    StoreError::Backend(format!("failed to create GCS client: {}", e))
                })?;
                debug!("created GCS client for bucket {}", bucket);
                Arc::new(client)
            }
        };

        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }
}

/// Object names are used verbatim as `object_store` paths. `Path::from`
/// would percent-encode characters such as `#` or `%` a second time.
fn object_path(name: &str) -> StoreResult<Path> {
    Path::parse(name).map_err(|e| StoreError::InvalidName {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// `None` for the bucket root, otherwise the normalized prefix path.
fn prefix_path(prefix: &str) -> StoreResult<Option<Path>> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        Ok(None)
    } else {
        object_path(trimmed).map(Some)
    }
}

fn map_store_error(bucket: &str, name: &str, err: object_store::Error) -> StoreError {
    match err {
        object_store::Error::NotFound { .. } => StoreError::NotFound {
            bucket: bucket.to_string(),
            name: name.to_string(),
        },
        other => StoreError::Backend(other.to_string()),
    }
}

fn object_ref(bucket: &str, meta: ObjectMeta) -> ObjectRef {
    ObjectRef {
        size: meta.size as u64,
        updated: Some(meta.last_modified),
        etag: meta.e_tag,
        ..ObjectRef::file(bucket, meta.location.as_ref())
    }
}

#[async_trait]
impl RemoteStore for ObjectStoreRemote {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> StoreResult<Vec<ObjectRef>> {
        let store = self.store_for(bucket)?;
        let prefix_path = prefix_path(prefix)?;
        debug!("LIST gs://{}/{} (recursive: {})", bucket, prefix, recursive);

        if recursive {
            let metas: Vec<ObjectMeta> = store
                .list(prefix_path.as_ref())
                .try_collect()
                .await
                .map_err(|e| map_store_error(bucket, prefix, e))?;
            return Ok(metas.into_iter().map(|m| object_ref(bucket, m)).collect());
        }

        let listing = store
            .list_with_delimiter(prefix_path.as_ref())
            .await
            .map_err(|e| map_store_error(bucket, prefix, e))?;

        let mut entries: Vec<ObjectRef> = listing
            .objects
            .into_iter()
            .map(|m| object_ref(bucket, m))
            .collect();
        entries.extend(
            listing
                .common_prefixes
                .into_iter()
                .map(|p| ObjectRef::directory(bucket, p.as_ref())),
        );
        Ok(entries)
    }

    async fn get(&self, bucket: &str, name: &str) -> StoreResult<ByteStream> {
        let store = self.store_for(bucket)?;
        debug!("GET gs://{}/{}", bucket, name);

        let result = store
            .get(&object_path(name)?)
            .await
            .map_err(|e| map_store_error(bucket, name, e))?;

        let (bucket, name) = (bucket.to_string(), name.to_string());
        Ok(result
            .into_stream()
            .map(move |chunk| chunk.map_err(|e| map_store_error(&bucket, &name, e)))
            .boxed())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_name: &str,
        dst_bucket: &str,
        dst_name: &str,
    ) -> StoreResult<()> {
        let src = self.store_for(src_bucket)?;
        let src_path = object_path(src_name)?;
        let dst_path = object_path(dst_name)?;
        debug!(
            "COPY gs://{}/{} -> gs://{}/{}",
            src_bucket, src_name, dst_bucket, dst_name
        );

        if src_bucket == dst_bucket {
            return src
                .copy(&src_path, &dst_path)
                .await
                .map_err(|e| map_store_error(src_bucket, src_name, e));
        }

        // No server-side copy between buckets: read fully, then write once.
        let payload = src
            .get(&src_path)
            .await
            .map_err(|e| map_store_error(src_bucket, src_name, e))?
            .bytes()
            .await
            .map_err(|e| map_store_error(src_bucket, src_name, e))?;

        let dst = self.store_for(dst_bucket)?;
        dst.put(&dst_path, PutPayload::from_bytes(payload))
            .await
            .map_err(|e| map_store_error(dst_bucket, dst_name, e))?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, name: &str) -> StoreResult<()> {
        let store = self.store_for(bucket)?;
        debug!("DELETE gs://{}/{}", bucket, name);

        store
            .delete(&object_path(name)?)
            .await
            .map_err(|e| map_store_error(bucket, name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{exists, put, read};

    #[test]
    fn debug_hides_inline_service_account() {
        let auth = GcpAuth {
            project_id: Some("proj".into()),
            service_account: Some(r#"{"private_key": "secret"}"#.into()),
            scopes: vec![DEFAULT_SCOPE.into()],
        };
        let rendered = format!("{:?}", auth);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<inline key>"));

        let by_path = GcpAuth {
            service_account: Some("/etc/gcp/key.json".into()),
            ..GcpAuth::default()
        };
        assert!(format!("{:?}", by_path).contains("/etc/gcp/key.json"));
    }

    #[tokio::test]
    async fn directory_listing_reports_nested_prefixes() {
        let remote = ObjectStoreRemote::in_memory();
        put(&remote, "b", "in/a.txt", "a").await;
        put(&remote, "b", "in/nested/b.txt", "b").await;
        put(&remote, "b", "other/c.txt", "c").await;

        let entries = remote.list("b", "in/", false).await.unwrap();
        let names: Vec<(&str, bool)> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.is_directory))
            .collect();

        assert_eq!(names, vec![("in/a.txt", false), ("in/nested/", true)]);
        assert_eq!(entries[0].size, 1);
    }

    #[tokio::test]
    async fn recursive_listing_descends() {
        let remote = ObjectStoreRemote::in_memory();
        put(&remote, "b", "in/a.txt", "a").await;
        put(&remote, "b", "in/nested/b.txt", "b").await;
        put(&remote, "b", "other/c.txt", "c").await;

        let mut names: Vec<String> = remote
            .list("b", "in", true)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();

        assert_eq!(names, vec!["in/a.txt", "in/nested/b.txt"]);
    }

    #[tokio::test]
    async fn buckets_are_isolated() {
        let remote = ObjectStoreRemote::in_memory();
        put(&remote, "one", "x.txt", "1").await;

        assert!(remote.list("two", "", true).await.unwrap().is_empty());
        assert_eq!(remote.list("one", "", true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let remote = ObjectStoreRemote::in_memory();
        let err = remote.get("b", "missing.txt").await.err().unwrap();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn copy_across_buckets() {
        let remote = ObjectStoreRemote::in_memory();
        put(&remote, "src", "in/a.txt", "payload").await;

        remote
            .copy("src", "in/a.txt", "dst", "archive/a.txt")
            .await
            .unwrap();

        assert_eq!(read(&remote, "dst", "archive/a.txt").await, "payload");
        assert!(exists(&remote, "src", "in/a.txt").await);
    }

    #[tokio::test]
    async fn copy_of_missing_source_creates_nothing() {
        let remote = ObjectStoreRemote::in_memory();
        let err = remote
            .copy("src", "nope.txt", "dst", "archive/nope.txt")
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(!exists(&remote, "dst", "archive/nope.txt").await);
    }

    #[tokio::test]
    async fn listed_names_are_usable_verbatim() {
        let remote = ObjectStoreRemote::in_memory();
        put(&remote, "b", "in/report#1.csv", "r").await;
        put(&remote, "b", "in/[draft] 50%.txt", "d").await;

        let mut names: Vec<String> = remote
            .list("b", "in/", true)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["in/[draft] 50%.txt", "in/report#1.csv"]);

        for name in &names {
            remote.get("b", name).await.unwrap();
            remote.copy("b", name, "b", &format!("done/{}", &name[3..])).await.unwrap();
            remote.delete("b", name).await.unwrap();
            assert!(!exists(&remote, "b", name).await);
        }
        assert_eq!(read(&remote, "b", "done/report#1.csv").await, "r");
    }

    #[tokio::test]
    async fn empty_segments_are_invalid_names() {
        let remote = ObjectStoreRemote::in_memory();
        let err = remote.delete("b", "in//a.txt").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName { .. }));
    }
}
