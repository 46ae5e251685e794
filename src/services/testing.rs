//! Test doubles for the remote store.

use crate::{
    models::object::ObjectRef,
    services::remote_store::{ByteStream, ObjectStoreRemote, RemoteStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{PutPayload, path::Path};
use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
};

pub async fn put(remote: &ObjectStoreRemote, bucket: &str, name: &str, data: &str) {
    remote
        .store_for(bucket)
        .unwrap()
        .put(
            &Path::parse(name).unwrap(),
            PutPayload::from_bytes(Bytes::from(data.to_string())),
        )
        .await
        .unwrap();
}

pub async fn exists(remote: &ObjectStoreRemote, bucket: &str, name: &str) -> bool {
    remote
        .store_for(bucket)
        .unwrap()
        .head(&Path::parse(name).unwrap())
        .await
        .is_ok()
}

pub async fn read(remote: &ObjectStoreRemote, bucket: &str, name: &str) -> String {
    let bytes = remote
        .store_for(bucket)
        .unwrap()
        .get(&Path::parse(name).unwrap())
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// In-memory store that counts calls and fails chosen operations.
///
/// Failures are keyed by object name and fire on every matching call.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: ObjectStoreRemote,
    fail_list: bool,
    fail_get: HashSet<String>,
    stall_get: HashSet<String>,
    fail_copy: HashSet<String>,
    fail_delete: HashSet<String>,
    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub copy_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl Default for ObjectStoreRemote {
    fn default() -> Self {
        ObjectStoreRemote::in_memory()
    }
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn failing_get(mut self, name: &str) -> Self {
        self.fail_get.insert(name.to_string());
        self
    }

    /// `get` of `name` never completes.
    pub fn stalling_get(mut self, name: &str) -> Self {
        self.stall_get.insert(name.to_string());
        self
    }

    pub fn failing_copy(mut self, name: &str) -> Self {
        self.fail_copy.insert(name.to_string());
        self
    }

    pub fn failing_delete(mut self, name: &str) -> Self {
        self.fail_delete.insert(name.to_string());
        self
    }

    pub async fn put(&self, bucket: &str, name: &str, data: &str) {
        put(&self.inner, bucket, name, data).await
    }

    pub async fn exists(&self, bucket: &str, name: &str) -> bool {
        exists(&self.inner, bucket, name).await
    }

    pub async fn read(&self, bucket: &str, name: &str) -> String {
        read(&self.inner, bucket, name).await
    }

    pub fn calls(&self) -> (usize, usize, usize, usize) {
        (
            self.list_calls.load(Ordering::SeqCst),
            self.get_calls.load(Ordering::SeqCst),
            self.copy_calls.load(Ordering::SeqCst),
            self.delete_calls.load(Ordering::SeqCst),
        )
    }
}

fn injected(op: &str, name: &str) -> StoreError {
    StoreError::Backend(format!("injected {} failure for {}", op, name))
}

#[async_trait]
impl RemoteStore for FaultyStore {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> StoreResult<Vec<ObjectRef>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(injected("list", prefix));
        }
        self.inner.list(bucket, prefix, recursive).await
    }

    async fn get(&self, bucket: &str, name: &str) -> StoreResult<ByteStream> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.contains(name) {
            return Err(injected("get", name));
        }
        if self.stall_get.contains(name) {
            futures::future::pending::<()>().await;
        }
        self.inner.get(bucket, name).await
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_name: &str,
        dst_bucket: &str,
        dst_name: &str,
    ) -> StoreResult<()> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_copy.contains(src_name) {
            return Err(injected("copy", src_name));
        }
        self.inner
            .copy(src_bucket, src_name, dst_bucket, dst_name)
            .await
    }

    async fn delete(&self, bucket: &str, name: &str) -> StoreResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.contains(name) {
            return Err(injected("delete", name));
        }
        self.inner.delete(bucket, name).await
    }
}
