//! src/services/staging_service.rs
//!
//! StagingStore: workflow-scoped local storage for objects detected by the
//! trigger. Every download lands beneath
//! `base_path/{namespace}/{flow}/executions/{execution}/trigger/{trigger}/{uuid}/{file}`
//! and is addressed by a `file://` URI handed to the emitted execution.

use crate::{
    errors::CycleError,
    models::{
        execution::{CycleContext, TriggerContext},
        object::ObjectRef,
    },
    services::remote_store::{ByteStream, RemoteStore, StoreError},
};
use base64::{Engine as _, engine::general_purpose};
use futures::StreamExt;
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const MAX_RELATIVE_PATH_LEN: usize = 1024;
const FALLBACK_FILE_NAME: &str = "blob";

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("invalid staging path")]
    InvalidPath,
    #[error("staged file `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Source(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StagingResult<T> = Result<T, StagingError>;

/// A payload written to staging.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub uri: Url,
    pub path: PathBuf,
    pub size: u64,
    /// Base64 MD5 digest, same encoding as the GCS `md5Hash` field.
    pub md5_hash: String,
}

#[derive(Clone, Debug)]
pub struct StagingStore {
    /// Absolute root directory for staged payloads.
    base_path: PathBuf,
}

impl StagingStore {
    /// Create the root directory if needed and anchor it to an absolute path.
    pub async fn open(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        let base_path = fs::canonicalize(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Root of everything staged for one execution.
    fn execution_dir(&self, cycle: &CycleContext<'_>) -> StagingResult<PathBuf> {
        self.execution_path(cycle.trigger, cycle.execution_id)
    }

    /// Directory holding the payloads staged for execution `execution_id`.
    pub fn execution_path(
        &self,
        trigger: &TriggerContext,
        execution_id: Uuid,
    ) -> StagingResult<PathBuf> {
        ensure_segment_safe(&trigger.namespace)?;
        ensure_segment_safe(&trigger.flow_id)?;
        let mut path = self.base_path.clone();
        path.push(&trigger.namespace);
        path.push(&trigger.flow_id);
        path.push("executions");
        path.push(execution_id.to_string());
        Ok(path)
    }

    /// Stream `stream` into a fresh file owned by this cycle's trigger.
    ///
    /// - Writes to a temporary file, computing size and MD5 on the way.
    /// - fsyncs, then renames into place.
    /// - Removes the temporary file on any error.
    ///
    /// Each call gets its own directory, so staging the same object twice
    /// yields two independent copies.
    pub async fn put_stream(
        &self,
        cycle: &CycleContext<'_>,
        file_name: &str,
        mut stream: ByteStream,
    ) -> StagingResult<StagedFile> {
        ensure_segment_safe(&cycle.trigger.trigger_id)?;
        let mut dir = self.execution_dir(cycle)?;
        dir.push("trigger");
        dir.push(&cycle.trigger.trigger_id);
        dir.push(Uuid::new_v4().to_string());
        fs::create_dir_all(&dir).await?;

        let file_path = dir.join(safe_file_name(file_name));
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StagingError::Source(err));
                }
            };
            size += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StagingError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StagingError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StagingError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StagingError::Io(err));
        }

        let uri = Url::from_file_path(&file_path).map_err(|_| {
            StagingError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                "staging path is not absolute",
            ))
        })?;
        let md5_hash = general_purpose::STANDARD.encode(digest.compute().0);
        debug!(
            "staged {} bytes at {} (md5 {})",
            size,
            file_path.display(),
            md5_hash
        );

        Ok(StagedFile {
            uri,
            path: file_path,
            size,
            md5_hash,
        })
    }

    /// Download `object` into staging and return it with its local `uri`.
    ///
    /// No retry: a failed download fails the cycle.
    pub async fn materialize(
        &self,
        store: &dyn RemoteStore,
        object: &ObjectRef,
        cycle: &CycleContext<'_>,
    ) -> Result<ObjectRef, CycleError> {
        let download_error = |source: StoreError| CycleError::Download {
            object: object.gs_uri(),
            source,
        };
        let staging_error = |source: io::Error| CycleError::Staging {
            object: object.gs_uri(),
            source,
        };

        let stream = store
            .get(&object.bucket, &object.name)
            .await
            .map_err(download_error)?;

        let staged = self
            .put_stream(cycle, object.file_name(), stream)
            .await
            .map_err(|err| match err {
                StagingError::Source(source) => download_error(source),
                StagingError::Io(source) => staging_error(source),
                other => staging_error(io::Error::new(ErrorKind::InvalidInput, other.to_string())),
            })?;

        Ok(ObjectRef {
            size: staged.size,
            ..object.clone().with_uri(staged.uri)
        })
    }

    /// Remove everything staged for a cycle that did not emit an execution.
    pub async fn discard(&self, cycle: &CycleContext<'_>) -> StagingResult<()> {
        let dir = self.execution_dir(cycle)?;
        match fs::remove_dir_all(&dir).await {
            Ok(_) => debug!("discarded staging directory {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StagingError::Io(err)),
        }
        if let Some(parent) = dir.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Open a staged file by its path relative to the staging root.
    pub async fn open_file(&self, relative: &str) -> StagingResult<(File, u64)> {
        ensure_relative_path_safe(relative)?;
        let path = self.base_path.join(relative);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StagingError::NotFound(relative.to_string())
            } else {
                StagingError::Io(err)
            }
        })?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(StagingError::NotFound(relative.to_string()));
        }
        Ok((file, meta.len()))
    }

    /// Recursively remove empty directories up to the staging root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// A single path segment: no separators, no traversal, no control bytes.
fn ensure_segment_safe(segment: &str) -> StagingResult<()> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(StagingError::InvalidPath);
    }
    if segment
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\')
    {
        return Err(StagingError::InvalidPath);
    }
    Ok(())
}

fn ensure_relative_path_safe(relative: &str) -> StagingResult<()> {
    if relative.is_empty() || relative.len() > MAX_RELATIVE_PATH_LEN {
        return Err(StagingError::InvalidPath);
    }
    if relative.starts_with('/') {
        return Err(StagingError::InvalidPath);
    }
    relative.split('/').try_for_each(ensure_segment_safe)
}

fn safe_file_name(name: &str) -> &str {
    if ensure_segment_safe(name).is_ok() && !name.starts_with(".tmp-") {
        name
    } else {
        FALLBACK_FILE_NAME
    }
}
