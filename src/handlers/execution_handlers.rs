//! Read-only views over what the trigger has emitted.
//!
//! Executions come from SQLite; staged payloads are streamed straight from
//! the staging directory without buffering.

use crate::{errors::AppError, handlers::AppState, models::execution::Execution};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub limit: Option<i64>,
}

/// GET `/executions?limit=`, newest first.
pub async fn list_executions(
    State(state): State<AppState>,
    Query(q): Query<ListExecutionsQuery>,
) -> Result<Json<Vec<Execution>>, AppError> {
    let executions = state
        .executions
        .list_recent(q.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(executions))
}

/// GET `/executions/{id}`
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Execution>, AppError> {
    Ok(Json(state.executions.get(id).await?))
}

/// GET `/staging/{*path}`: download a staged payload by its path relative
/// to the staging root.
pub async fn get_staged_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let (file, len) = state.staging.open_file(&path).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_state;
    use crate::models::{
        execution::{CycleContext, PollResult, TriggerContext},
        object::ObjectRef,
    };
    use axum::response::IntoResponse;
    use futures::StreamExt;

    fn trigger() -> TriggerContext {
        TriggerContext {
            namespace: "io.example".into(),
            flow_id: "gcs-listen".into(),
            flow_revision: 3,
            trigger_id: "watch".into(),
        }
    }

    #[tokio::test]
    async fn lists_and_fetches_executions() {
        let (_dir, state) = test_state().await;
        let trigger = trigger();
        let execution = Execution::from_poll(
            &CycleContext::new(&trigger),
            PollResult {
                blobs: vec![ObjectRef::file("b", "in/a.txt")],
            },
        );
        state.executions.insert(&execution).await.unwrap();

        let Json(listed) = list_executions(
            State(state.clone()),
            Query(ListExecutionsQuery { limit: None }),
        )
        .await
        .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, execution.id);

        let Json(fetched) = get_execution(State(state), Path(execution.id))
            .await
            .unwrap();
        assert_eq!(fetched.flow_revision, 3);
    }

    #[tokio::test]
    async fn unknown_execution_is_404() {
        let (_dir, state) = test_state().await;
        let err = get_execution(State(state), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn streams_staged_payload() {
        let (_dir, state) = test_state().await;
        let trigger = trigger();
        let cycle = CycleContext::new(&trigger);
        let staged = state
            .staging
            .put_stream(
                &cycle,
                "a.txt",
                futures::stream::iter(vec![Ok(bytes::Bytes::from("payload"))]).boxed(),
            )
            .await
            .unwrap();
        let relative = staged
            .path
            .strip_prefix(state.staging.base_path())
            .unwrap()
            .to_string_lossy()
            .into_owned();

        let response = get_staged_file(State(state), Path(relative)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "7"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn staged_path_traversal_is_rejected() {
        let (_dir, state) = test_state().await;
        let err = get_staged_file(State(state), Path("../secret".into()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
