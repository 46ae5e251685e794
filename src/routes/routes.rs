//! HTTP surface of the trigger daemon.
//!
//! ## Structure
//! - **Probes**
//!   - `GET /healthz` liveness
//!   - `GET /readyz` SQLite, staging disk and poll-cycle readiness
//!
//! - **Executions**
//!   - `GET /executions` recent executions, newest first (`?limit=`)
//!   - `GET /executions/{id}` one execution with its trigger output
//!
//! - **Staging**
//!   - `GET /staging/{*path}` stream a staged payload
//!
//! The wildcard `*path` is relative to the staging root, e.g.
//! `default/flow/executions/<id>/trigger/watch/<uuid>/a.csv`.

use crate::handlers::{
    AppState,
    execution_handlers::{get_execution, get_staged_file, list_executions},
    health_handlers::{healthz, readyz},
};
use axum::{Router, routing::get};

/// Build the router. State is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/staging/{*path}", get(get_staged_file))
}
