//! HTTP surface: the application router wrapped in the SAML pipeline.

use axum::http::StatusCode;
use axum::routing::get;
use axum::{middleware, Extension, Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dispatcher::{dispatch, Pipeline};
use crate::service::ServiceProvider;
use crate::session::Session;

/// Wrap `app` so every request passes through the standard pipeline.
///
/// Adds `/health` and a fallback so unmatched paths (including the SAML
/// endpoints, which the pipeline answers) still pass through it.
pub fn router(service: Arc<ServiceProvider>, app: Router) -> Router {
    let pipeline = Arc::new(Pipeline::standard(service));
    app.route("/health", get(health))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(pipeline, dispatch))
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Identity visible to application handlers.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub subject: String,
    pub idp: String,
    pub attributes: BTreeMap<String, Vec<String>>,
    pub expires_at: String,
}

/// Protected handler that echoes the caller's session.
pub async fn echo_session(Extension(session): Extension<Session>) -> Json<SessionView> {
    Json(SessionView {
        subject: session.subject,
        idp: session.idp_entity_id,
        attributes: session.attributes,
        expires_at: session.expires_at.to_rfc3339(),
    })
}
