//! Request pipeline in front of the application.
//!
//! Every request passes through an ordered list of [`Stage`]s. A stage either
//! answers the request itself ([`Flow::Respond`]) or hands it, possibly
//! modified, to the next stage ([`Flow::Next`]). Requests that pass every
//! stage reach the application router. After the response is known, each
//! stage may observe it.

pub mod stages;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

use crate::service::ServiceProvider;

pub use stages::{ProtocolRoutes, RequestLog, SessionGate};

/// Outcome of one stage.
pub enum Flow {
    /// Stop here and send this response.
    Respond(Response),
    /// Continue with the next stage.
    Next(Request),
}

/// What the pipeline remembers about a request once it has been consumed.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// HTTP method.
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestHead {
    fn of(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            headers: request.headers().clone(),
        }
    }
}

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Answer the request or pass it on.
    async fn handle(&self, request: Request) -> Flow;

    /// Observe the final response.
    fn on_response(&self, _request: &RequestHead, _response: &Response) {}
}

/// Ordered stages, run by [`dispatch`].
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn with(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Request logging, then the SAML endpoints, then the session gate.
    pub fn standard(service: Arc<ServiceProvider>) -> Self {
        Self::new()
            .with(RequestLog::new(service.config().session_cookie_name.clone()))
            .with(ProtocolRoutes::new(service.clone()))
            .with(SessionGate::new(service))
    }

    /// Run `request` through the stages, falling through to `next`.
    pub async fn run(&self, request: Request, next: Next) -> Response {
        let head = RequestHead::of(&request);

        let response = 'stages: {
            let mut request = request;
            for stage in &self.stages {
                request = match stage.handle(request).await {
                    Flow::Next(request) => request,
                    Flow::Respond(response) => break 'stages response,
                };
            }
            next.run(request).await
        };

        for stage in &self.stages {
            stage.on_response(&head, &response);
        }
        response
    }
}

/// axum middleware entry point; install with
/// `axum::middleware::from_fn_with_state(pipeline, dispatch)`.
pub async fn dispatch(
    State(pipeline): State<Arc<Pipeline>>,
    request: Request,
    next: Next,
) -> Response {
    pipeline.run(request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{middleware, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::util::ServiceExt;

    struct Block(&'static str);

    #[async_trait]
    impl Stage for Block {
        async fn handle(&self, request: Request) -> Flow {
            if request.uri().path() == self.0 {
                Flow::Respond(StatusCode::FORBIDDEN.into_response())
            } else {
                Flow::Next(request)
            }
        }
    }

    #[derive(Default)]
    struct Count(AtomicUsize);

    #[async_trait]
    impl Stage for Arc<Count> {
        async fn handle(&self, request: Request) -> Flow {
            self.0.fetch_add(1, Ordering::SeqCst);
            Flow::Next(request)
        }
    }

    fn app(pipeline: Pipeline) -> Router {
        Router::new()
            .route("/open", get(|| async { "open" }))
            .route("/blocked", get(|| async { "unreachable" }))
            .layer(middleware::from_fn_with_state(Arc::new(pipeline), dispatch))
    }

    #[tokio::test]
    async fn stops_at_first_response() {
        let count = Arc::new(Count::default());
        let app = app(Pipeline::new().with(Block("/blocked")).with(count.clone()));

        let response = app
            .clone()
            .oneshot(HttpRequest::builder().uri("/blocked").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(count.0.load(Ordering::SeqCst), 0);

        let response = app
            .oneshot(HttpRequest::builder().uri("/open").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
    }
}
