//! The standard stages: request logging, SAML protocol endpoints and the
//! session gate.

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Flow, RequestHead, Stage};
use crate::error::{SessionError, SpError};
use crate::service::ServiceProvider;

/// Largest ACS form body accepted.
const MAX_FORM_BYTES: usize = 1024 * 1024;

const METADATA_CONTENT_TYPE: &str = "application/samlmetadata+xml";

fn cookie_header(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
}

fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Error page carrying only the reason code.
fn error_response(err: &SpError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.reason_code()).into_response()
}

/// Logs method, path, session-cookie presence and response status.
///
/// Bodies and header values are never logged.
pub struct RequestLog {
    cookie_prefix: String,
}

impl RequestLog {
    /// Logger that recognises the session cookie `cookie_name`.
    pub fn new(cookie_name: String) -> Self {
        Self {
            cookie_prefix: format!("{cookie_name}="),
        }
    }

    fn has_session_cookie(&self, head: &RequestHead) -> bool {
        head.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .any(|part| part.trim().starts_with(self.cookie_prefix.as_str()))
    }
}

#[async_trait]
impl Stage for RequestLog {
    async fn handle(&self, request: Request) -> Flow {
        Flow::Next(request)
    }

    fn on_response(&self, request: &RequestHead, response: &Response) {
        info!(
            method = %request.method,
            path = %request.path,
            session_cookie = self.has_session_cookie(request),
            status = response.status().as_u16(),
            "Request handled"
        );
    }
}

/// Serves SP metadata, the ACS endpoint and local logout.
pub struct ProtocolRoutes {
    service: Arc<ServiceProvider>,
}

impl ProtocolRoutes {
    pub fn new(service: Arc<ServiceProvider>) -> Self {
        Self { service }
    }

    fn metadata(&self) -> Response {
        match self.service.metadata_xml() {
            Ok(xml) => ([(header::CONTENT_TYPE, METADATA_CONTENT_TYPE)], xml).into_response(),
            Err(e) => {
                warn!(error = %e, "Failed to render SP metadata");
                error_response(&e)
            }
        }
    }

    async fn assertion_consumer(&self, request: Request) -> Response {
        let body = match to_bytes(request.into_body(), MAX_FORM_BYTES).await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "Failed to read ACS body");
                return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
            }
        };
        let Ok(body) = std::str::from_utf8(&body) else {
            return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
        };

        // Parse URL-encoded form data
        let mut saml_response: Option<String> = None;
        let mut relay_state: Option<String> = None;
        for pair in body.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                let decoded = urlencoding::decode(value)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                match key {
                    "SAMLResponse" => saml_response = Some(decoded),
                    "RelayState" => relay_state = Some(decoded),
                    _ => {}
                }
            }
        }

        let Some(saml_response) = saml_response else {
            return (StatusCode::BAD_REQUEST, "Missing SAMLResponse").into_response();
        };

        match self
            .service
            .complete_login(&saml_response, relay_state.as_deref())
        {
            Ok(outcome) => (
                StatusCode::FOUND,
                [
                    (header::LOCATION, outcome.redirect_to),
                    (header::SET_COOKIE, outcome.set_cookie),
                ],
            )
                .into_response(),
            Err(e) => error_response(&e),
        }
    }

    fn logout(&self, request: &Request) -> Response {
        if let Err(e) = self.service.logout(cookie_header(request)) {
            warn!(error = %e, "Session revocation failed during logout");
        }
        (
            StatusCode::FOUND,
            [
                (header::LOCATION, "/".to_string()),
                (header::SET_COOKIE, self.service.clear_cookie()),
            ],
        )
            .into_response()
    }
}

#[async_trait]
impl Stage for ProtocolRoutes {
    async fn handle(&self, request: Request) -> Flow {
        let config = self.service.config();
        let path = request.uri().path().to_string();
        let method = request.method().clone();

        if path == config.metadata_path {
            return Flow::Respond(match method {
                Method::GET | Method::HEAD => self.metadata(),
                _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
            });
        }
        if path == config.acs_path {
            return Flow::Respond(match method {
                Method::POST => self.assertion_consumer(request).await,
                _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
            });
        }
        if path == config.logout_path {
            return Flow::Respond(match method {
                Method::GET | Method::POST => self.logout(&request),
                _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
            });
        }
        Flow::Next(request)
    }
}

/// Lets authenticated requests through with their [`Session`] attached and
/// sends everyone else to the IdP.
///
/// [`Session`]: crate::session::Session
pub struct SessionGate {
    service: Arc<ServiceProvider>,
}

impl SessionGate {
    pub fn new(service: Arc<ServiceProvider>) -> Self {
        Self { service }
    }

    fn login_redirect(&self, request: &Request) -> Response {
        let relay_state = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        match self.service.start_login(Some(relay_state)) {
            Ok(url) => redirect(&url),
            Err(e) => {
                warn!(reason = e.reason_code(), error = %e, "Failed to create SAML redirect");
                error_response(&e)
            }
        }
    }
}

#[async_trait]
impl Stage for SessionGate {
    async fn handle(&self, mut request: Request) -> Flow {
        let path = request.uri().path().to_string();
        if !self.service.config().should_protect_path(&path) {
            return Flow::Next(request);
        }

        match self.service.resolve_session(cookie_header(&request)) {
            Ok(session) => {
                debug!(user_id = %session.subject, "Session authenticated");
                request.extensions_mut().insert(session);
                Flow::Next(request)
            }
            Err(SessionError::NotFound | SessionError::Expired) => {
                if matches!(request.method(), &Method::GET | &Method::HEAD) {
                    info!(path = %path, "No valid session, redirecting to SAML IdP");
                    Flow::Respond(self.login_redirect(&request))
                } else {
                    Flow::Respond(StatusCode::UNAUTHORIZED.into_response())
                }
            }
            Err(e) => {
                warn!(error = %e, "Session lookup failed");
                Flow::Respond(error_response(&SpError::from(e)))
            }
        }
    }
}
