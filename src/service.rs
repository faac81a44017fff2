//! The service-provider object.
//!
//! [`ServiceProvider`] owns everything the SAML endpoints need (config, key
//! material, metadata, stores, clock). It is built once at startup and shared
//! by reference with request handlers and background tasks.

use chrono::Duration;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::config::SpConfig;
use crate::error::{ConfigError, ProtocolError, SessionError, SpError};
use crate::metadata::{sp_metadata_xml, MetadataSource, MetadataStore};
use crate::request::{MemoryPendingStore, PendingRequestStore, RequestBuilder};
use crate::response::ResponseValidator;
use crate::session::{MemorySessionStore, RedbSessionStore, Session, SessionManager, SessionStore};
use crate::signature::SpKeyPair;

/// Result of a successful ACS POST.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// The new session.
    pub session: Session,
    /// `Set-Cookie` value carrying the session ID.
    pub set_cookie: String,
    /// Local path to send the browser to.
    pub redirect_to: String,
}

/// Counts from one sweep of expired state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired sessions removed.
    pub sessions: usize,
    /// Expired pending AuthnRequests removed.
    pub pending_requests: usize,
    /// Replay records for expired assertions removed.
    pub replay_records: usize,
}

impl SweepReport {
    /// Everything removed.
    pub fn total(&self) -> usize {
        self.sessions + self.pending_requests + self.replay_records
    }
}

/// SAML service provider: login, ACS handling, session lookup and logout.
pub struct ServiceProvider {
    config: SpConfig,
    entity_id: String,
    acs_url: String,
    keys: Arc<SpKeyPair>,
    metadata: Arc<MetadataStore>,
    pending: Arc<dyn PendingRequestStore>,
    requests: RequestBuilder,
    validator: ResponseValidator,
    sessions: SessionManager,
    clock: SharedClock,
}

impl ServiceProvider {
    /// Start building a provider from validated configuration.
    pub fn builder(config: SpConfig) -> ServiceProviderBuilder {
        ServiceProviderBuilder::new(config)
    }

    /// Configuration in effect.
    pub fn config(&self) -> &SpConfig {
        &self.config
    }

    /// SP entity ID.
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// IdP metadata store (for startup fetch and the refresh task).
    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// Session manager.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Begin SP-initiated login. Returns the IdP redirect URL.
    pub fn start_login(&self, relay_state: Option<&str>) -> Result<String, SpError> {
        let (request, url) = self.requests.build(relay_state)?;
        info!(request_id = %request.id, "Redirecting to IdP for authentication");
        Ok(url)
    }

    /// Handle the `SAMLResponse` posted to the ACS and issue a session.
    ///
    /// The relay state recorded with the AuthnRequest wins; the posted
    /// `RelayState` is only used for IdP-initiated logins.
    pub fn complete_login(
        &self,
        saml_response: &str,
        posted_relay_state: Option<&str>,
    ) -> Result<LoginOutcome, SpError> {
        let assertion = match self.validator.validate_encoded(saml_response, &self.acs_url) {
            Ok(assertion) => assertion,
            Err(e) => {
                warn!(reason = e.reason_code(), error = %e, "SAML response rejected");
                return Err(e.into());
            }
        };

        // Inside the skew window yet already past NotOnOrAfter.
        let now = self.clock.now();
        if assertion.not_on_or_after.is_some_and(|t| t <= now) {
            let err = ProtocolError::Expired;
            warn!(reason = err.reason_code(), assertion_id = %assertion.id, "SAML response rejected");
            return Err(err.into());
        }

        let relay_state = match assertion.in_response_to {
            Some(_) => assertion.relay_state.as_deref(),
            None => posted_relay_state,
        };
        let redirect_to = safe_relay_state(relay_state);

        let session = self.sessions.issue(&assertion)?;
        let set_cookie = self.session_cookie(&session);

        info!(
            user_id = %session.subject,
            assertion_id = %assertion.id,
            redirect = %redirect_to,
            "SAML login completed"
        );
        Ok(LoginOutcome {
            session,
            set_cookie,
            redirect_to,
        })
    }

    /// Resolve the session named by a `Cookie` header.
    pub fn resolve_session(&self, cookie_header: Option<&str>) -> Result<Session, SessionError> {
        let token = cookie_header
            .and_then(|header| self.config.parse_session_cookie(header))
            .ok_or(SessionError::NotFound)?;
        self.sessions.resolve_token(&token)
    }

    /// Revoke the session named by a `Cookie` header, if any.
    pub fn logout(&self, cookie_header: Option<&str>) -> Result<Option<Session>, SessionError> {
        let session = match self.resolve_session(cookie_header) {
            Ok(session) => session,
            Err(SessionError::NotFound | SessionError::Expired) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.sessions.revoke(&session.id)?;
        info!(user_id = %session.subject, "Session logged out");
        Ok(Some(session))
    }

    /// `Set-Cookie` value for a session, expiring with it.
    pub fn session_cookie(&self, session: &Session) -> String {
        self.config
            .build_cookie(&session.id.to_hex(), session.remaining_secs(self.clock.now()))
    }

    /// `Set-Cookie` value that removes the session cookie.
    pub fn clear_cookie(&self) -> String {
        self.config.build_clear_cookie()
    }

    /// This SP's metadata document.
    pub fn metadata_xml(&self) -> Result<String, SpError> {
        Ok(sp_metadata_xml(&self.config, &self.keys)?)
    }

    /// Evict expired sessions, pending requests and replay records.
    pub fn sweep_expired(&self) -> SweepReport {
        let now = self.clock.now();
        let sessions = self.sessions.sweep().unwrap_or_else(|e| {
            warn!(error = %e, "Session cleanup failed");
            0
        });
        SweepReport {
            sessions,
            pending_requests: self.pending.evict_expired(now),
            replay_records: self.validator.evict_expired(now),
        }
    }
}

/// Only same-origin absolute paths are followed after login.
pub fn safe_relay_state(relay_state: Option<&str>) -> String {
    match relay_state {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.starts_with("/\\")
                && path.bytes().all(|b| b.is_ascii_graphic()) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

/// Assembles a [`ServiceProvider`], defaulting every collaborator that is
/// not supplied.
pub struct ServiceProviderBuilder {
    config: SpConfig,
    keys: Option<Arc<SpKeyPair>>,
    metadata: Option<Arc<MetadataStore>>,
    session_store: Option<Arc<dyn SessionStore>>,
    pending_store: Option<Arc<dyn PendingRequestStore>>,
    clock: Option<SharedClock>,
}

impl ServiceProviderBuilder {
    fn new(config: SpConfig) -> Self {
        Self {
            config,
            keys: None,
            metadata: None,
            session_store: None,
            pending_store: None,
            clock: None,
        }
    }

    /// SP certificate and signing key.
    pub fn keys(mut self, keys: SpKeyPair) -> Self {
        self.keys = Some(Arc::new(keys));
        self
    }

    /// Use an existing metadata store instead of one built from the config.
    pub fn metadata(mut self, metadata: Arc<MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Session backend. Defaults to redb when `session_store_path` is set,
    /// otherwise memory.
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Pending AuthnRequest backend.
    pub fn pending_store(mut self, store: Arc<dyn PendingRequestStore>) -> Self {
        self.pending_store = Some(store);
        self
    }

    /// Time source. Defaults to the system clock.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and wire everything together.
    ///
    /// Key material is loaded from the configured paths when not supplied.
    /// Metadata is not fetched here; call [`MetadataStore::refresh`] before
    /// serving.
    pub fn build(self) -> Result<ServiceProvider, SpError> {
        let config = self.config;
        config.validate()?;

        let keys = match self.keys {
            Some(keys) => keys,
            None => {
                let cert = config
                    .certificate_path
                    .as_deref()
                    .ok_or(ConfigError::Missing("certificate_path"))?;
                let key = config
                    .private_key_path
                    .as_deref()
                    .ok_or(ConfigError::Missing("private_key_path"))?;
                Arc::new(SpKeyPair::load(Path::new(cert), Path::new(key))?)
            }
        };

        let metadata = match self.metadata {
            Some(metadata) => metadata,
            None => {
                let source = match (&config.idp_metadata_url, &config.idp_metadata_xml) {
                    (Some(url), _) => MetadataSource::Url(url.clone()),
                    (None, Some(xml)) => MetadataSource::Inline(xml.clone()),
                    (None, None) => {
                        return Err(ConfigError::Missing("idp_metadata_url or idp_metadata_xml").into())
                    }
                };
                Arc::new(MetadataStore::new(
                    source,
                    StdDuration::from_secs(config.fetch_timeout_secs),
                )?)
            }
        };

        let session_store: Arc<dyn SessionStore> = match (self.session_store, &config.session_store_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(RedbSessionStore::open(Path::new(path))?),
            (None, None) => Arc::new(MemorySessionStore::new()),
        };
        let pending = self
            .pending_store
            .unwrap_or_else(|| Arc::new(MemoryPendingStore::new(config.max_pending_requests)));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let entity_id = config.effective_entity_id();
        let acs_url = config.acs_url();

        let requests = RequestBuilder::new(
            metadata.clone(),
            pending.clone(),
            keys.clone(),
            clock.clone(),
            entity_id.clone(),
            acs_url.clone(),
            config.name_id_format.clone(),
            config.sign_authn_requests,
            Duration::seconds(i64::try_from(config.request_ttl_secs).unwrap_or(i64::MAX)),
        );
        let validator = ResponseValidator::new(
            metadata.clone(),
            pending.clone(),
            clock.clone(),
            entity_id.clone(),
            Duration::seconds(config.clock_skew_secs),
            config.allow_idp_initiated,
        );
        let sessions = SessionManager::new(
            session_store,
            clock.clone(),
            Duration::seconds(i64::try_from(config.session_ttl_secs).unwrap_or(i64::MAX)),
        );

        info!(
            entity_id = %entity_id,
            acs_url = %acs_url,
            sign_requests = config.sign_authn_requests,
            idp_initiated = config.allow_idp_initiated,
            "Service provider configured"
        );

        Ok(ServiceProvider {
            config,
            entity_id,
            acs_url,
            keys,
            metadata,
            pending,
            requests,
            validator,
            sessions,
            clock,
        })
    }
}
