//! Service-provider configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Service-provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpConfig {
    /// SP entity ID. Defaults to the SP metadata URL when empty.
    #[serde(default)]
    pub entity_id: String,

    /// Externally visible base URL of this service (e.g. `https://app.example.com`).
    #[serde(default)]
    pub root_url: String,

    /// Path serving SP metadata.
    #[serde(default = "default_metadata_path")]
    pub metadata_path: String,

    /// Assertion Consumer Service path (IdP posts the SAML response here).
    #[serde(default = "default_acs_path")]
    pub acs_path: String,

    /// Local logout path.
    #[serde(default = "default_logout_path")]
    pub logout_path: String,

    /// IdP metadata URL (fetched at startup and on refresh).
    #[serde(default)]
    pub idp_metadata_url: Option<String>,

    /// IdP metadata XML (inline, alternative to URL).
    #[serde(default)]
    pub idp_metadata_xml: Option<String>,

    /// SP certificate (PEM file).
    #[serde(default)]
    pub certificate_path: Option<String>,

    /// SP private key (PEM file).
    #[serde(default)]
    pub private_key_path: Option<String>,

    /// Sign AuthnRequests sent over the redirect binding.
    #[serde(default = "default_true")]
    pub sign_authn_requests: bool,

    /// Sign the SP metadata document.
    #[serde(default)]
    pub sign_metadata: bool,

    /// Accept responses without InResponseTo (IdP-initiated login).
    #[serde(default)]
    pub allow_idp_initiated: bool,

    /// NameID format to request (optional).
    /// e.g., "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress"
    #[serde(default)]
    pub name_id_format: Option<String>,

    /// Clock skew tolerance in seconds.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,

    /// How long an AuthnRequest stays answerable, in seconds.
    #[serde(default = "default_request_ttl")]
    pub request_ttl_secs: u64,

    /// Upper bound on outstanding AuthnRequests.
    #[serde(default = "default_max_pending")]
    pub max_pending_requests: usize,

    /// Session TTL in seconds (default: 8 hours).
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Cookie name for session ID.
    #[serde(default = "default_cookie_name")]
    pub session_cookie_name: String,

    /// Cookie domain (optional, defaults to request host).
    #[serde(default)]
    pub cookie_domain: Option<String>,

    /// Cookie path.
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,

    /// Require HTTPS for cookies (Secure flag).
    #[serde(default = "default_true")]
    pub cookie_secure: bool,

    /// Set HttpOnly flag on cookies.
    #[serde(default = "default_true")]
    pub cookie_http_only: bool,

    /// SameSite attribute. `Lax` lets the IdP's POST-back redirect carry the cookie.
    #[serde(default = "default_same_site")]
    pub cookie_same_site: String,

    /// Paths to protect (if empty, protects all).
    #[serde(default)]
    pub protected_paths: Vec<String>,

    /// Paths that bypass authentication.
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,

    /// IdP metadata refresh interval in seconds (0 disables refresh).
    #[serde(default = "default_metadata_refresh")]
    pub metadata_refresh_secs: u64,

    /// Timeout for outbound metadata fetches, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Cleanup interval in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Session store path (redb database file). In-memory when unset.
    #[serde(default)]
    pub session_store_path: Option<String>,
}

fn default_metadata_path() -> String {
    "/saml/metadata".to_string()
}

fn default_acs_path() -> String {
    "/saml/acs".to_string()
}

fn default_logout_path() -> String {
    "/saml/logout".to_string()
}

fn default_true() -> bool {
    true
}

fn default_clock_skew() -> i64 {
    90
}

fn default_request_ttl() -> u64 {
    300 // 5 minutes
}

fn default_max_pending() -> usize {
    100_000
}

fn default_session_ttl() -> u64 {
    8 * 60 * 60 // 8 hours
}

fn default_cookie_name() -> String {
    "saml_sp_session".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_same_site() -> String {
    "Lax".to_string()
}

fn default_excluded_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

fn default_metadata_refresh() -> u64 {
    3600
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_cleanup_interval() -> u64 {
    crate::session::DEFAULT_CLEANUP_INTERVAL_SECS
}

impl Default for SpConfig {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            root_url: String::new(),
            metadata_path: default_metadata_path(),
            acs_path: default_acs_path(),
            logout_path: default_logout_path(),
            idp_metadata_url: None,
            idp_metadata_xml: None,
            certificate_path: None,
            private_key_path: None,
            sign_authn_requests: true,
            sign_metadata: false,
            allow_idp_initiated: false,
            name_id_format: None,
            clock_skew_secs: default_clock_skew(),
            request_ttl_secs: default_request_ttl(),
            max_pending_requests: default_max_pending(),
            session_ttl_secs: default_session_ttl(),
            session_cookie_name: default_cookie_name(),
            cookie_domain: None,
            cookie_path: default_cookie_path(),
            cookie_secure: true,
            cookie_http_only: true,
            cookie_same_site: default_same_site(),
            protected_paths: Vec::new(),
            excluded_paths: default_excluded_paths(),
            metadata_refresh_secs: default_metadata_refresh(),
            fetch_timeout_secs: default_fetch_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            session_store_path: None,
        }
    }
}

impl SpConfig {
    /// Load a JSON config file and overlay it on the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let overlay: SpConfigJson =
            serde_json::from_str(&text).map_err(|e| ConfigError::Invalid {
                field: "config",
                reason: e.to_string(),
            })?;
        let mut config = Self::default();
        overlay.apply_to(&mut config);
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_url.is_empty() {
            return Err(ConfigError::Missing("root_url"));
        }
        if !self.root_url.starts_with("http://") && !self.root_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                field: "root_url",
                reason: "must be an absolute http(s) URL".to_string(),
            });
        }

        for (field, path) in [
            ("metadata_path", &self.metadata_path),
            ("acs_path", &self.acs_path),
            ("logout_path", &self.logout_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must start with '/'".to_string(),
                });
            }
        }

        if self.idp_metadata_url.is_none() && self.idp_metadata_xml.is_none() {
            return Err(ConfigError::Missing("idp_metadata_url or idp_metadata_xml"));
        }

        if self.clock_skew_secs < 0 {
            return Err(ConfigError::Invalid {
                field: "clock_skew_secs",
                reason: "must not be negative".to_string(),
            });
        }
        if self.session_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "session_ttl_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.request_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_ttl_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.session_cookie_name.is_empty()
            || self
                .session_cookie_name
                .contains(|c: char| c.is_whitespace() || "=;,".contains(c))
        {
            return Err(ConfigError::Invalid {
                field: "session_cookie_name",
                reason: "not a valid cookie name".to_string(),
            });
        }

        Ok(())
    }

    fn absolute(&self, path: &str) -> String {
        format!("{}{}", self.root_url.trim_end_matches('/'), path)
    }

    /// Absolute URL of the ACS endpoint.
    pub fn acs_url(&self) -> String {
        self.absolute(&self.acs_path)
    }

    /// Absolute URL of the SP metadata document.
    pub fn metadata_url(&self) -> String {
        self.absolute(&self.metadata_path)
    }

    /// Absolute URL of the logout endpoint.
    pub fn logout_url(&self) -> String {
        self.absolute(&self.logout_path)
    }

    /// Entity ID, falling back to the metadata URL.
    pub fn effective_entity_id(&self) -> String {
        if self.entity_id.is_empty() {
            self.metadata_url()
        } else {
            self.entity_id.clone()
        }
    }

    /// Check if a path should require a session.
    pub fn should_protect_path(&self, path: &str) -> bool {
        // Check exclusions first
        if self
            .excluded_paths
            .iter()
            .any(|excluded| path.starts_with(excluded.as_str()))
        {
            return false;
        }

        // If protected_paths is empty, protect everything
        self.protected_paths.is_empty()
            || self
                .protected_paths
                .iter()
                .any(|protected| path.starts_with(protected.as_str()))
    }

    fn cookie_attributes(&self, cookie: &mut String, max_age: u64) {
        if let Some(ref domain) = self.cookie_domain {
            cookie.push_str(&format!("; Domain={}", domain));
        }

        cookie.push_str(&format!("; Path={}", self.cookie_path));

        if self.cookie_secure {
            cookie.push_str("; Secure");
        }

        if self.cookie_http_only {
            cookie.push_str("; HttpOnly");
        }

        cookie.push_str(&format!("; SameSite={}", self.cookie_same_site));
        cookie.push_str(&format!("; Max-Age={}", max_age));
    }

    /// Build the `Set-Cookie` value carrying a session ID.
    pub fn build_cookie(&self, session_id: &str, max_age_secs: u64) -> String {
        let mut cookie = format!("{}={}", self.session_cookie_name, session_id);
        self.cookie_attributes(&mut cookie, max_age_secs);
        cookie
    }

    /// Build a `Set-Cookie` value that removes the session cookie.
    pub fn build_clear_cookie(&self) -> String {
        let mut cookie = format!("{}=", self.session_cookie_name);
        self.cookie_attributes(&mut cookie, 0);
        cookie
    }

    /// Parse session ID from cookie header.
    pub fn parse_session_cookie(&self, cookie_header: &str) -> Option<String> {
        let prefix = format!("{}=", self.session_cookie_name);
        cookie_header
            .split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix(prefix.as_str()))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// JSON configuration file format. Every field is optional and overrides the default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SpConfigJson {
    pub entity_id: Option<String>,
    pub root_url: Option<String>,
    pub metadata_path: Option<String>,
    pub acs_path: Option<String>,
    pub logout_path: Option<String>,
    pub idp_metadata_url: Option<String>,
    pub idp_metadata_xml: Option<String>,
    pub certificate_path: Option<String>,
    pub private_key_path: Option<String>,
    pub sign_authn_requests: Option<bool>,
    pub sign_metadata: Option<bool>,
    pub allow_idp_initiated: Option<bool>,
    pub name_id_format: Option<String>,
    pub clock_skew_secs: Option<i64>,
    pub request_ttl_secs: Option<u64>,
    pub max_pending_requests: Option<usize>,
    pub session_ttl_secs: Option<u64>,
    pub session_cookie_name: Option<String>,
    pub cookie_domain: Option<String>,
    pub cookie_path: Option<String>,
    pub cookie_secure: Option<bool>,
    pub cookie_http_only: Option<bool>,
    pub cookie_same_site: Option<String>,
    #[serde(default)]
    pub protected_paths: Vec<String>,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    pub metadata_refresh_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
    pub session_store_path: Option<String>,
}

impl SpConfigJson {
    /// Merge JSON config into existing config.
    pub fn apply_to(&self, config: &mut SpConfig) {
        if let Some(ref entity_id) = self.entity_id {
            config.entity_id = entity_id.clone();
        }
        if let Some(ref root_url) = self.root_url {
            config.root_url = root_url.clone();
        }
        if let Some(ref path) = self.metadata_path {
            config.metadata_path = path.clone();
        }
        if let Some(ref path) = self.acs_path {
            config.acs_path = path.clone();
        }
        if let Some(ref path) = self.logout_path {
            config.logout_path = path.clone();
        }
        if let Some(ref url) = self.idp_metadata_url {
            config.idp_metadata_url = Some(url.clone());
        }
        if let Some(ref xml) = self.idp_metadata_xml {
            config.idp_metadata_xml = Some(xml.clone());
        }
        if let Some(ref path) = self.certificate_path {
            config.certificate_path = Some(path.clone());
        }
        if let Some(ref path) = self.private_key_path {
            config.private_key_path = Some(path.clone());
        }
        if let Some(sign) = self.sign_authn_requests {
            config.sign_authn_requests = sign;
        }
        if let Some(sign) = self.sign_metadata {
            config.sign_metadata = sign;
        }
        if let Some(allow) = self.allow_idp_initiated {
            config.allow_idp_initiated = allow;
        }
        if let Some(ref format) = self.name_id_format {
            config.name_id_format = Some(format.clone());
        }
        if let Some(skew) = self.clock_skew_secs {
            config.clock_skew_secs = skew;
        }
        if let Some(ttl) = self.request_ttl_secs {
            config.request_ttl_secs = ttl;
        }
        if let Some(max) = self.max_pending_requests {
            config.max_pending_requests = max;
        }
        if let Some(ttl) = self.session_ttl_secs {
            config.session_ttl_secs = ttl;
        }
        if let Some(ref name) = self.session_cookie_name {
            config.session_cookie_name = name.clone();
        }
        if let Some(ref domain) = self.cookie_domain {
            config.cookie_domain = Some(domain.clone());
        }
        if let Some(ref path) = self.cookie_path {
            config.cookie_path = path.clone();
        }
        if let Some(secure) = self.cookie_secure {
            config.cookie_secure = secure;
        }
        if let Some(http_only) = self.cookie_http_only {
            config.cookie_http_only = http_only;
        }
        if let Some(ref same_site) = self.cookie_same_site {
            config.cookie_same_site = same_site.clone();
        }
        if !self.protected_paths.is_empty() {
            config.protected_paths = self.protected_paths.clone();
        }
        if !self.excluded_paths.is_empty() {
            config.excluded_paths = self.excluded_paths.clone();
        }
        if let Some(secs) = self.metadata_refresh_secs {
            config.metadata_refresh_secs = secs;
        }
        if let Some(secs) = self.fetch_timeout_secs {
            config.fetch_timeout_secs = secs;
        }
        if let Some(secs) = self.cleanup_interval_secs {
            config.cleanup_interval_secs = secs;
        }
        if let Some(ref path) = self.session_store_path {
            config.session_store_path = Some(path.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SpConfig {
        SpConfig {
            root_url: "https://sp.example.com".to_string(),
            idp_metadata_url: Some("https://idp.example.com/metadata".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_match_sp_profile() {
        let config = SpConfig::default();
        assert_eq!(config.session_ttl_secs, 8 * 60 * 60);
        assert_eq!(config.clock_skew_secs, 90);
        assert_eq!(config.request_ttl_secs, 300);
        assert_eq!(config.cookie_path, "/");
        assert!(config.cookie_secure);
        assert!(config.cookie_http_only);
        assert!(config.sign_authn_requests);
        assert!(!config.allow_idp_initiated);
    }

    #[test]
    fn test_validation() {
        let mut config = SpConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("root_url"))
        ));

        config.root_url = "sp.example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "root_url", .. })
        ));

        config.root_url = "https://sp.example.com".to_string();
        assert!(config.validate().is_err()); // missing IdP metadata

        config.idp_metadata_xml = Some("<EntityDescriptor/>".to_string());
        assert!(config.validate().is_ok());

        config.acs_path = "acs".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_urls() {
        let mut config = valid_config();
        config.root_url = "https://sp.example.com/".to_string();
        assert_eq!(config.acs_url(), "https://sp.example.com/saml/acs");
        assert_eq!(config.metadata_url(), "https://sp.example.com/saml/metadata");
        assert_eq!(config.effective_entity_id(), config.metadata_url());

        config.entity_id = "urn:example:sp".to_string();
        assert_eq!(config.effective_entity_id(), "urn:example:sp");
    }

    #[test]
    fn test_gated_path_prefixes() {
        let mut config = valid_config();

        // Empty protected_paths = protect everything except /health
        assert!(config.should_protect_path("/api/users"));
        assert!(config.should_protect_path("/admin"));
        assert!(!config.should_protect_path("/health"));

        config.excluded_paths = vec!["/health".to_string(), "/metrics".to_string()];
        assert!(!config.should_protect_path("/metrics"));

        config.protected_paths = vec!["/api".to_string(), "/admin".to_string()];
        assert!(config.should_protect_path("/api/users"));
        assert!(config.should_protect_path("/admin/settings"));
        assert!(!config.should_protect_path("/public/docs"));
    }

    #[test]
    fn test_session_cookie_lookup() {
        let config = SpConfig::default();
        let cookie = "other=value; saml_sp_session=abc123def456; another=test";
        assert_eq!(
            config.parse_session_cookie(cookie),
            Some("abc123def456".to_string())
        );

        assert_eq!(config.parse_session_cookie("no_session=here"), None);
        assert_eq!(config.parse_session_cookie("saml_sp_session="), None);
    }

    #[test]
    fn test_set_cookie_attributes() {
        let mut config = SpConfig::default();
        config.cookie_domain = Some("example.com".to_string());

        let cookie = config.build_cookie("session123", 600);
        assert!(cookie.starts_with("saml_sp_session=session123"));
        assert!(cookie.contains("Domain=example.com"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=600"));

        let cleared = config.build_clear_cookie();
        assert!(cleared.starts_with("saml_sp_session=;"));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[test]
    fn test_json_overlay() {
        let json = r#"{
            "root-url": "https://sp.example.com",
            "idp-metadata-url": "https://idp.example.com/md",
            "allow-idp-initiated": true,
            "session-ttl-secs": 60,
            "excluded-paths": ["/public"]
        }"#;
        let overlay: SpConfigJson = serde_json::from_str(json).unwrap();
        let mut config = SpConfig::default();
        overlay.apply_to(&mut config);

        assert!(config.allow_idp_initiated);
        assert_eq!(config.session_ttl_secs, 60);
        assert_eq!(config.excluded_paths, vec!["/public".to_string()]);
        assert!(config.sign_authn_requests); // untouched default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_rejects_unknown_keys() {
        assert!(serde_json::from_str::<SpConfigJson>(r#"{"nope": 1}"#).is_err());
    }
}
