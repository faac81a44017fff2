//! SAML SP Gate
//!
//! Serves a small protected application behind the SAML service-provider
//! pipeline: SP metadata, the Assertion Consumer Service, logout, and a
//! session-gated `/session` endpoint.

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use saml_sp_gate::metadata::spawn_refresh_task;
use saml_sp_gate::session::spawn_cleanup_task;
use saml_sp_gate::{echo_session, router, ServiceProvider, SpConfig};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "saml-sp-gate")]
#[command(about = "SAML 2.0 service provider in front of a protected application")]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "SAML_SP_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080", env = "SAML_SP_LISTEN")]
    listen: SocketAddr,

    /// Externally visible base URL of this service
    #[arg(long, env = "SAML_SP_ROOT_URL")]
    root_url: Option<String>,

    /// SP entity ID (defaults to the metadata URL)
    #[arg(long, env = "SAML_SP_ENTITY_ID")]
    entity_id: Option<String>,

    /// IdP metadata URL
    #[arg(long, env = "SAML_IDP_METADATA_URL")]
    idp_metadata_url: Option<String>,

    /// SP certificate (PEM)
    #[arg(long, env = "SAML_SP_CERT")]
    cert: Option<PathBuf>,

    /// SP private key (PEM, PKCS#8 or PKCS#1 RSA)
    #[arg(long, env = "SAML_SP_KEY")]
    key: Option<PathBuf>,

    /// Session store path (redb). Sessions are kept in memory when unset.
    #[arg(long, env = "SAML_SESSION_STORE_PATH")]
    session_store: Option<PathBuf>,

    /// Accept IdP-initiated responses
    #[arg(long, env = "SAML_ALLOW_IDP_INITIATED")]
    allow_idp_initiated: bool,

    /// Enable verbose logging
    #[arg(short, long, env = "SAML_SP_VERBOSE")]
    verbose: bool,
}

impl Args {
    /// Configuration file (or defaults) with command line overrides applied.
    fn load_config(&self) -> Result<SpConfig> {
        let mut config = match &self.config {
            Some(path) => SpConfig::from_file(path)
                .with_context(|| format!("Failed to load config: {:?}", path))?,
            None => SpConfig::default(),
        };

        if let Some(root_url) = &self.root_url {
            config.root_url = root_url.clone();
        }
        if let Some(entity_id) = &self.entity_id {
            config.entity_id = entity_id.clone();
        }
        if let Some(url) = &self.idp_metadata_url {
            config.idp_metadata_url = Some(url.clone());
        }
        if let Some(cert) = &self.cert {
            config.certificate_path = Some(cert.display().to_string());
        }
        if let Some(key) = &self.key {
            config.private_key_path = Some(key.display().to_string());
        }
        if let Some(path) = &self.session_store {
            config.session_store_path = Some(path.display().to_string());
        }
        if self.allow_idp_initiated {
            config.allow_idp_initiated = true;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .json()
        .init();

    info!("Starting SAML SP gate");

    let config = args.load_config()?;
    let refresh_secs = config.metadata_refresh_secs;
    let cleanup_secs = config.cleanup_interval_secs;

    info!(
        root_url = %config.root_url,
        acs_url = %config.acs_url(),
        allow_idp_initiated = config.allow_idp_initiated,
        persistent_sessions = config.session_store_path.is_some(),
        "Configuration loaded"
    );

    let provider = Arc::new(
        ServiceProvider::builder(config)
            .build()
            .context("Failed to build service provider")?,
    );

    // Initial metadata load is fatal; later refreshes keep the last snapshot.
    provider
        .metadata()
        .refresh()
        .await
        .context("Failed to load IdP metadata")?;

    let _refresh_handle = (refresh_secs > 0).then(|| {
        info!(interval_secs = refresh_secs, "Starting metadata refresh task");
        spawn_refresh_task(Arc::clone(provider.metadata()), refresh_secs)
    });

    info!(interval_secs = cleanup_secs, "Starting cleanup task");
    let _cleanup_handle = spawn_cleanup_task(Arc::clone(&provider), cleanup_secs);

    let app = router(
        provider,
        Router::new().route("/session", get(echo_session)),
    );

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
