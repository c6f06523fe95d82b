use anyhow::{Context, Result};
use marks_application::{SessionStore, SyncController};
use marks_core::bookmark::BookmarkGateway;
use marks_core::config::AppConfig;
use marks_core::feed::ChangeFeedTransport;
use marks_core::session::{CredentialSource, Session};
use marks_infrastructure::{
    ConfigStorage, FileSessionStorage, InMemoryIdentityProvider, InMemoryRemote, MarksPaths,
    RealtimeChangeFeed, RestBookmarkGateway, RestIdentityProvider,
};
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_OWNER: &str = "demo-user";

/// Everything a command needs, wired once at startup.
pub struct AppBootstrap {
    pub sessions: Arc<SessionStore>,
    pub controller: Arc<SyncController>,
    /// Set in `--demo` mode so commands can simulate a second client
    pub demo_remote: Option<Arc<InMemoryRemote>>,
}

/// Composition root: builds the concrete adapters and hands them to the
/// application layer.
///
/// The controller is created before anything initializes the session store,
/// so the startup transition is never missed.
pub fn bootstrap(config_dir: Option<PathBuf>, demo: bool) -> Result<AppBootstrap> {
    if demo {
        return Ok(bootstrap_demo());
    }

    let paths = MarksPaths::new(config_dir);
    paths
        .ensure_config_dir()
        .context("Failed to create the config directory")?;

    let config_storage = ConfigStorage::new(&paths)?;
    let config = config_storage
        .load()
        .with_context(|| format!("Failed to load {}", config_storage.path().display()))?;
    tracing::debug!("[Bootstrap] Remote store at {}", config.remote.base_url());

    let provider = Arc::new(RestIdentityProvider::new(
        &config.remote,
        FileSessionStorage::new(&paths)?,
    ));
    let sessions = Arc::new(SessionStore::new(provider));
    let credentials: Arc<dyn CredentialSource> = sessions.clone();

    let gateway: Arc<dyn BookmarkGateway> =
        Arc::new(RestBookmarkGateway::new(&config.remote, credentials.clone()));
    let feed: Arc<dyn ChangeFeedTransport> =
        Arc::new(RealtimeChangeFeed::new(&config.remote, credentials));
    let controller = Arc::new(SyncController::from_config(
        sessions.clone(),
        gateway,
        feed,
        &config,
    ));

    Ok(AppBootstrap {
        sessions,
        controller,
        demo_remote: None,
    })
}

fn bootstrap_demo() -> AppBootstrap {
    tracing::info!("[Bootstrap] Demo mode: in-memory remote, owner {}", DEMO_OWNER);

    let remote = Arc::new(InMemoryRemote::new());
    remote.seed(DEMO_OWNER, "The Rust Programming Language", "https://doc.rust-lang.org/book/");
    remote.seed(DEMO_OWNER, "Tokio", "https://tokio.rs");
    remote.seed(DEMO_OWNER, "crates.io", "https://crates.io");
    remote.seed("someone-else", "Not yours", "https://example.com/private");

    let provider = InMemoryIdentityProvider::with_stored_session(Session::new(
        DEMO_OWNER,
        "demo-token",
    ));
    let sessions = Arc::new(SessionStore::new(Arc::new(provider)));
    let controller = Arc::new(SyncController::from_config(
        sessions.clone(),
        remote.clone(),
        remote.clone(),
        &AppConfig::default(),
    ));

    AppBootstrap {
        sessions,
        controller,
        demo_remote: Some(remote),
    }
}
