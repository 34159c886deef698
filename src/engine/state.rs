// engine/state.rs — Shared engine state and configuration.
// Configuration threads through constructors; there are no process
// singletons. One GmState exists per upstream session.

use crate::engine::ipc::IpcRouter;
use crate::engine::lobby::LobbyClient;
use crate::engine::mux::channels::ChannelTable;
use crate::engine::mux::outbox::Outbox;
use crate::engine::supervisor::Supervisor;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything configurable from the CLI and environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root under which per-instance write directories are created.
    pub write_root: PathBuf,
    /// User-shared content tree (maps, games, engine binaries, pool).
    pub data_root: PathBuf,
    /// Engine binary override; otherwise resolved under `data_root/engine`.
    pub engine_path: Option<PathBuf>,
    /// Built Bridge shared library to install into write-dirs.
    pub bridge_library: Option<PathBuf>,
    /// Optional lobby credentials from the environment.
    pub lobby_username: Option<String>,
    pub lobby_password: Option<String>,
}

impl Config {
    /// Defaults rooted in the platform data directory; the CLI overrides
    /// what it wants.
    pub fn with_roots(write_root: Option<PathBuf>, data_root: Option<PathBuf>) -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Config {
            write_root: write_root.unwrap_or_else(|| base.join("game-manager").join("instances")),
            data_root: data_root.unwrap_or_else(|| base.join("spring")),
            engine_path: None,
            bridge_library: None,
            lobby_username: None,
            lobby_password: None,
        }
    }
}

/// Per-session engine state: the channel table, the supervisor, and the
/// lobby connection slot (at most one per session).
pub struct GmState {
    pub config: Arc<Config>,
    pub channels: Arc<ChannelTable>,
    pub supervisor: Arc<Supervisor>,
    pub lobby: tokio::sync::Mutex<Option<Arc<LobbyClient>>>,
}

impl GmState {
    pub fn new(config: Arc<Config>, outbox: Outbox, router: Arc<IpcRouter>) -> Arc<Self> {
        let channels = Arc::new(ChannelTable::new(outbox));
        let supervisor = Supervisor::new(config.clone(), channels.clone(), router);
        Arc::new(GmState {
            config,
            channels,
            supervisor,
            lobby: tokio::sync::Mutex::new(None),
        })
    }
}
