// game-manager — binary entry point.
//
// Exit codes: 0 normal, 1 fatal configuration error, 2 transport lost
// without a graceful shutdown. Logging goes to stderr; stdout belongs to the
// upstream protocol when running with --stdio.

use clap::Parser;
use game_manager::engine::ipc::IpcRouter;
use game_manager::engine::mux::{run_session, SessionEnd};
use game_manager::engine::state::Config;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "game-manager",
    version,
    about = "Lets LLM-driven agents observe and control headless RTS games"
)]
struct Cli {
    /// Serve one session over stdin/stdout.
    #[arg(long, conflicts_with = "tcp")]
    stdio: bool,

    /// Listen for sessions on this TCP port.
    #[arg(long, value_name = "PORT")]
    tcp: Option<u16>,

    /// Root for per-instance write directories.
    #[arg(long, value_name = "PATH")]
    write_dir: Option<PathBuf>,

    /// User-shared content tree (maps, games, engine binaries).
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Engine binary override.
    #[arg(long, value_name = "PATH", env = "GM_ENGINE_PATH")]
    engine_path: Option<PathBuf>,

    /// Built Bridge shared library to install into write directories.
    #[arg(long, value_name = "PATH", env = "GM_BRIDGE_LIBRARY")]
    bridge_library: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = Config::with_roots(cli.write_dir, cli.data_dir);
    config.engine_path = cli.engine_path;
    config.bridge_library = cli.bridge_library;
    config.lobby_username = std::env::var("GM_LOBBY_USERNAME").ok();
    config.lobby_password = std::env::var("GM_LOBBY_PASSWORD").ok();
    let config = Arc::new(config);

    if let Err(e) = std::fs::create_dir_all(&config.write_root) {
        error!("cannot create write root {}: {e}", config.write_root.display());
        std::process::exit(1);
    }

    // One IPC socket per run; Bridges present their per-instance token over it.
    let socket_path = std::env::temp_dir().join(format!("game-manager-{}.sock", Uuid::new_v4()));
    let router = IpcRouter::new(socket_path);
    {
        let router = router.clone();
        tokio::spawn(async move {
            if let Err(e) = router.run().await {
                error!("ipc router failed: {e}");
                std::process::exit(1);
            }
        });
    }

    let code = if cli.stdio {
        let end = run_session(tokio::io::stdin(), tokio::io::stdout(), config, router).await;
        match end {
            Ok(SessionEnd::Graceful) => 0,
            Ok(SessionEnd::TransportLost) => 2,
            Err(e) => {
                error!("session failed: {e}");
                2
            }
        }
    } else if let Some(port) = cli.tcp {
        serve_tcp(port, config, router).await
    } else {
        error!("no transport selected; pass --stdio or --tcp <port>");
        1
    };
    std::process::exit(code);
}

async fn serve_tcp(port: u16, config: Arc<Config>, router: Arc<IpcRouter>) -> i32 {
    let listener = match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind 127.0.0.1:{port}: {e}");
            return 1;
        }
    };
    info!("listening on 127.0.0.1:{port}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!("session from {peer}");
                        let config = config.clone();
                        let router = router.clone();
                        tokio::spawn(async move {
                            let (read_half, write_half) = stream.into_split();
                            match run_session(read_half, write_half, config, router).await {
                                Ok(end) => info!("session from {peer} ended: {end:?}"),
                                Err(e) => warn!("session from {peer} failed: {e}"),
                            }
                        });
                    }
                    Err(e) => warn!("accept error: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; shutting down");
                return 0;
            }
        }
    }
}
