// ── GameManager Atoms: Constants ───────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic strings,
// makes auditing easier, and keeps every layer's code self-documenting.

// ── Upstream protocol ──────────────────────────────────────────────────────
// Version string exchanged at `initialize`. Clients negotiating an unknown
// version are served at this version anyway; the field is informational.
pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SERVER_NAME: &str = "game-manager";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

// Default deadline for a tool invocation when the client does not set one.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 120_000;

// ── Lobby protocol ─────────────────────────────────────────────────────────
pub const DEFAULT_LOBBY_PORT: u16 = 8200;
// Client identifier advertised at login. The lobby server logs this verbatim.
pub const LOBBY_CLIENT_ID: &str = "GameManager 0.1";
pub const LOBBY_LOCALE: &str = "en";
// Channel id carrying non-room lobby events (battles, users, private messages).
pub const LOBBY_GLOBAL_CHANNEL: &str = "lobby";

// ── Engine supervisor ──────────────────────────────────────────────────────
// How long a spawned engine has to produce a Bridge handshake before the
// instance is torn down and its channel closed with an `engine` error.
pub const HANDSHAKE_DEADLINE_SECS: u64 = 60;
// Installed artifact identity. The write-dir path AI/Skirmish/<name>/<version>/
// must match what the generated start-script references.
pub const BRIDGE_AI_NAME: &str = "SkirmishBridge";
pub const BRIDGE_AI_VERSION: &str = "0.1";
// File name of the bootstrap widget installed under LuaUI/Widgets/.
pub const BOOTSTRAP_WIDGET: &str = "gm_bootstrap";
// Player name used for the Bridge-controlled slot in generated start-scripts.
pub const BRIDGE_PLAYER_NAME: &str = "GameManager";
// Game archive used when a start request does not name one.
pub const DEFAULT_GAME: &str = "Zero-K $VERSION";
// Opponent AI used when a start request does not name one.
pub const DEFAULT_OPPONENT: &str = "NullAI";

// ── Bridge IPC ─────────────────────────────────────────────────────────────
// Environment variables the supervisor sets on the engine process. The Bridge
// reads them from inside the engine (same process, inherited environment).
pub const ENV_IPC_SOCKET: &str = "GM_IPC_SOCKET";
pub const ENV_HANDSHAKE_TOKEN: &str = "GM_HANDSHAKE_TOKEN";

// Inbound command queue capacity inside the Bridge. When full, further
// commands are rejected with `command_error("backpressure")`.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;
// `update` events are emitted once per this many sim frames (30 frames is
// one second at normal game speed).
pub const UPDATE_THROTTLE_FRAMES: i32 = 30;
