// Bridge-local error enum. The Bridge never reports errors upstream through
// return values — the engine ignores them — so these surface in the log and,
// where a command is involved, as `command_error` events.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    /// GM_IPC_SOCKET / GM_HANDSHAKE_TOKEN not present in the engine
    /// environment.
    #[error("missing environment: {0}")]
    Environment(String),

    #[error("engine callback table is null")]
    NullCallback,
}

pub type BridgeResult<T> = Result<T, BridgeError>;
