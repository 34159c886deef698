// GameManager — library entry point.
// The binary in main.rs wires transports to `engine::mux::run_session`; the
// integration tests drive the same entry point over in-memory pipes.

// ── Atoms (constants, shared types, error enum) ────────────────────────────
pub mod atoms;

// ── Engine (multiplexer, lobby, supervisor, IPC router, tools) ─────────────
pub mod engine;
