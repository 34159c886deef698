// GameManager Engine — session multiplexing, lobby client, engine
// supervision, and the Bridge IPC router. Everything here is owned by a
// session except the IPC router, which is shared across sessions because it
// owns the one listening socket.

pub mod ipc;
pub mod lobby;
pub mod mux;
pub mod state;
pub mod supervisor;
pub mod tools;
