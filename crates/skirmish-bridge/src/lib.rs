// skirmish-bridge — the native AI the engine loads as a shared library.
//
// Three C-linkage exports make up the whole ABI surface: `init`, `release`,
// `handleEvent`. The engine offers no user-data pointer, so the library
// keeps a registry of live instances keyed by skirmish AI id — the one piece
// of static state in the crate, unavoidable and confined to this file.

pub mod commands;
pub mod error;
pub mod events;
pub mod ffi;
pub mod instance;
pub mod ipc;
pub mod queues;

use instance::AiInstance;
use log::{error, info};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ffi::{c_int, c_void};
use std::sync::Once;

static LOG_INIT: Once = Once::new();
static INSTANCES: Mutex<BTreeMap<i32, AiInstance>> = Mutex::new(BTreeMap::new());

fn init_logging() {
    // The engine captures stderr into its own log.
    LOG_INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .try_init();
    });
}

/// Engine entry point: a skirmish AI instance was created.
///
/// # Safety
/// `callback` must be a valid engine callback table that outlives the
/// instance; the engine guarantees both.
#[no_mangle]
pub unsafe extern "C" fn init(
    skirmish_ai_id: c_int,
    callback: *const ffi::SSkirmishAICallback,
) -> c_int {
    init_logging();
    match AiInstance::start(skirmish_ai_id, callback) {
        Ok(instance) => {
            INSTANCES.lock().insert(skirmish_ai_id, instance);
            info!("[bridge] instance {skirmish_ai_id} initialized");
            0
        }
        Err(e) => {
            error!("[bridge] init failed for {skirmish_ai_id}: {e}");
            -1
        }
    }
}

/// Engine entry point: the instance is going away. Dropping it flushes the
/// event queue and joins the IPC thread.
#[no_mangle]
pub extern "C" fn release(skirmish_ai_id: c_int) -> c_int {
    match INSTANCES.lock().remove(&skirmish_ai_id) {
        Some(instance) => {
            drop(instance);
            info!("[bridge] instance {skirmish_ai_id} released");
            0
        }
        None => -1,
    }
}

/// Engine entry point: one event on the sim thread.
///
/// # Safety
/// `data` must point at the payload struct the engine documents for `topic`.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn handleEvent(
    skirmish_ai_id: c_int,
    topic: c_int,
    data: *const c_void,
) -> c_int {
    match INSTANCES.lock().get_mut(&skirmish_ai_id) {
        Some(instance) => instance.handle_event(topic, data),
        None => -1,
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn release_of_unknown_instance_is_an_error() {
        assert_eq!(super::release(1234), -1);
    }

    #[test]
    fn handle_event_without_init_is_an_error() {
        let code = unsafe { super::handleEvent(1234, super::ffi::EVENT_UPDATE, std::ptr::null()) };
        assert_eq!(code, -1);
    }
}
