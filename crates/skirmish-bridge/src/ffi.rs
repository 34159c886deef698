// Engine AI ABI boundary.
//
// Everything in this module mirrors the engine's public C headers: event
// topic ids, event payload structs, command ids, and the callback vtable.
// The vtable below lists only the entries this Bridge consumes; field names
// and signatures track the header, and the numeric constants are the
// engine's, not ours.
//
// All unsafe pointer handling lives here, behind `CallbackApi`. The rest of
// the crate sees only safe, typed values.

use crate::error::{BridgeError, BridgeResult};
use std::ffi::{c_char, c_int, c_void, CStr, CString};

// ── Event topics ───────────────────────────────────────────────────────

pub const EVENT_INIT: c_int = 1;
pub const EVENT_RELEASE: c_int = 2;
pub const EVENT_UPDATE: c_int = 3;
pub const EVENT_MESSAGE: c_int = 4;
pub const EVENT_UNIT_CREATED: c_int = 5;
pub const EVENT_UNIT_FINISHED: c_int = 6;
pub const EVENT_UNIT_IDLE: c_int = 7;
pub const EVENT_UNIT_DAMAGED: c_int = 9;
pub const EVENT_UNIT_DESTROYED: c_int = 10;
pub const EVENT_ENEMY_ENTER_LOS: c_int = 13;
pub const EVENT_ENEMY_LEAVE_LOS: c_int = 14;
pub const EVENT_ENEMY_ENTER_RADAR: c_int = 15;
pub const EVENT_ENEMY_LEAVE_RADAR: c_int = 16;
pub const EVENT_ENEMY_DESTROYED: c_int = 18;
pub const EVENT_COMMAND_FINISHED: c_int = 22;

// ── Command ids ────────────────────────────────────────────────────────
// Build commands are the negative unit-def id; everything else is a fixed
// id. OPT_SHIFT_KEY appends to the order queue instead of replacing it.

pub const CMD_STOP: c_int = 0;
pub const CMD_MOVE: c_int = 10;
pub const CMD_PATROL: c_int = 15;
pub const CMD_FIGHT: c_int = 16;
pub const CMD_ATTACK: c_int = 20;
pub const CMD_GUARD: c_int = 25;
pub const CMD_REPAIR: c_int = 40;
pub const CMD_FIRE_STATE: c_int = 45;
pub const CMD_MOVE_STATE: c_int = 50;
pub const OPT_SHIFT_KEY: c_int = 32;

// ── Event payloads ─────────────────────────────────────────────────────

#[repr(C)]
pub struct SInitEvent {
    pub skirmish_ai_id: c_int,
    pub callback: *const SSkirmishAICallback,
}

#[repr(C)]
pub struct SReleaseEvent {
    pub reason: c_int,
}

#[repr(C)]
pub struct SUpdateEvent {
    pub frame: c_int,
}

#[repr(C)]
pub struct SMessageEvent {
    pub player: c_int,
    pub message: *const c_char,
}

#[repr(C)]
pub struct SUnitCreatedEvent {
    pub unit: c_int,
    pub builder: c_int,
}

#[repr(C)]
pub struct SUnitFinishedEvent {
    pub unit: c_int,
}

#[repr(C)]
pub struct SUnitIdleEvent {
    pub unit: c_int,
}

#[repr(C)]
pub struct SUnitDamagedEvent {
    pub unit: c_int,
    pub attacker: c_int,
    pub damage: f32,
    pub dir_pos_f3: *const f32,
    pub weapon_def_id: c_int,
    pub paralyzer: bool,
}

#[repr(C)]
pub struct SUnitDestroyedEvent {
    pub unit: c_int,
    pub attacker: c_int,
}

#[repr(C)]
pub struct SEnemyEvent {
    pub enemy: c_int,
}

#[repr(C)]
pub struct SEnemyDestroyedEvent {
    pub enemy: c_int,
    pub attacker: c_int,
}

#[repr(C)]
pub struct SCommandFinishedEvent {
    pub unit_id: c_int,
    pub command_id: c_int,
    pub command_topic_id: c_int,
}

// ── Callback vtable (consumed subset) ──────────────────────────────────

#[repr(C)]
pub struct SSkirmishAICallback {
    pub game_get_current_frame: unsafe extern "C" fn(skirmish_ai_id: c_int) -> c_int,
    pub game_get_my_team: unsafe extern "C" fn(skirmish_ai_id: c_int) -> c_int,
    pub game_set_pause: unsafe extern "C" fn(skirmish_ai_id: c_int, enable: c_int) -> c_int,
    pub game_set_speed_factor:
        unsafe extern "C" fn(skirmish_ai_id: c_int, speed_factor: f32) -> c_int,
    pub game_send_text_message:
        unsafe extern "C" fn(skirmish_ai_id: c_int, text: *const c_char, zone: c_int) -> c_int,
    pub unit_is_alive: unsafe extern "C" fn(skirmish_ai_id: c_int, unit_id: c_int) -> c_int,
    pub unit_get_team: unsafe extern "C" fn(skirmish_ai_id: c_int, unit_id: c_int) -> c_int,
    pub unit_get_def: unsafe extern "C" fn(skirmish_ai_id: c_int, unit_id: c_int) -> c_int,
    pub unit_get_pos:
        unsafe extern "C" fn(skirmish_ai_id: c_int, unit_id: c_int, out_pos_f3: *mut f32) -> c_int,
    pub unit_give_order: unsafe extern "C" fn(
        skirmish_ai_id: c_int,
        unit_id: c_int,
        command_id: c_int,
        options: c_int,
        params: *const f32,
        n_params: c_int,
    ) -> c_int,
    pub unit_def_by_name:
        unsafe extern "C" fn(skirmish_ai_id: c_int, def_name: *const c_char) -> c_int,
    pub unit_def_get_name: unsafe extern "C" fn(
        skirmish_ai_id: c_int,
        unit_def_id: c_int,
        out_name: *mut c_char,
        out_len: c_int,
    ) -> c_int,
    pub map_find_closest_build_site: unsafe extern "C" fn(
        skirmish_ai_id: c_int,
        unit_def_id: c_int,
        pos_f3: *const f32,
        search_radius: f32,
        min_dist: c_int,
        out_pos_f3: *mut f32,
    ) -> c_int,
}

// ── Safe adapter ───────────────────────────────────────────────────────

/// Thin safe wrapper over the raw vtable. Copyable; the pointer stays valid
/// for the lifetime of the loaded instance (the engine owns the table).
#[derive(Clone, Copy)]
pub struct CallbackApi {
    ai_id: c_int,
    raw: *const SSkirmishAICallback,
}

// The table is immutable once handed over, and every call happens on the
// sim thread; the pointer only crosses threads inside the instance registry.
unsafe impl Send for CallbackApi {}

impl CallbackApi {
    /// # Safety
    /// `raw` must be the callback table the engine passed to `init` and must
    /// outlive every use of the returned adapter.
    pub unsafe fn new(ai_id: c_int, raw: *const SSkirmishAICallback) -> BridgeResult<Self> {
        if raw.is_null() {
            return Err(BridgeError::NullCallback);
        }
        Ok(CallbackApi { ai_id, raw })
    }

    fn table(&self) -> &SSkirmishAICallback {
        unsafe { &*self.raw }
    }

    pub fn ai_id(&self) -> i32 {
        self.ai_id
    }

    pub fn current_frame(&self) -> i32 {
        unsafe { (self.table().game_get_current_frame)(self.ai_id) }
    }

    pub fn my_team(&self) -> i32 {
        unsafe { (self.table().game_get_my_team)(self.ai_id) }
    }

    pub fn set_pause(&self, paused: bool) {
        unsafe {
            (self.table().game_set_pause)(self.ai_id, paused as c_int);
        }
    }

    pub fn set_speed(&self, factor: f32) {
        unsafe {
            (self.table().game_set_speed_factor)(self.ai_id, factor);
        }
    }

    pub fn send_text(&self, text: &str) {
        let Ok(text) = CString::new(text) else {
            return;
        };
        unsafe {
            (self.table().game_send_text_message)(self.ai_id, text.as_ptr(), 0);
        }
    }

    pub fn unit_is_alive(&self, unit_id: i32) -> bool {
        unsafe { (self.table().unit_is_alive)(self.ai_id, unit_id) != 0 }
    }

    pub fn unit_team(&self, unit_id: i32) -> i32 {
        unsafe { (self.table().unit_get_team)(self.ai_id, unit_id) }
    }

    pub fn unit_def(&self, unit_id: i32) -> i32 {
        unsafe { (self.table().unit_get_def)(self.ai_id, unit_id) }
    }

    pub fn unit_pos(&self, unit_id: i32) -> [f32; 3] {
        let mut pos = [0.0f32; 3];
        unsafe {
            (self.table().unit_get_pos)(self.ai_id, unit_id, pos.as_mut_ptr());
        }
        pos
    }

    /// Resolve a unit-def id from its name; negative ids mean unknown.
    pub fn unit_def_by_name(&self, name: &str) -> Option<i32> {
        let name = CString::new(name).ok()?;
        let id = unsafe { (self.table().unit_def_by_name)(self.ai_id, name.as_ptr()) };
        (id >= 0).then_some(id)
    }

    pub fn unit_def_name(&self, unit_def_id: i32) -> String {
        let mut buffer = [0i8 as c_char; 128];
        let written = unsafe {
            (self.table().unit_def_get_name)(
                self.ai_id,
                unit_def_id,
                buffer.as_mut_ptr(),
                buffer.len() as c_int,
            )
        };
        if written <= 0 {
            return String::new();
        }
        unsafe { CStr::from_ptr(buffer.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    pub fn give_order(&self, unit_id: i32, command_id: i32, options: i32, params: &[f32]) -> Result<(), i32> {
        let ret = unsafe {
            (self.table().unit_give_order)(
                self.ai_id,
                unit_id,
                command_id,
                options,
                params.as_ptr(),
                params.len() as c_int,
            )
        };
        if ret == 0 {
            Ok(())
        } else {
            Err(ret)
        }
    }

    /// Snap a requested build position to the nearest valid site.
    pub fn closest_build_site(&self, unit_def_id: i32, pos: [f32; 3], radius: f32) -> Option<[f32; 3]> {
        let mut out = [0.0f32; 3];
        let found = unsafe {
            (self.table().map_find_closest_build_site)(
                self.ai_id,
                unit_def_id,
                pos.as_ptr(),
                radius,
                0,
                out.as_mut_ptr(),
            )
        };
        (found == 0).then_some(out)
    }
}

/// Decode an event payload pointer. Null is legal for topics without data.
///
/// # Safety
/// `data` must point at the struct the engine documents for the topic.
pub unsafe fn payload<'a, T>(data: *const c_void) -> Option<&'a T> {
    (data as *const T).as_ref()
}
