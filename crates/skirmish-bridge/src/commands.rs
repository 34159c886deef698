// Inbound command taxonomy and its translation onto the engine callback
// vtable. Unknown types and invalid parameters never terminate the Bridge;
// they come back as `command_error` events.

use crate::ffi::{self, CallbackApi};
use serde::{Deserialize, Serialize};

/// Default search radius when snapping a build position to a valid site.
const BUILD_SNAP_RADIUS: f32 = 256.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InCommand {
    Move { unit_id: i32, x: f32, y: f32, z: f32, #[serde(default)] queue: bool },
    Stop { unit_id: i32 },
    Attack { unit_id: i32, target_id: i32, #[serde(default)] queue: bool },
    Build {
        unit_id: i32,
        #[serde(default)]
        def_name: Option<String>,
        #[serde(default)]
        def_id: Option<i32>,
        x: f32,
        y: f32,
        z: f32,
        #[serde(default)]
        queue: bool,
    },
    Patrol { unit_id: i32, x: f32, y: f32, z: f32, #[serde(default)] queue: bool },
    Fight { unit_id: i32, x: f32, y: f32, z: f32, #[serde(default)] queue: bool },
    Guard { unit_id: i32, target_id: i32, #[serde(default)] queue: bool },
    Repair { unit_id: i32, target_id: i32, #[serde(default)] queue: bool },
    SetFireState { unit_id: i32, state: i32 },
    SetMoveState { unit_id: i32, state: i32 },
    SendChat { text: String },
    Pause,
    Unpause,
    SetSpeed { speed: f32 },
}

/// Decode one IPC frame. The error string names what was wrong; the caller
/// pairs it with the raw frame in a `command_error` event.
pub fn decode(frame: &str) -> Result<InCommand, String> {
    serde_json::from_str(frame).map_err(|e| format!("invalid command: {e}"))
}

impl InCommand {
    /// `queue: true` appends to the unit's order queue instead of replacing.
    fn options(queue: bool) -> i32 {
        if queue {
            ffi::OPT_SHIFT_KEY
        } else {
            0
        }
    }

    /// The unit this command addresses, when it addresses one.
    pub fn unit_id(&self) -> Option<i32> {
        match self {
            InCommand::Move { unit_id, .. }
            | InCommand::Stop { unit_id }
            | InCommand::Attack { unit_id, .. }
            | InCommand::Build { unit_id, .. }
            | InCommand::Patrol { unit_id, .. }
            | InCommand::Fight { unit_id, .. }
            | InCommand::Guard { unit_id, .. }
            | InCommand::Repair { unit_id, .. }
            | InCommand::SetFireState { unit_id, .. }
            | InCommand::SetMoveState { unit_id, .. } => Some(*unit_id),
            InCommand::SendChat { .. }
            | InCommand::Pause
            | InCommand::Unpause
            | InCommand::SetSpeed { .. } => None,
        }
    }
}

/// Execute one command against the engine. Runs on the sim thread only.
pub fn execute(api: &CallbackApi, command: &InCommand) -> Result<(), String> {
    if let Some(unit_id) = command.unit_id() {
        if !api.unit_is_alive(unit_id) {
            return Err(format!("unknown unit {unit_id}"));
        }
        if api.unit_team(unit_id) != api.my_team() {
            return Err(format!("unit {unit_id} is not on our team"));
        }
    }

    match command {
        InCommand::Move { unit_id, x, y, z, queue } => give(
            api, *unit_id, ffi::CMD_MOVE, *queue, &[*x, *y, *z],
        ),
        InCommand::Stop { unit_id } => give(api, *unit_id, ffi::CMD_STOP, false, &[]),
        InCommand::Attack { unit_id, target_id, queue } => {
            if !api.unit_is_alive(*target_id) {
                return Err(format!("unknown target {target_id}"));
            }
            give(api, *unit_id, ffi::CMD_ATTACK, *queue, &[*target_id as f32])
        }
        InCommand::Build { unit_id, def_name, def_id, x, y, z, queue } => {
            let def = match (def_id, def_name) {
                (Some(id), _) => *id,
                (None, Some(name)) => api
                    .unit_def_by_name(name)
                    .ok_or_else(|| format!("unknown build def '{name}'"))?,
                (None, None) => return Err("build needs def_name or def_id".into()),
            };
            // Snap to the nearest valid build position; fall back to the
            // requested spot if the search comes up empty.
            let wanted = [*x, *y, *z];
            let site = api.closest_build_site(def, wanted, BUILD_SNAP_RADIUS).unwrap_or(wanted);
            give(api, *unit_id, -def, *queue, &site)
        }
        InCommand::Patrol { unit_id, x, y, z, queue } => {
            give(api, *unit_id, ffi::CMD_PATROL, *queue, &[*x, *y, *z])
        }
        InCommand::Fight { unit_id, x, y, z, queue } => {
            give(api, *unit_id, ffi::CMD_FIGHT, *queue, &[*x, *y, *z])
        }
        InCommand::Guard { unit_id, target_id, queue } => {
            if !api.unit_is_alive(*target_id) {
                return Err(format!("unknown target {target_id}"));
            }
            give(api, *unit_id, ffi::CMD_GUARD, *queue, &[*target_id as f32])
        }
        InCommand::Repair { unit_id, target_id, queue } => {
            if !api.unit_is_alive(*target_id) {
                return Err(format!("unknown target {target_id}"));
            }
            give(api, *unit_id, ffi::CMD_REPAIR, *queue, &[*target_id as f32])
        }
        InCommand::SetFireState { unit_id, state } => {
            if !(0..=2).contains(state) {
                return Err(format!("fire state must be 0..=2, got {state}"));
            }
            give(api, *unit_id, ffi::CMD_FIRE_STATE, false, &[*state as f32])
        }
        InCommand::SetMoveState { unit_id, state } => {
            if !(0..=2).contains(state) {
                return Err(format!("move state must be 0..=2, got {state}"));
            }
            give(api, *unit_id, ffi::CMD_MOVE_STATE, false, &[*state as f32])
        }
        InCommand::SendChat { text } => {
            api.send_text(text);
            Ok(())
        }
        InCommand::Pause => {
            api.set_pause(true);
            Ok(())
        }
        InCommand::Unpause => {
            api.set_pause(false);
            Ok(())
        }
        InCommand::SetSpeed { speed } => {
            if !speed.is_finite() || *speed <= 0.0 {
                return Err(format!("speed must be positive, got {speed}"));
            }
            api.set_speed(*speed);
            Ok(())
        }
    }
}

fn give(api: &CallbackApi, unit_id: i32, command_id: i32, queue: bool, params: &[f32]) -> Result<(), String> {
    api.give_order(unit_id, command_id, InCommand::options(queue), params)
        .map_err(|code| format!("engine refused command (code {code})"))
}
