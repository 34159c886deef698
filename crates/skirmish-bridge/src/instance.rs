// Sim-thread side of the Bridge: one AiInstance per skirmish AI id.
//
// The engine ABI is single-threaded — every call into `handle_event` happens
// on the sim thread at frame rate. Each frame the instance drains the
// bounded command queue, executes against the callback vtable, and emits
// events onto the outbound queue for the IPC thread to ship.

use crate::commands::{self, InCommand};
use crate::error::{BridgeError, BridgeResult};
use crate::events::OutEvent;
use crate::ffi::{self, CallbackApi, SSkirmishAICallback};
use crate::ipc::IpcLink;
use crate::queues::{command_queue, EventQueue};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::ffi::{c_int, c_void, CStr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Environment the supervisor sets on the engine process; the Bridge reads
/// it from inside the same process.
pub const ENV_IPC_SOCKET: &str = "GM_IPC_SOCKET";
pub const ENV_HANDSHAKE_TOKEN: &str = "GM_HANDSHAKE_TOKEN";

/// One `update` event per this many sim frames (one second of game time at
/// normal speed).
pub const UPDATE_THROTTLE_FRAMES: i32 = 30;

pub struct AiInstance {
    api: CallbackApi,
    events: Arc<EventQueue>,
    commands_rx: Receiver<InCommand>,
    ipc: Option<IpcLink>,
    frame: Arc<AtomicI32>,
    last_update_frame: Option<i32>,
    /// unit id → frame its last idle was forwarded. Idle spam from stuck
    /// units is collapsed to once per update interval.
    idle_forwarded: HashMap<i32, i32>,
}

impl AiInstance {
    /// Wire up queues and the IPC connection for a freshly loaded AI.
    ///
    /// # Safety
    /// `callback` must be the vtable pointer the engine passed to `init`.
    pub unsafe fn start(
        ai_id: c_int,
        callback: *const SSkirmishAICallback,
    ) -> BridgeResult<Self> {
        let api = CallbackApi::new(ai_id, callback)?;
        let socket_path = PathBuf::from(
            std::env::var(ENV_IPC_SOCKET)
                .map_err(|_| BridgeError::Environment(ENV_IPC_SOCKET.into()))?,
        );
        let token = std::env::var(ENV_HANDSHAKE_TOKEN)
            .map_err(|_| BridgeError::Environment(ENV_HANDSHAKE_TOKEN.into()))?;

        let events = Arc::new(EventQueue::new());
        let (commands_tx, commands_rx) = command_queue();
        let frame = Arc::new(AtomicI32::new(0));
        let ipc = IpcLink::connect(&socket_path, &token, events.clone(), commands_tx, frame.clone())?;
        info!("[bridge] instance {ai_id} connected to {}", socket_path.display());

        Ok(AiInstance {
            api,
            events,
            commands_rx,
            ipc: Some(ipc),
            frame,
            last_update_frame: None,
            idle_forwarded: HashMap::new(),
        })
    }

    /// Test constructor: no environment, no socket, caller feeds the queues.
    #[cfg(test)]
    pub(crate) fn for_test(
        api: CallbackApi,
        events: Arc<EventQueue>,
        commands_rx: Receiver<InCommand>,
    ) -> Self {
        AiInstance {
            api,
            events,
            commands_rx,
            ipc: None,
            frame: Arc::new(AtomicI32::new(0)),
            last_update_frame: None,
            idle_forwarded: HashMap::new(),
        }
    }

    /// The ABI dispatcher. Returns 0 on success; unknown topics are ignored
    /// rather than errored, matching what the engine expects of AIs.
    ///
    /// # Safety
    /// `data` must point at the payload struct the engine documents for
    /// `topic` (or null for payload-less topics).
    pub unsafe fn handle_event(&mut self, topic: c_int, data: *const c_void) -> c_int {
        let frame = self.frame.load(Ordering::Relaxed);
        match topic {
            ffi::EVENT_INIT => {
                self.events.push(OutEvent::Init { frame: 0, team: self.api.my_team() });
            }
            ffi::EVENT_UPDATE => {
                if let Some(update) = ffi::payload::<ffi::SUpdateEvent>(data) {
                    self.on_update(update.frame);
                }
            }
            ffi::EVENT_MESSAGE => {
                if let Some(message) = ffi::payload::<ffi::SMessageEvent>(data) {
                    let text = if message.message.is_null() {
                        String::new()
                    } else {
                        CStr::from_ptr(message.message).to_string_lossy().into_owned()
                    };
                    self.events.push(OutEvent::Message { frame, player: message.player, text });
                }
            }
            ffi::EVENT_UNIT_CREATED => {
                if let Some(event) = ffi::payload::<ffi::SUnitCreatedEvent>(data) {
                    self.events.push(OutEvent::UnitCreated {
                        frame,
                        unit_id: event.unit,
                        builder_id: (event.builder >= 0).then_some(event.builder),
                        def_name: self.api.unit_def_name(self.api.unit_def(event.unit)),
                    });
                }
            }
            ffi::EVENT_UNIT_FINISHED => {
                if let Some(event) = ffi::payload::<ffi::SUnitFinishedEvent>(data) {
                    self.events.push(OutEvent::UnitFinished {
                        frame,
                        unit_id: event.unit,
                        def_name: self.api.unit_def_name(self.api.unit_def(event.unit)),
                    });
                }
            }
            ffi::EVENT_UNIT_IDLE => {
                if let Some(event) = ffi::payload::<ffi::SUnitIdleEvent>(data) {
                    self.on_unit_idle(frame, event.unit);
                }
            }
            ffi::EVENT_UNIT_DAMAGED => {
                if let Some(event) = ffi::payload::<ffi::SUnitDamagedEvent>(data) {
                    self.events.push(OutEvent::UnitDamaged {
                        frame,
                        unit_id: event.unit,
                        attacker_id: (event.attacker >= 0).then_some(event.attacker),
                        damage: event.damage,
                        paralyzer: event.paralyzer,
                    });
                }
            }
            ffi::EVENT_UNIT_DESTROYED => {
                if let Some(event) = ffi::payload::<ffi::SUnitDestroyedEvent>(data) {
                    self.idle_forwarded.remove(&event.unit);
                    self.events.push(OutEvent::UnitDestroyed {
                        frame,
                        unit_id: event.unit,
                        attacker_id: (event.attacker >= 0).then_some(event.attacker),
                    });
                }
            }
            ffi::EVENT_ENEMY_ENTER_LOS => {
                if let Some(event) = ffi::payload::<ffi::SEnemyEvent>(data) {
                    self.events.push(OutEvent::EnemyEnterLos { frame, unit_id: event.enemy });
                }
            }
            ffi::EVENT_ENEMY_LEAVE_LOS => {
                if let Some(event) = ffi::payload::<ffi::SEnemyEvent>(data) {
                    self.events.push(OutEvent::EnemyLeaveLos { frame, unit_id: event.enemy });
                }
            }
            ffi::EVENT_ENEMY_ENTER_RADAR => {
                if let Some(event) = ffi::payload::<ffi::SEnemyEvent>(data) {
                    self.events.push(OutEvent::EnemyEnterRadar { frame, unit_id: event.enemy });
                }
            }
            ffi::EVENT_ENEMY_LEAVE_RADAR => {
                if let Some(event) = ffi::payload::<ffi::SEnemyEvent>(data) {
                    self.events.push(OutEvent::EnemyLeaveRadar { frame, unit_id: event.enemy });
                }
            }
            ffi::EVENT_ENEMY_DESTROYED => {
                if let Some(event) = ffi::payload::<ffi::SEnemyDestroyedEvent>(data) {
                    self.events.push(OutEvent::EnemyDestroyed {
                        frame,
                        unit_id: event.enemy,
                        attacker_id: (event.attacker >= 0).then_some(event.attacker),
                    });
                }
            }
            ffi::EVENT_COMMAND_FINISHED => {
                if let Some(event) = ffi::payload::<ffi::SCommandFinishedEvent>(data) {
                    self.events.push(OutEvent::CommandFinished {
                        frame,
                        unit_id: event.unit_id,
                        command_id: event.command_id,
                    });
                }
            }
            ffi::EVENT_RELEASE => {
                let reason = ffi::payload::<ffi::SReleaseEvent>(data)
                    .map(|r| r.reason)
                    .unwrap_or(0);
                self.on_release(frame, reason);
            }
            other => {
                debug!("[bridge] ignoring event topic {other}");
            }
        }
        0
    }

    /// Per-frame work: drain and execute queued commands, then emit the
    /// throttled `update`.
    fn on_update(&mut self, frame: i32) {
        self.frame.store(frame, Ordering::Relaxed);
        while let Ok(command) = self.commands_rx.try_recv() {
            if let Err(error) = commands::execute(&self.api, &command) {
                warn!("[bridge] command refused: {error}");
                self.events.push(OutEvent::CommandError {
                    frame,
                    error,
                    command: serde_json::to_value(&command).unwrap_or_default(),
                });
            }
        }
        let due = match self.last_update_frame {
            None => true,
            Some(last) => frame - last >= UPDATE_THROTTLE_FRAMES,
        };
        if due {
            self.last_update_frame = Some(frame);
            self.events.push(OutEvent::Update { frame });
        }
    }

    /// Significance filter: a unit's idle is forwarded at most once per
    /// update interval.
    fn on_unit_idle(&mut self, frame: i32, unit_id: i32) {
        match self.idle_forwarded.get(&unit_id) {
            Some(last) if frame - last < UPDATE_THROTTLE_FRAMES => {}
            _ => {
                self.idle_forwarded.insert(unit_id, frame);
                self.events.push(OutEvent::UnitIdle { frame, unit_id });
            }
        }
    }

    /// Flush pending events, send the final `release` frame, close the
    /// socket, let the IPC thread exit.
    fn on_release(&mut self, frame: i32, reason: i32) {
        info!("[bridge] release (reason {reason})");
        self.events.push(OutEvent::Release { frame, reason });
        if let Some(mut ipc) = self.ipc.take() {
            ipc.shutdown();
        }
    }
}

impl Drop for AiInstance {
    fn drop(&mut self) {
        // `release()` without a prior EVENT_RELEASE still flushes cleanly.
        if let Some(mut ipc) = self.ipc.take() {
            ipc.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queues::command_queue;
    use std::ffi::c_char;
    use std::sync::mpsc::SyncSender;

    // A callback table whose units 1..=10 are alive on team 0.
    unsafe extern "C" fn frame0(_: c_int) -> c_int { 0 }
    unsafe extern "C" fn team0(_: c_int) -> c_int { 0 }
    unsafe extern "C" fn set_pause(_: c_int, _: c_int) -> c_int { 0 }
    unsafe extern "C" fn set_speed(_: c_int, _: f32) -> c_int { 0 }
    unsafe extern "C" fn send_text(_: c_int, _: *const c_char, _: c_int) -> c_int { 0 }
    unsafe extern "C" fn is_alive(_: c_int, unit: c_int) -> c_int {
        (unit >= 1 && unit <= 10) as c_int
    }
    unsafe extern "C" fn unit_team(_: c_int, _: c_int) -> c_int { 0 }
    unsafe extern "C" fn unit_def(_: c_int, _: c_int) -> c_int { 42 }
    unsafe extern "C" fn unit_pos(_: c_int, _: c_int, out: *mut f32) -> c_int {
        std::slice::from_raw_parts_mut(out, 3).fill(0.0);
        0
    }
    unsafe extern "C" fn give_order(
        _: c_int, _: c_int, _: c_int, _: c_int, _: *const f32, _: c_int,
    ) -> c_int { 0 }
    unsafe extern "C" fn def_by_name(_: c_int, _: *const c_char) -> c_int { -1 }
    unsafe extern "C" fn def_name(_: c_int, _: c_int, out: *mut c_char, len: c_int) -> c_int {
        let name = b"testunit\0";
        let n = name.len().min(len as usize);
        std::ptr::copy_nonoverlapping(name.as_ptr() as *const c_char, out, n);
        n as c_int - 1
    }
    unsafe extern "C" fn build_site(
        _: c_int, _: c_int, _: *const f32, _: f32, _: c_int, out: *mut f32,
    ) -> c_int {
        std::slice::from_raw_parts_mut(out, 3).fill(0.0);
        0
    }

    fn fake_table() -> SSkirmishAICallback {
        SSkirmishAICallback {
            game_get_current_frame: frame0,
            game_get_my_team: team0,
            game_set_pause: set_pause,
            game_set_speed_factor: set_speed,
            game_send_text_message: send_text,
            unit_is_alive: is_alive,
            unit_get_team: unit_team,
            unit_get_def: unit_def,
            unit_get_pos: unit_pos,
            unit_give_order: give_order,
            unit_def_by_name: def_by_name,
            unit_def_get_name: def_name,
            map_find_closest_build_site: build_site,
        }
    }

    fn instance(table: &SSkirmishAICallback) -> (AiInstance, SyncSender<InCommand>, Arc<EventQueue>) {
        let api = unsafe { CallbackApi::new(7, table).unwrap() };
        let events = Arc::new(EventQueue::new());
        let (tx, rx) = command_queue();
        (AiInstance::for_test(api, events.clone(), rx), tx, events)
    }

    fn update(inst: &mut AiInstance, frame: i32) {
        let event = ffi::SUpdateEvent { frame };
        unsafe {
            inst.handle_event(ffi::EVENT_UPDATE, &event as *const _ as *const c_void);
        }
    }

    #[test]
    fn init_event_reports_team() {
        let table = fake_table();
        let (mut inst, _tx, events) = instance(&table);
        unsafe { inst.handle_event(ffi::EVENT_INIT, std::ptr::null()) };
        assert_eq!(events.drain(), vec![OutEvent::Init { frame: 0, team: 0 }]);
    }

    #[test]
    fn updates_are_throttled_to_the_frame_interval() {
        let table = fake_table();
        let (mut inst, _tx, events) = instance(&table);
        for frame in 0..90 {
            update(&mut inst, frame);
        }
        let updates: Vec<i32> = events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                OutEvent::Update { frame } => Some(frame),
                _ => None,
            })
            .collect();
        // Frames 0, 30, 60 — monotone, one per interval.
        assert_eq!(updates, vec![0, 30, 60]);
    }

    #[test]
    fn commands_execute_on_the_next_update() {
        let table = fake_table();
        let (mut inst, tx, events) = instance(&table);
        tx.send(InCommand::Move { unit_id: 3, x: 1.0, y: 0.0, z: 2.0, queue: false }).unwrap();
        update(&mut inst, 0);
        // Accepted command produces no error event, only the update tick.
        assert_eq!(events.drain(), vec![OutEvent::Update { frame: 0 }]);
    }

    #[test]
    fn unknown_unit_yields_command_error_within_one_update() {
        let table = fake_table();
        let (mut inst, tx, events) = instance(&table);
        tx.send(InCommand::Move { unit_id: 999_999, x: 0.0, y: 0.0, z: 0.0, queue: false })
            .unwrap();
        update(&mut inst, 0);
        let drained = events.drain();
        match &drained[0] {
            OutEvent::CommandError { error, command, .. } => {
                assert!(error.contains("unknown unit"));
                assert_eq!(command["unit_id"], 999_999);
            }
            other => panic!("expected command_error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_build_def_yields_command_error() {
        let table = fake_table();
        let (mut inst, tx, events) = instance(&table);
        tx.send(InCommand::Build {
            unit_id: 3,
            def_name: Some("castle".into()),
            def_id: None,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            queue: false,
        })
        .unwrap();
        update(&mut inst, 0);
        let drained = events.drain();
        match &drained[0] {
            OutEvent::CommandError { error, .. } => {
                assert!(error.contains("unknown build def"));
            }
            other => panic!("expected command_error, got {other:?}"),
        }
    }

    #[test]
    fn idle_spam_is_collapsed_per_interval() {
        let table = fake_table();
        let (mut inst, _tx, events) = instance(&table);
        let idle = ffi::SUnitIdleEvent { unit: 4 };
        for _ in 0..5 {
            unsafe {
                inst.handle_event(ffi::EVENT_UNIT_IDLE, &idle as *const _ as *const c_void);
            }
        }
        let idles = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, OutEvent::UnitIdle { .. }))
            .count();
        assert_eq!(idles, 1);
    }

    #[test]
    fn unit_created_resolves_def_name() {
        let table = fake_table();
        let (mut inst, _tx, events) = instance(&table);
        let created = ffi::SUnitCreatedEvent { unit: 2, builder: -1 };
        unsafe {
            inst.handle_event(ffi::EVENT_UNIT_CREATED, &created as *const _ as *const c_void);
        }
        match &events.drain()[0] {
            OutEvent::UnitCreated { def_name, builder_id, .. } => {
                assert_eq!(def_name, "testunit");
                assert!(builder_id.is_none());
            }
            other => panic!("expected unit_created, got {other:?}"),
        }
    }

    #[test]
    fn release_emits_final_event() {
        let table = fake_table();
        let (mut inst, _tx, events) = instance(&table);
        let release = ffi::SReleaseEvent { reason: 0 };
        unsafe {
            inst.handle_event(ffi::EVENT_RELEASE, &release as *const _ as *const c_void);
        }
        assert_eq!(events.drain(), vec![OutEvent::Release { frame: 0, reason: 0 }]);
    }
}
