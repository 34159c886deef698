// Outbound event taxonomy: everything the Bridge reports to the GameManager.
// One JSON object per event, tagged by `type`, always carrying the sim frame
// so the host can order events locally.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutEvent {
    Init { frame: i32, team: i32 },
    Update { frame: i32 },
    UnitCreated {
        frame: i32,
        unit_id: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        builder_id: Option<i32>,
        def_name: String,
    },
    UnitFinished { frame: i32, unit_id: i32, def_name: String },
    UnitIdle { frame: i32, unit_id: i32 },
    UnitDamaged {
        frame: i32,
        unit_id: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        attacker_id: Option<i32>,
        damage: f32,
        paralyzer: bool,
    },
    UnitDestroyed {
        frame: i32,
        unit_id: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        attacker_id: Option<i32>,
    },
    EnemyEnterLos { frame: i32, unit_id: i32 },
    EnemyLeaveLos { frame: i32, unit_id: i32 },
    EnemyEnterRadar { frame: i32, unit_id: i32 },
    EnemyLeaveRadar { frame: i32, unit_id: i32 },
    EnemyDestroyed {
        frame: i32,
        unit_id: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        attacker_id: Option<i32>,
    },
    CommandFinished { frame: i32, unit_id: i32, command_id: i32 },
    /// A refused command: names the offending command and a human-readable
    /// reason. Also used for queue backpressure.
    CommandError { frame: i32, error: String, command: Value },
    Message { frame: i32, player: i32, text: String },
    Release { frame: i32, reason: i32 },
}

impl OutEvent {
    /// Updates coalesce in the outbound queue; only the newest matters.
    pub fn is_update(&self) -> bool {
        matches!(self, OutEvent::Update { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_snake_case() {
        let json = serde_json::to_string(&OutEvent::EnemyEnterLos { frame: 30, unit_id: 7 })
            .unwrap();
        assert!(json.contains("\"type\":\"enemy_enter_los\""));
        assert!(json.contains("\"frame\":30"));
    }

    #[test]
    fn command_error_carries_offending_command() {
        let event = OutEvent::CommandError {
            frame: 90,
            error: "unknown unit 999999".into(),
            command: serde_json::json!({"type": "move", "unit_id": 999999}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"command_error\""));
        assert!(json.contains("999999"));
    }

    #[test]
    fn absent_attacker_is_omitted() {
        let json = serde_json::to_string(&OutEvent::UnitDestroyed {
            frame: 10,
            unit_id: 4,
            attacker_id: None,
        })
        .unwrap();
        assert!(!json.contains("attacker_id"));
    }
}
