// GameManager — Engine Start-Script Generation
//
// The engine consumes a sectioned text script describing the match. Local
// games use a fixed slot layout: one human-style slot hosting the Bridge AI
// on team 0, one AI slot for the configured opponent on team 1.

use crate::atoms::constants::{
    BRIDGE_AI_NAME, BRIDGE_AI_VERSION, BRIDGE_PLAYER_NAME,
};

#[derive(Debug, Clone)]
pub struct StartScript {
    pub map: String,
    pub game: String,
    pub engine_version: Option<String>,
    /// Skirmish AI short name of the opposing side.
    pub opponent: String,
}

impl StartScript {
    /// Render the full script text. Key order inside a section is stable so
    /// scripts diff cleanly between runs.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("[GAME]\n{\n");
        push_kv(&mut out, 1, "Mapname", &self.map);
        push_kv(&mut out, 1, "Gametype", &self.game);
        if let Some(version) = &self.engine_version {
            push_kv(&mut out, 1, "EngineVersion", version);
        }
        push_kv(&mut out, 1, "HostIP", "127.0.0.1");
        push_kv(&mut out, 1, "HostPort", "0");
        push_kv(&mut out, 1, "IsHost", "1");
        push_kv(&mut out, 1, "MyPlayerName", BRIDGE_PLAYER_NAME);
        push_kv(&mut out, 1, "NumPlayers", "1");
        push_kv(&mut out, 1, "NumTeams", "2");
        push_kv(&mut out, 1, "NumAllyTeams", "2");

        // Slot 0: the human-style slot the Bridge AI is attached to.
        out.push_str("\t[PLAYER0]\n\t{\n");
        push_kv(&mut out, 2, "Name", BRIDGE_PLAYER_NAME);
        push_kv(&mut out, 2, "Team", "0");
        push_kv(&mut out, 2, "Spectator", "0");
        out.push_str("\t}\n");

        out.push_str("\t[AI0]\n\t{\n");
        push_kv(&mut out, 2, "Name", BRIDGE_AI_NAME);
        push_kv(&mut out, 2, "ShortName", BRIDGE_AI_NAME);
        push_kv(&mut out, 2, "Version", BRIDGE_AI_VERSION);
        push_kv(&mut out, 2, "Host", "0");
        push_kv(&mut out, 2, "Team", "0");
        out.push_str("\t}\n");

        // Slot 1: the opponent AI.
        out.push_str("\t[AI1]\n\t{\n");
        push_kv(&mut out, 2, "Name", &self.opponent);
        push_kv(&mut out, 2, "ShortName", &self.opponent);
        push_kv(&mut out, 2, "Host", "0");
        push_kv(&mut out, 2, "Team", "1");
        out.push_str("\t}\n");

        for (team, leader, ally) in [("TEAM0", "0", "0"), ("TEAM1", "0", "1")] {
            out.push_str(&format!("\t[{team}]\n\t{{\n"));
            push_kv(&mut out, 2, "TeamLeader", leader);
            push_kv(&mut out, 2, "AllyTeam", ally);
            out.push_str("\t}\n");
        }
        for ally in ["ALLYTEAM0", "ALLYTEAM1"] {
            out.push_str(&format!("\t[{ally}]\n\t{{\n"));
            push_kv(&mut out, 2, "NumAllies", "0");
            out.push_str("\t}\n");
        }

        out.push_str("\t[MODOPTIONS]\n\t{\n\t}\n");
        out.push_str("}\n");
        out
    }
}

fn push_kv(out: &mut String, depth: usize, key: &str, value: &str) {
    for _ in 0..depth {
        out.push('\t');
    }
    out.push_str(key);
    out.push('=');
    out.push_str(value);
    out.push_str(";\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> StartScript {
        StartScript {
            map: "SimpleChess".into(),
            game: "Zero-K v1.12".into(),
            engine_version: None,
            opponent: "NullAI".into(),
        }
    }

    #[test]
    fn renders_fixed_slot_layout() {
        let text = script().render();
        assert!(text.contains("[PLAYER0]"));
        assert!(text.contains("[AI0]"));
        assert!(text.contains("[AI1]"));
        assert!(text.contains("ShortName=SkirmishBridge;"));
        assert!(text.contains("ShortName=NullAI;"));
        // Bridge on team 0, opponent on team 1.
        assert!(text.contains("[TEAM1]"));
    }

    #[test]
    fn renders_map_and_game() {
        let text = script().render();
        assert!(text.contains("Mapname=SimpleChess;"));
        assert!(text.contains("Gametype=Zero-K v1.12;"));
        assert!(!text.contains("EngineVersion"));
    }

    #[test]
    fn engine_version_is_optional() {
        let mut s = script();
        s.engine_version = Some("105.1.1".into());
        assert!(s.render().contains("EngineVersion=105.1.1;"));
    }

    #[test]
    fn braces_balance() {
        let text = script().render();
        let open = text.matches('{').count();
        let close = text.matches('}').count();
        assert_eq!(open, close);
    }
}
