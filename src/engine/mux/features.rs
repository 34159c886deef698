// GameManager — Feature-Set Negotiation
//
// Feature sets are named capability bundles negotiated at `initialize`.
// Tools and push events scoped to sets the client did not acknowledge are
// suppressed for the whole session.

use super::protocol::FeatureSetDecl;
use std::collections::HashSet;

pub const LOBBY_CHAT: &str = "lobby.chat";
pub const GAME_STATE: &str = "game.state";
pub const GAME_COMMANDS: &str = "game.commands";

/// Everything this server declares, in advertisement order.
pub fn declared() -> Vec<FeatureSetDecl> {
    vec![
        FeatureSetDecl {
            name: LOBBY_CHAT.into(),
            tools: true,
            push_events: true,
            channels: true,
            rollback: false,
        },
        FeatureSetDecl {
            name: GAME_STATE.into(),
            tools: true,
            push_events: true,
            channels: true,
            rollback: true,
        },
        FeatureSetDecl {
            name: GAME_COMMANDS.into(),
            tools: true,
            push_events: false,
            channels: true,
            rollback: false,
        },
    ]
}

/// The per-session outcome of negotiation.
#[derive(Debug, Clone)]
pub struct Negotiated {
    enabled: HashSet<String>,
    /// Whether the client acknowledged any channel-capable set. A legacy
    /// client that never sent `featureSets` is served by tools alone.
    channels_enabled: bool,
}

impl Negotiated {
    /// Intersect the client's acknowledged names with the declared sets.
    /// `None` (field absent) is the legacy client: every set's tools are
    /// available, but channels and push events stay off.
    pub fn negotiate(acknowledged: Option<&[String]>) -> Self {
        let declared = declared();
        match acknowledged {
            None => Negotiated {
                enabled: declared.iter().map(|d| d.name.clone()).collect(),
                channels_enabled: false,
            },
            Some(names) => {
                let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
                let enabled: HashSet<String> = declared
                    .iter()
                    .filter(|d| wanted.contains(d.name.as_str()))
                    .map(|d| d.name.clone())
                    .collect();
                let channels_enabled = declared
                    .iter()
                    .any(|d| d.channels && enabled.contains(&d.name));
                Negotiated { enabled, channels_enabled }
            }
        }
    }

    pub fn is_enabled(&self, feature_set: &str) -> bool {
        self.enabled.contains(feature_set)
    }

    pub fn channels_enabled(&self) -> bool {
        self.channels_enabled
    }

    pub fn rollback_enabled(&self, feature_set: &str) -> bool {
        self.is_enabled(feature_set)
            && declared()
                .iter()
                .any(|d| d.name == feature_set && d.rollback)
    }

    pub fn enabled_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.enabled.iter().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_client_gets_tools_but_no_channels() {
        let n = Negotiated::negotiate(None);
        assert!(n.is_enabled(LOBBY_CHAT));
        assert!(n.is_enabled(GAME_STATE));
        assert!(!n.channels_enabled());
    }

    #[test]
    fn acknowledged_subset_enables_channels() {
        let acked = vec![GAME_STATE.to_string()];
        let n = Negotiated::negotiate(Some(&acked));
        assert!(n.is_enabled(GAME_STATE));
        assert!(!n.is_enabled(LOBBY_CHAT));
        assert!(n.channels_enabled());
    }

    #[test]
    fn unknown_names_are_ignored() {
        let acked = vec!["game.telepathy".to_string()];
        let n = Negotiated::negotiate(Some(&acked));
        assert!(n.enabled_names().is_empty());
        assert!(!n.channels_enabled());
    }

    #[test]
    fn rollback_only_on_rollback_sets() {
        let acked = vec![GAME_STATE.to_string(), LOBBY_CHAT.to_string()];
        let n = Negotiated::negotiate(Some(&acked));
        assert!(n.rollback_enabled(GAME_STATE));
        assert!(!n.rollback_enabled(LOBBY_CHAT));
    }
}
