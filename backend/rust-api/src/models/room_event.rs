use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

/// Envelope delivered by the message bus. `type` selects the payload schema.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct InboundEvent {
    #[validate(length(min = 1, max = 64, message = "roomId must be 1-64 characters"))]
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[validate(length(min = 1, max = 32, message = "mode must be 1-32 characters"))]
    pub mode: String,
    #[serde(flatten)]
    pub event: RoomEvent,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RoomEvent {
    Vote(VotePayload),
    State(StatePayload),
}

impl RoomEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RoomEvent::Vote(_) => "vote",
            RoomEvent::State(_) => "state",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct VotePayload {
    #[validate(length(min = 1, max = 128))]
    pub voter_id: String,
    /// What is being voted on, e.g. "next-question" or "kick:<user>"
    #[validate(length(min = 1, max = 64))]
    pub topic: String,
    #[validate(length(min = 1, max = 64))]
    pub choice: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StatePayload {
    pub to: GameState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameState {
    #[default]
    Waiting,
    Starting,
    InProgress,
    Paused,
    Finished,
}

impl GameState {
    pub fn can_transition_to(self, next: GameState) -> bool {
        use GameState::{Finished, InProgress, Paused, Starting, Waiting};
        matches!(
            (self, next),
            (Waiting, Starting)
                | (Starting, InProgress)
                | (Starting, Waiting)
                | (InProgress, Paused)
                | (InProgress, Finished)
                | (Paused, InProgress)
                | (Paused, Finished)
        )
    }
}

/// Result of applying one event to a room.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventOutcome {
    pub room_id: String,
    /// False when the event was a redelivery that had already been applied.
    pub applied: bool,
    pub snapshot: RoomSnapshot,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub mode: Option<String>,
    pub state: GameState,
    /// topic -> choice -> votes
    pub tallies: BTreeMap<String, BTreeMap<String, u32>>,
    pub events_applied: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vote_envelope_parses_into_tagged_variant() {
        let raw = json!({
            "roomId": "room-1",
            "mode": "classic",
            "type": "vote",
            "payload": { "voter_id": "u1", "topic": "next-question", "choice": "yes" }
        });
        let event: InboundEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.room_id, "room-1");
        assert!(matches!(event.event, RoomEvent::Vote(ref v) if v.choice == "yes"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = json!({
            "roomId": "room-1",
            "mode": "classic",
            "type": "chat",
            "payload": { "text": "hi" }
        });
        assert!(serde_json::from_value::<InboundEvent>(raw).is_err());
    }

    #[test]
    fn extra_payload_fields_are_rejected() {
        let raw = json!({
            "roomId": "room-1",
            "mode": "classic",
            "type": "vote",
            "payload": { "voter_id": "u1", "topic": "t", "choice": "c", "blob": [1, 2, 3] }
        });
        assert!(serde_json::from_value::<InboundEvent>(raw).is_err());
    }

    #[test]
    fn finished_is_terminal() {
        for next in [
            GameState::Waiting,
            GameState::Starting,
            GameState::InProgress,
            GameState::Paused,
        ] {
            assert!(!GameState::Finished.can_transition_to(next));
        }
        assert!(GameState::Paused.can_transition_to(GameState::InProgress));
        assert!(!GameState::Waiting.can_transition_to(GameState::InProgress));
    }
}
