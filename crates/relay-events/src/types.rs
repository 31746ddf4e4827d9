use relay_core::{ConversationId, TurnId};
use serde::{Deserialize, Serialize};

/// The two fixed §4.8 event kinds emitted by a worker during a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UserSpeechCommitted,
    AgentSpeechCommitted,
}

/// Published on a conversation's realtime channel once the Turn Store has
/// durably committed both rows for `turn_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnCommitted {
    pub conversation_id: ConversationId,
    pub turn_id: TurnId,
    pub has_citations: bool,
}
