use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_core::ConversationId;
use relay_core::TurnId;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::{EventKind, TurnCommitted};

const BROADCAST_CAPACITY: usize = 256;

/// Register/emit engine restricted to the two fixed speech-committed
/// event kinds and the at-most-one-per-`turn_id` guarantee, plus
/// per-`conversation_id` fan-out: one channel per conversation, created
/// lazily and reaped once the last receiver drops.
pub struct EventBridge {
    emitted: DashMap<(TurnId, EventKind), ()>,
    channels: DashMap<ConversationId, broadcast::Sender<TurnCommitted>>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self {
            emitted: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// `true` the first time this `(turn_id, kind)` pair is seen, `false`
    /// on every later call for the same pair.
    pub fn try_emit(&self, turn_id: TurnId, kind: EventKind) -> bool {
        match self.emitted.entry((turn_id, kind)) {
            Entry::Occupied(_) => {
                warn!(%turn_id, ?kind, "duplicate speech-committed event suppressed");
                false
            }
            Entry::Vacant(v) => {
                v.insert(());
                true
            }
        }
    }

    pub fn subscribe(&self, conversation_id: ConversationId) -> broadcast::Receiver<TurnCommitted> {
        self.channels
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .subscribe()
    }

    /// Publishes to the conversation's subscribers. No-op if nobody has
    /// ever subscribed; reaps the channel entry if the last subscriber
    /// has already dropped.
    pub fn publish_turn_committed(&self, event: TurnCommitted) {
        let conversation_id = event.conversation_id;
        let Some(sender) = self.channels.get(&conversation_id) else {
            debug!(%conversation_id, "turn_committed with no subscribers, dropped");
            return;
        };
        if sender.receiver_count() == 0 {
            drop(sender);
            self.channels.remove(&conversation_id);
            return;
        }
        let _ = sender.send(event);
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::TurnId;

    #[test]
    fn try_emit_allows_each_kind_once_per_turn() {
        let bridge = EventBridge::new();
        let turn_id = TurnId::new();
        assert!(bridge.try_emit(turn_id, EventKind::UserSpeechCommitted));
        assert!(!bridge.try_emit(turn_id, EventKind::UserSpeechCommitted));
        assert!(bridge.try_emit(turn_id, EventKind::AgentSpeechCommitted));
        assert!(!bridge.try_emit(turn_id, EventKind::AgentSpeechCommitted));
    }

    #[tokio::test]
    async fn subscriber_receives_published_turn_committed() {
        let bridge = EventBridge::new();
        let conversation_id = ConversationId::new();
        let mut rx = bridge.subscribe(conversation_id);

        let turn_id = TurnId::new();
        bridge.publish_turn_committed(TurnCommitted {
            conversation_id,
            turn_id,
            has_citations: true,
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.turn_id, turn_id);
        assert!(received.has_citations);
    }

    #[test]
    fn publish_with_no_subscribers_is_a_silent_noop() {
        let bridge = EventBridge::new();
        bridge.publish_turn_committed(TurnCommitted {
            conversation_id: ConversationId::new(),
            turn_id: TurnId::new(),
            has_citations: false,
        });
    }

    #[tokio::test]
    async fn channel_is_reaped_after_last_subscriber_drops() {
        let bridge = EventBridge::new();
        let conversation_id = ConversationId::new();
        let rx = bridge.subscribe(conversation_id);
        drop(rx);

        bridge.publish_turn_committed(TurnCommitted {
            conversation_id,
            turn_id: TurnId::new(),
            has_citations: false,
        });

        assert!(bridge.channels.get(&conversation_id).is_none());
    }
}
