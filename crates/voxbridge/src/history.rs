//! In-memory conversation history.

use tokio::sync::RwLock;

use voxbridge_protocol::turns::Turn;

/// Append-only log of turns for the current session.
///
/// Memory-only by design: a server restart loses the conversation, and
/// there is no eviction or size cap -- session lifetime bounds growth. The
/// lock serializes appends against snapshots so a reader never observes a
/// partially appended turn.
#[derive(Default)]
pub struct HistoryStore {
    turns: RwLock<Vec<Turn>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, turn: Turn) {
        self.turns.write().await.push(turn);
    }

    /// Full ordered copy, oldest first.
    pub async fn snapshot(&self) -> Vec<Turn> {
        self.turns.read().await.clone()
    }

    pub async fn clear(&self) {
        self.turns.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.turns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.turns.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use voxbridge_protocol::turns::{Role, TurnMetadata};

    use super::*;

    #[tokio::test]
    async fn test_append_preserves_order() {
        let history = HistoryStore::new();
        history.append(Turn::user("A", 1)).await;
        history
            .append(Turn::assistant("reply to A", "done", TurnMetadata::default(), 2))
            .await;
        history.append(Turn::user("B", 3)).await;

        let turns = history.snapshot().await;
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, "A");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[2].content, "B");
    }

    #[tokio::test]
    async fn test_clear_empties_the_log() {
        let history = HistoryStore::new();
        history.append(Turn::user("A", 1)).await;
        assert!(!history.is_empty().await);
        history.clear().await;
        assert!(history.is_empty().await);
        assert_eq!(history.len().await, 0);
    }
}
