//! Persistence collaborator for sessions and their exchanges.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::model::{ChatCompletion, FINISH_REASON_STOP, Message};

pub type SessionId = uuid::Uuid;
pub type ExchangeId = uuid::Uuid;

/// One question and its (possibly pending) answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub id: ExchangeId,
    pub session_id: SessionId,
    pub input: String,
    pub created_at: DateTime<Utc>,
    /// Unset while the model is still answering.
    pub result: Option<ChatCompletion>,
    /// False when the stream ended before the terminal chunk.
    pub complete: bool,
}

impl ExchangeRecord {
    /// Usable as conversation history: one answer that finished with `stop`.
    pub fn valid_for_history(&self) -> bool {
        self.result
            .as_ref()
            .and_then(ChatCompletion::answer)
            .is_some_and(|answer| answer.finish_reason == FINISH_REASON_STOP)
    }

    /// The user message followed by the assistant answer.
    pub fn history_records(&self) -> Vec<Message> {
        let mut records = vec![Message::user(self.input.clone())];
        if let Some(answer) = self.result.as_ref().and_then(ChatCompletion::answer) {
            records.push(answer.message.history_record());
        }
        records
    }
}

/// Upstream messages replaying the valid exchanges of a session, in order.
pub fn history(exchanges: &[ExchangeRecord]) -> Vec<Message> {
    exchanges
        .iter()
        .filter(|exchange| exchange.valid_for_history())
        .flat_map(ExchangeRecord::history_records)
        .collect()
}

/// Storage contract consumed by the relay.
///
/// The placeholder is written before the upstream call so the exchange has a
/// stable position in its session even if the model never answers.
#[async_trait::async_trait]
pub trait ExchangeStore: Send + Sync {
    /// All exchanges of a session, oldest first.
    async fn find_exchanges(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<ExchangeRecord>, StoreError>;

    async fn create_placeholder(
        &self,
        session_id: SessionId,
        input: &str,
    ) -> Result<ExchangeId, StoreError>;

    async fn find_last_by_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<ExchangeRecord>, StoreError>;

    /// Records the aggregated result of an exchange.
    async fn finalize(
        &self,
        exchange_id: ExchangeId,
        result: ChatCompletion,
        complete: bool,
    ) -> Result<(), StoreError>;
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryExchangeStore {
    sessions: DashMap<SessionId, String>,
    exchanges: DashMap<ExchangeId, (u64, ExchangeRecord)>,
    seq: AtomicU64,
}

impl InMemoryExchangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session; exchanges can only be created inside one.
    pub fn create_session(&self, name: impl Into<String>) -> SessionId {
        let id = uuid::Uuid::new_v4();
        self.sessions.insert(id, name.into());
        id
    }

    /// Snapshot of one exchange.
    pub fn get(&self, exchange_id: ExchangeId) -> Option<ExchangeRecord> {
        self.exchanges
            .get(&exchange_id)
            .map(|entry| entry.value().1.clone())
    }

    fn ensure_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        if self.sessions.contains_key(&session_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })
        }
    }

    fn ordered(&self, session_id: SessionId) -> Vec<(u64, ExchangeRecord)> {
        let mut records: Vec<_> = self
            .exchanges
            .iter()
            .filter(|entry| entry.value().1.session_id == session_id)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        records
    }
}

#[async_trait::async_trait]
impl ExchangeStore for InMemoryExchangeStore {
    async fn find_exchanges(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<ExchangeRecord>, StoreError> {
        self.ensure_session(session_id)?;
        Ok(self
            .ordered(session_id)
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    async fn create_placeholder(
        &self,
        session_id: SessionId,
        input: &str,
    ) -> Result<ExchangeId, StoreError> {
        self.ensure_session(session_id)?;
        let id = uuid::Uuid::new_v4();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.exchanges.insert(
            id,
            (
                seq,
                ExchangeRecord {
                    id,
                    session_id,
                    input: input.to_string(),
                    created_at: Utc::now(),
                    result: None,
                    complete: false,
                },
            ),
        );
        Ok(id)
    }

    async fn find_last_by_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<ExchangeRecord>, StoreError> {
        self.ensure_session(session_id)?;
        Ok(self
            .ordered(session_id)
            .pop()
            .map(|(_, record)| record))
    }

    async fn finalize(
        &self,
        exchange_id: ExchangeId,
        result: ChatCompletion,
        complete: bool,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .exchanges
            .get_mut(&exchange_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "exchange",
                id: exchange_id.to_string(),
            })?;
        let record = &mut entry.value_mut().1;
        record.result = Some(result);
        record.complete = complete;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Choice;

    fn answered(content: &str, finish_reason: &str) -> ChatCompletion {
        ChatCompletion {
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: "assistant".into(),
                    content: content.into(),
                    reasoning_content: "hidden".into(),
                },
                finish_reason: finish_reason.into(),
            }],
            ..ChatCompletion::default()
        }
    }

    #[tokio::test]
    async fn placeholder_is_discoverable_before_finalize() {
        let store = InMemoryExchangeStore::new();
        let session = store.create_session("s");
        let first = store.create_placeholder(session, "one").await.expect("create");
        let second = store.create_placeholder(session, "two").await.expect("create");

        let last = store
            .find_last_by_session(session)
            .await
            .expect("find")
            .expect("some");
        assert_eq!(last.id, second);
        assert!(last.result.is_none());

        store
            .finalize(first, answered("a", "stop"), true)
            .await
            .expect("finalize");
        let all = store.find_exchanges(session).await.expect("all");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first);
        assert!(all[0].complete);
        assert!(all[0].result.is_some());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = InMemoryExchangeStore::new();
        let missing = uuid::Uuid::new_v4();
        assert!(matches!(
            store.create_placeholder(missing, "x").await,
            Err(StoreError::NotFound { entity: "session", .. })
        ));
        assert!(matches!(
            store.finalize(missing, ChatCompletion::default(), true).await,
            Err(StoreError::NotFound { entity: "exchange", .. })
        ));
    }

    #[test]
    fn history_keeps_only_stopped_answers() {
        let session = uuid::Uuid::new_v4();
        let record = |input: &str, result: Option<ChatCompletion>| ExchangeRecord {
            id: uuid::Uuid::new_v4(),
            session_id: session,
            input: input.into(),
            created_at: Utc::now(),
            result,
            complete: true,
        };
        let exchanges = vec![
            record("q1", Some(answered("a1", "stop"))),
            record("q2", None),
            record("q3", Some(answered("a3", "length"))),
            record("q4", Some(answered("a4", "stop"))),
        ];
        let messages = history(&exchanges);
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q4", "a4"]);
        assert!(messages.iter().all(|m| m.reasoning_content.is_empty()));
    }
}
