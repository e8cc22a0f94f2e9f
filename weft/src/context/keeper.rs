//! Context keepers: long-lived holders of offloaded conversation chunks.
//!
//! Each keeper is an actor owning its message block. Persistence is debounced
//! through a single pending-timer slot: re-entrant `store` calls never multiply
//! timers, and the scheduled persist always writes the latest state. Retrieval
//! is keyword-scored raw messages or one LLM call constrained to the stored
//! context, with keyword fallback.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::retrieval::{keyword_select, render_lines};
use crate::bus::Bus;
use crate::event::{topic, Event};
use crate::limits::CostTracker;
use crate::llm::LlmClient;
use crate::message::{estimate_message_tokens, Message};
use crate::registry::{Registry, RegistryEntry, RegistryKey, WorkerKind};
use crate::store::keepers::KeeperSnapshot;
use crate::store::{Store, StoreError};

/// Persist debounce interval.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(50);

/// Below this size, `retrieve` returns everything.
pub const SMALL_KEEPER_TOKENS: u32 = 10_000;

/// Token budget for keyword-scored retrieval.
pub const RETRIEVE_BUDGET: u32 = 10_000;

/// Timeout for the smart-retrieve LLM call.
pub const SMART_RETRIEVE_TIMEOUT: Duration = Duration::from_secs(30);

const SMART_SYSTEM_PROMPT: &str =
    "You hold offloaded conversation context. Answer the question using ONLY the context \
     provided. If the context does not contain the answer, say so briefly.";

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("keeper unavailable: {0}")]
    Mailbox(String),
}

/// Summary line data for the keeper index.
#[derive(Clone, Debug, PartialEq)]
pub struct KeeperInfo {
    pub id: String,
    pub topic: String,
    pub source_agent: String,
    pub tokens: u32,
}

impl KeeperInfo {
    /// `- [<id>] "<topic>" by <source> (<tokens> tokens)`, the line agents see
    /// in their system prompt.
    pub fn index_line(&self) -> String {
        format!(
            "- [{}] \"{}\" by {} ({} tokens)",
            self.id, self.topic, self.source_agent, self.tokens
        )
    }
}

enum KeeperCommand {
    Store {
        messages: Vec<Message>,
        metadata: Option<Map<String, Value>>,
        reply: oneshot::Sender<()>,
    },
    RetrieveAll {
        reply: oneshot::Sender<Vec<Message>>,
    },
    Retrieve {
        query: String,
        reply: oneshot::Sender<Vec<Message>>,
    },
    SmartRetrieve {
        question: String,
        reply: oneshot::Sender<String>,
    },
    Info {
        reply: oneshot::Sender<KeeperInfo>,
    },
    Flush {
        reply: oneshot::Sender<Result<(), KeeperError>>,
    },
    PersistTick,
}

/// Mailbox handle to one keeper actor.
#[derive(Clone)]
pub struct KeeperHandle {
    pub id: String,
    pub team_id: String,
    pub topic: String,
    tx: mpsc::Sender<KeeperCommand>,
    cancel: CancellationToken,
}

impl KeeperHandle {
    async fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> KeeperCommand,
    ) -> Result<T, KeeperError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| KeeperError::Mailbox(self.id.clone()))?;
        reply_rx
            .await
            .map_err(|_| KeeperError::Mailbox(self.id.clone()))
    }

    /// Appends messages (deduplicating an identical re-send) and schedules a
    /// debounced persist.
    pub async fn store(
        &self,
        messages: Vec<Message>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), KeeperError> {
        self.send(|reply| KeeperCommand::Store {
            messages,
            metadata,
            reply,
        })
        .await
    }

    pub async fn retrieve_all(&self) -> Result<Vec<Message>, KeeperError> {
        self.send(|reply| KeeperCommand::RetrieveAll { reply }).await
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<Message>, KeeperError> {
        let query = query.to_string();
        self.send(|reply| KeeperCommand::Retrieve { query, reply })
            .await
    }

    pub async fn smart_retrieve(&self, question: &str) -> Result<String, KeeperError> {
        let question = question.to_string();
        self.send(|reply| KeeperCommand::SmartRetrieve { question, reply })
            .await
    }

    pub async fn info(&self) -> Result<KeeperInfo, KeeperError> {
        self.send(|reply| KeeperCommand::Info { reply }).await
    }

    /// `[Keeper:<id>] topic=<topic> source=<source> tokens=<n>`
    pub async fn index_entry(&self) -> Result<String, KeeperError> {
        let info = self.info().await?;
        Ok(format!(
            "[Keeper:{}] topic={} source={} tokens={}",
            info.id, info.topic, info.source_agent, info.tokens
        ))
    }

    /// Forces an immediate write (tests and shutdown).
    pub async fn flush_persist(&self) -> Result<(), KeeperError> {
        self.send(|reply| KeeperCommand::Flush { reply }).await?
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

struct KeeperActor {
    snapshot: KeeperSnapshot,
    dirty: bool,
    persist_pending: bool,
    debounce: Duration,
    store: Store,
    registry: Registry,
    llm: Arc<dyn LlmClient>,
    cost: CostTracker,
    model: String,
    self_tx: mpsc::Sender<KeeperCommand>,
}

impl KeeperActor {
    fn registry_key(&self) -> RegistryKey {
        RegistryKey::keeper(self.snapshot.team_id.clone(), &self.snapshot.id)
    }

    fn info(&self) -> KeeperInfo {
        KeeperInfo {
            id: self.snapshot.id.clone(),
            topic: self.snapshot.topic.clone(),
            source_agent: self.snapshot.source_agent.clone(),
            tokens: self.snapshot.token_count,
        }
    }

    fn schedule_persist(&mut self) {
        if self.persist_pending {
            // The scheduled timer will persist the latest state.
            return;
        }
        self.persist_pending = true;
        let tx = self.self_tx.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = tx.send(KeeperCommand::PersistTick).await;
        });
    }

    async fn persist(&mut self) -> Result<(), KeeperError> {
        self.store.upsert_keeper(self.snapshot.clone()).await?;
        self.dirty = false;
        Ok(())
    }

    fn handle_store(&mut self, messages: Vec<Message>, metadata: Option<Map<String, Value>>) {
        let duplicate = !messages.is_empty()
            && self.snapshot.messages.len() >= messages.len()
            && self.snapshot.messages[self.snapshot.messages.len() - messages.len()..] == messages[..];
        if !duplicate && !messages.is_empty() {
            self.snapshot.messages.extend(messages);
            self.snapshot.token_count = estimate_message_tokens(&self.snapshot.messages);
            self.dirty = true;
        }
        if let Some(metadata) = metadata {
            if !metadata.is_empty() {
                for (key, value) in metadata {
                    self.snapshot.metadata.insert(key, value);
                }
                self.dirty = true;
            }
        }
        if self.dirty {
            self.registry.update_metadata(&self.registry_key(), |meta| {
                meta.insert("tokens".into(), json!(self.snapshot.token_count));
            });
            self.schedule_persist();
        }
    }

    fn handle_retrieve(&self, query: &str) -> Vec<Message> {
        if self.snapshot.token_count < SMALL_KEEPER_TOKENS {
            return self.snapshot.messages.clone();
        }
        keyword_select(&self.snapshot.messages, query, RETRIEVE_BUDGET)
    }

    async fn handle_smart_retrieve(&self, question: &str) -> String {
        let context = render_lines(&self.snapshot.messages);
        let prompt = vec![
            Message::system(SMART_SYSTEM_PROMPT),
            Message::user(format!("Context:\n{context}\n\nQuestion: {question}")),
        ];
        let call = tokio::time::timeout(
            SMART_RETRIEVE_TIMEOUT,
            self.llm.generate(&self.model, &prompt, &[]),
        )
        .await;
        match call {
            Ok(Ok(response)) => {
                self.cost.record_call(
                    &self.snapshot.team_id,
                    &format!("keeper:{}", self.snapshot.id),
                    &self.model,
                    &response.usage,
                    None,
                );
                response.text
            }
            Ok(Err(error)) => {
                warn!(keeper = %self.snapshot.id, %error, "smart retrieve failed, keyword fallback");
                render_lines(&self.handle_retrieve(question))
            }
            Err(_) => {
                warn!(keeper = %self.snapshot.id, "smart retrieve timed out, keyword fallback");
                render_lines(&self.handle_retrieve(question))
            }
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<KeeperCommand>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        KeeperCommand::Store { messages, metadata, reply } => {
                            self.handle_store(messages, metadata);
                            let _ = reply.send(());
                        }
                        KeeperCommand::RetrieveAll { reply } => {
                            let _ = reply.send(self.snapshot.messages.clone());
                        }
                        KeeperCommand::Retrieve { query, reply } => {
                            let _ = reply.send(self.handle_retrieve(&query));
                        }
                        KeeperCommand::SmartRetrieve { question, reply } => {
                            let _ = reply.send(self.handle_smart_retrieve(&question).await);
                        }
                        KeeperCommand::Info { reply } => {
                            let _ = reply.send(self.info());
                        }
                        KeeperCommand::Flush { reply } => {
                            self.persist_pending = false;
                            let _ = reply.send(self.persist().await);
                        }
                        KeeperCommand::PersistTick => {
                            self.persist_pending = false;
                            if self.dirty {
                                if let Err(error) = self.persist().await {
                                    warn!(keeper = %self.snapshot.id, %error, "persist failed, rescheduling");
                                    self.schedule_persist();
                                }
                            }
                        }
                    }
                }
            }
        }
        // Terminate: one last synchronous persist if dirty, then deregister.
        if self.dirty {
            if let Err(error) = self.persist().await {
                warn!(keeper = %self.snapshot.id, %error, "final persist failed");
            }
        }
        self.registry.unregister(&self.registry_key());
    }
}

/// Spawner and index over a team's keepers.
#[derive(Clone)]
pub struct Keepers {
    store: Store,
    registry: Registry,
    bus: Bus,
    llm: Arc<dyn LlmClient>,
    cost: CostTracker,
    /// Model used for smart retrieval (the weak tier).
    model: String,
    handles: Arc<DashMap<String, KeeperHandle>>,
}

impl Keepers {
    pub fn new(
        store: Store,
        registry: Registry,
        bus: Bus,
        llm: Arc<dyn LlmClient>,
        cost: CostTracker,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            llm,
            cost,
            model: model.into(),
            handles: Arc::new(DashMap::new()),
        }
    }

    /// Starts a keeper with an offloaded message block and announces it on the
    /// team and context topics. Returns its handle.
    pub async fn spawn(
        &self,
        team_id: &str,
        topic_name: &str,
        source_agent: &str,
        messages: Vec<Message>,
    ) -> Result<KeeperHandle, KeeperError> {
        let id = uuid::Uuid::new_v4().to_string();
        let handle = self
            .start_actor(&id, team_id, topic_name, source_agent, messages)
            .await?;
        for t in [topic::team(team_id), topic::context(team_id)] {
            self.bus.publish(
                &t,
                Event::KeeperCreated {
                    keeper_id: id.clone(),
                    topic: topic_name.to_string(),
                    source_agent: source_agent.to_string(),
                },
            );
        }
        Ok(handle)
    }

    /// Restarts actors for every keeper snapshot persisted for a team.
    pub async fn restore(&self, team_id: &str) -> Result<Vec<KeeperHandle>, KeeperError> {
        let snapshots = self.store.list_keepers(team_id).await?;
        let mut handles = Vec::new();
        for snapshot in snapshots {
            if self.handles.contains_key(&snapshot.id) {
                continue;
            }
            let handle = self
                .start_actor(
                    &snapshot.id,
                    &snapshot.team_id,
                    &snapshot.topic,
                    &snapshot.source_agent,
                    Vec::new(),
                )
                .await?;
            handles.push(handle);
        }
        Ok(handles)
    }

    async fn start_actor(
        &self,
        id: &str,
        team_id: &str,
        topic_name: &str,
        source_agent: &str,
        seed: Vec<Message>,
    ) -> Result<KeeperHandle, KeeperError> {
        // Prior state wins over the seed: a restarted keeper reloads its block.
        let snapshot = match self.store.get_keeper(id).await? {
            Some(prior) => prior,
            None => KeeperSnapshot {
                id: id.to_string(),
                team_id: team_id.to_string(),
                topic: topic_name.to_string(),
                source_agent: source_agent.to_string(),
                token_count: estimate_message_tokens(&seed),
                messages: seed,
                metadata: Map::new(),
                status: "active".to_string(),
            },
        };
        self.store.upsert_keeper(snapshot.clone()).await?;

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);
        let key = RegistryKey::keeper(team_id, id);
        let mut metadata = Map::new();
        metadata.insert("type".into(), json!("keeper"));
        metadata.insert("topic".into(), json!(snapshot.topic));
        metadata.insert("tokens".into(), json!(snapshot.token_count));
        self.registry.register(
            key,
            RegistryEntry {
                kind: WorkerKind::Keeper,
                metadata,
                cancel: cancel.clone(),
            },
        );

        let actor = KeeperActor {
            snapshot: snapshot.clone(),
            dirty: false,
            persist_pending: false,
            debounce: PERSIST_DEBOUNCE,
            store: self.store.clone(),
            registry: self.registry.clone(),
            llm: self.llm.clone(),
            cost: self.cost.clone(),
            model: self.model.clone(),
            self_tx: tx.clone(),
        };
        tokio::spawn(actor.run(rx, cancel.clone()));

        let handle = KeeperHandle {
            id: id.to_string(),
            team_id: team_id.to_string(),
            topic: snapshot.topic.clone(),
            tx,
            cancel,
        };
        self.handles.insert(id.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<KeeperHandle> {
        self.handles.get(id).map(|h| h.clone())
    }

    pub fn for_team(&self, team_id: &str) -> Vec<KeeperHandle> {
        self.handles
            .iter()
            .filter(|entry| entry.value().team_id == team_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Index lines for every keeper of a team (system-prompt injection).
    pub async fn index_block(&self, team_id: &str) -> String {
        let mut lines = Vec::new();
        for handle in self.for_team(team_id) {
            if let Ok(info) = handle.info().await {
                lines.push(info.index_line());
            }
        }
        lines.sort();
        lines.join("\n")
    }

    /// Stops every keeper of a team (sub-team dissolve, shutdown).
    pub fn shutdown_team(&self, team_id: &str) {
        self.handles.retain(|_, handle| {
            if handle.team_id == team_id {
                handle.shutdown();
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn keepers(store: &Store) -> (Keepers, Arc<MockLlm>) {
        let llm = Arc::new(MockLlm::new());
        (
            Keepers::new(
                store.clone(),
                Registry::new(),
                Bus::new(),
                llm.clone(),
                CostTracker::new(),
                "anthropic:claude-haiku-4-5",
            ),
            llm,
        )
    }

    #[tokio::test]
    async fn store_is_idempotent_for_repeated_identical_messages() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let (keepers, _) = keepers(&store);
        let keeper = keepers
            .spawn("t1", "auth", "alice", vec![Message::user("seed")])
            .await
            .unwrap();

        let block = vec![Message::user("jwt refresh details")];
        keeper.store(block.clone(), None).await.unwrap();
        let tokens_after_first = keeper.info().await.unwrap().tokens;
        keeper.store(block, None).await.unwrap();
        let tokens_after_second = keeper.info().await.unwrap().tokens;
        assert_eq!(tokens_after_first, tokens_after_second);
        assert_eq!(keeper.retrieve_all().await.unwrap().len(), 2);

        keeper.flush_persist().await.unwrap();
        let persisted = store.get_keeper(&keeper.id).await.unwrap().unwrap();
        assert_eq!(persisted.messages.len(), 2);
    }

    #[tokio::test]
    async fn debounce_coalesces_rapid_stores() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let (keepers, _) = keepers(&store);
        let keeper = keepers.spawn("t1", "auth", "alice", vec![]).await.unwrap();

        for i in 0..5 {
            keeper
                .store(vec![Message::user(format!("chunk {i}"))], None)
                .await
                .unwrap();
        }
        // Let the single pending timer fire.
        tokio::time::sleep(PERSIST_DEBOUNCE * 4).await;
        let persisted = store.get_keeper(&keeper.id).await.unwrap().unwrap();
        assert_eq!(persisted.messages.len(), 5);
    }

    #[tokio::test]
    async fn restart_reloads_persisted_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let (keepers, _) = keepers(&store);
        let keeper = keepers
            .spawn("t1", "auth", "alice", vec![Message::user("original")])
            .await
            .unwrap();
        let id = keeper.id.clone();
        keeper.flush_persist().await.unwrap();
        keeper.shutdown();
        keepers.handles.clear();

        let restored = keepers.restore("t1").await.unwrap();
        assert_eq!(restored.len(), 1);
        let messages = restored[0].retrieve_all().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "original");
        assert_eq!(restored[0].id, id);
    }

    #[tokio::test]
    async fn smart_retrieve_falls_back_to_keyword_lines_on_llm_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let (keepers, llm) = keepers(&store);
        let keeper = keepers
            .spawn("t1", "auth", "alice", vec![Message::user("the jwt secret rotates daily")])
            .await
            .unwrap();

        llm.push_error("provider down");
        let text = keeper.smart_retrieve("how does the jwt rotate?").await.unwrap();
        assert!(text.contains("[user]: the jwt secret rotates daily"));

        llm.push_text("It rotates daily.");
        let text = keeper.smart_retrieve("how does the jwt rotate?").await.unwrap();
        assert_eq!(text, "It rotates daily.");
    }

    #[tokio::test]
    async fn index_entry_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("weft.db")).unwrap();
        let (keepers, _) = keepers(&store);
        let keeper = keepers.spawn("t1", "auth flow", "alice", vec![]).await.unwrap();
        let entry = keeper.index_entry().await.unwrap();
        assert!(entry.starts_with(&format!("[Keeper:{}] topic=auth flow source=alice", keeper.id)));
    }
}
