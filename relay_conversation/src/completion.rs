//! Structured completion with bounded retries.
//!
//! One chat turn runs as an explicit state machine:
//!
//! ```text
//! Init -> Prompting -> Awaiting -> Validating -> Success
//!            ^                          |
//!            +------- Retrying <--------+-> Exhausted
//! ```
//!
//! `Init` snapshots the stored history into the `latest` checkpoint before
//! the model is contacted. Retries work on a turn-local copy of the message
//! list; the durable history is written exactly once, in `Success`.

use relay_core::{
    ChatMessage, CompletionClient, ConversationId, KeyValueStore, PromptStyle, RepairError,
    SamplingParams, repair_structured_text,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::history::HistoryWindow;
use crate::prompt::{REPLY_FIELD, build_messages, retry_feedback};
use crate::store::{ConversationStore, LATEST_CHECKPOINT};

/// Why a single attempt failed. Every variant is retryable.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("completion request failed: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Repair(#[from] RepairError),

    #[error("reply field {0:?} missing from model output")]
    MissingField(&'static str),

    #[error("reply field {0:?} is not a string")]
    FieldNotText(&'static str),
}

/// Tunables for [`ResilientCompletion`].
#[derive(Debug, Clone)]
pub struct CompletionPolicy {
    pub params: SamplingParams,
    /// Total attempts per turn, including the first.
    pub retry_budget: u32,
    pub attempt_timeout: Duration,
    pub prompt_style: PromptStyle,
    /// Reply returned once the budget is spent.
    pub failure_reply: String,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            params: SamplingParams::default(),
            retry_budget: 3,
            attempt_timeout: Duration::from_secs(60),
            prompt_style: PromptStyle::Conversational,
            failure_reply: ":(".to_string(),
        }
    }
}

/// How a chat turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply was validated and both turns were committed to history.
    Completed { reply: String, attempts: u32 },
    /// Every attempt failed; history is unchanged.
    Exhausted { attempts: u32 },
    /// The conversation store could not be read or written.
    StoreUnavailable,
}

impl TurnOutcome {
    /// Text to show the user: the reply, or `failure_reply` otherwise.
    #[must_use]
    pub fn into_text(self, failure_reply: &str) -> String {
        match self {
            Self::Completed { reply, .. } => reply,
            Self::Exhausted { .. } | Self::StoreUnavailable => failure_reply.to_string(),
        }
    }
}

enum TurnState {
    Init,
    Prompting { attempt: u32 },
    Awaiting { attempt: u32 },
    Validating { attempt: u32, raw: String },
    Retrying { attempt: u32, error: AttemptError },
    Success { attempt: u32, reply: String },
    Exhausted { attempts: u32 },
}

/// Data carried through one turn.
struct Turn<'a> {
    id: &'a ConversationId,
    message: &'a str,
    context: String,
    /// Full stored history as of `Init`.
    history: Vec<ChatMessage>,
    window: HistoryWindow,
    /// Messages sent to the model; grows by two per retry, never persisted.
    working: Vec<ChatMessage>,
}

/// Pull the reply field out of raw model output.
pub fn extract_reply(raw: &str) -> Result<String, AttemptError> {
    let object = repair_structured_text(raw)?;
    match object.get(REPLY_FIELD) {
        Some(Value::String(reply)) => Ok(reply.clone()),
        Some(_) => Err(AttemptError::FieldNotText(REPLY_FIELD)),
        None => Err(AttemptError::MissingField(REPLY_FIELD)),
    }
}

pub struct ResilientCompletion<S = Arc<dyn KeyValueStore>, C = Arc<dyn CompletionClient>> {
    store: ConversationStore<S>,
    client: C,
    policy: CompletionPolicy,
}

impl<S, C> ResilientCompletion<S, C>
where
    S: KeyValueStore,
    C: CompletionClient,
{
    pub fn new(store: ConversationStore<S>, client: C, policy: CompletionPolicy) -> Self {
        let mut policy = policy;
        policy.retry_budget = policy.retry_budget.max(1);
        Self {
            store,
            client,
            policy,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &CompletionPolicy {
        &self.policy
    }

    /// Run one chat turn and return the text to show the user.
    pub async fn chat(&self, id: &ConversationId, message: &str) -> String {
        self.respond(id, message)
            .await
            .into_text(&self.policy.failure_reply)
    }

    /// Run one chat turn. Never fails: every error ends in an outcome.
    pub async fn respond(&self, id: &ConversationId, message: &str) -> TurnOutcome {
        let mut turn = Turn {
            id,
            message,
            context: String::new(),
            history: Vec::new(),
            window: HistoryWindow::new(0),
            working: Vec::new(),
        };
        let mut state = TurnState::Init;

        loop {
            state = match state {
                TurnState::Init => match self.init(&mut turn).await {
                    Ok(()) => TurnState::Prompting { attempt: 1 },
                    Err(e) => {
                        error!("[{id}] Failed to prepare turn: {e}");
                        return TurnOutcome::StoreUnavailable;
                    }
                },
                TurnState::Prompting { attempt } => {
                    if turn.working.is_empty() {
                        turn.working = build_messages(
                            self.policy.prompt_style,
                            &turn.context,
                            turn.window.select(&turn.history),
                            turn.message,
                        );
                    }
                    TurnState::Awaiting { attempt }
                }
                TurnState::Awaiting { attempt } => {
                    debug!(
                        "[{id}] Attempt {attempt}/{}: sending {} messages",
                        self.policy.retry_budget,
                        turn.working.len()
                    );
                    match self.await_completion(&turn.working).await {
                        Ok(raw) => TurnState::Validating { attempt, raw },
                        Err(error) => TurnState::Retrying { attempt, error },
                    }
                }
                TurnState::Validating { attempt, raw } => match extract_reply(&raw) {
                    Ok(reply) => TurnState::Success { attempt, reply },
                    Err(error) => {
                        debug!("[{id}] Unusable model output: {raw}");
                        TurnState::Retrying { attempt, error }
                    }
                },
                TurnState::Retrying { attempt, error } => {
                    warn!(
                        "[{id}] Attempt {attempt}/{} failed: {error}",
                        self.policy.retry_budget
                    );
                    if attempt >= self.policy.retry_budget {
                        TurnState::Exhausted { attempts: attempt }
                    } else {
                        turn.working.extend(retry_feedback());
                        TurnState::Prompting {
                            attempt: attempt + 1,
                        }
                    }
                }
                TurnState::Success { attempt, reply } => {
                    return self.commit(turn, attempt, reply).await;
                }
                TurnState::Exhausted { attempts } => {
                    warn!("[{id}] Giving up after {attempts} attempts; history unchanged");
                    return TurnOutcome::Exhausted { attempts };
                }
            };
        }
    }

    async fn init(&self, turn: &mut Turn<'_>) -> crate::Result<()> {
        turn.context = self.store.context(turn.id).await?;
        turn.window = HistoryWindow::new(self.store.window_size(turn.id).await?);
        turn.history = self.store.full_history(turn.id).await?;
        self.store
            .put_checkpoint(turn.id, LATEST_CHECKPOINT, &turn.history)
            .await
    }

    async fn await_completion(&self, messages: &[ChatMessage]) -> Result<String, AttemptError> {
        let timeout = self.policy.attempt_timeout;
        match tokio::time::timeout(timeout, self.client.complete(messages, &self.policy.params))
            .await
        {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(AttemptError::Transport(e)),
            Err(_) => Err(AttemptError::Timeout(timeout)),
        }
    }

    async fn commit(&self, turn: Turn<'_>, attempts: u32, reply: String) -> TurnOutcome {
        let mut history = turn.history;
        history.push(ChatMessage::user(turn.message));
        history.push(ChatMessage::assistant(reply.clone()));

        if let Err(e) = self.store.update_history(turn.id, &history).await {
            error!("[{}] Failed to save history: {e}", turn.id);
            return TurnOutcome::StoreUnavailable;
        }

        info!(
            "[{}] Turn completed after {attempts} attempt(s); history has {} messages",
            turn.id,
            history.len()
        );
        TurnOutcome::Completed { reply, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::Role;
    use relay_store::MemoryStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every request.
    struct ScriptedClient {
        responses: Mutex<VecDeque<anyhow::Result<String>>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<anyhow::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<Vec<ChatMessage>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _params: &SamplingParams,
        ) -> anyhow::Result<String> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("no more scripted responses".to_string()))
        }
    }

    fn ok(text: &str) -> anyhow::Result<String> {
        Ok(text.to_string())
    }

    fn setup(
        responses: Vec<anyhow::Result<String>>,
    ) -> (
        ResilientCompletion<Arc<MemoryStore>, Arc<ScriptedClient>>,
        ConversationStore<Arc<MemoryStore>>,
        Arc<ScriptedClient>,
        ConversationId,
    ) {
        let store = ConversationStore::new(Arc::new(MemoryStore::new()));
        let client = ScriptedClient::new(responses);
        let completion =
            ResilientCompletion::new(store.clone(), client.clone(), CompletionPolicy::default());
        (completion, store, client, ConversationId::from(1_i64))
    }

    #[test]
    fn extract_reply_requires_string_field() {
        assert_eq!(
            extract_reply(r#"{"user 1": "q", "user 2": "a"}"#).unwrap(),
            "a"
        );
        assert!(matches!(
            extract_reply(r#"{"user 1": "q"}"#),
            Err(AttemptError::MissingField("user 2"))
        ));
        assert!(matches!(
            extract_reply(r#"{"user 2": 5}"#),
            Err(AttemptError::FieldNotText("user 2"))
        ));
        assert!(matches!(
            extract_reply("no json here"),
            Err(AttemptError::Repair(RepairError::MalformedStructure))
        ));
    }

    #[tokio::test]
    async fn first_attempt_success_commits_both_turns() {
        let (completion, store, client, id) = setup(vec![ok(
            r#"Here you go: {"context": "default", "user 1": "hello", "user 2": "Well met."}"#,
        )]);

        let outcome = completion.respond(&id, "hello").await;

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: "Well met.".to_string(),
                attempts: 1
            }
        );
        assert_eq!(
            store.full_history(&id).await.unwrap(),
            vec![ChatMessage::user("hello"), ChatMessage::assistant("Well met.")]
        );
        assert_eq!(store.checkpoint(&id, "latest").await.unwrap(), Some(vec![]));
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn retries_append_feedback_without_duplicating_user_turn() {
        let (completion, store, client, id) = setup(vec![
            ok("I'm sorry, I can't help with that."),
            Err(anyhow::anyhow!("connection reset")),
            ok(r#"{"user 2": "Third time lucky"}"#),
        ]);

        let reply = completion.chat(&id, "hi").await;
        assert_eq!(reply, "Third time lucky");

        let requests = client.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].len(), 1);
        assert_eq!(requests[1].len(), 3);
        assert_eq!(requests[2].len(), 5);
        assert_eq!(requests[2][0], requests[0][0]);
        assert_eq!(requests[2][1].content, "Of course!");
        assert_eq!(requests[2][2].content, "json format error: parsing failed.");
        assert_eq!(requests[2][3].content, "Of course!");
        assert_eq!(requests[2][4].content, "json format error: parsing failed.");

        // feedback messages never reach durable history
        assert_eq!(
            store.full_history(&id).await.unwrap(),
            vec![ChatMessage::user("hi"), ChatMessage::assistant("Third time lucky")]
        );
    }

    #[tokio::test]
    async fn exhausted_budget_returns_sentinel_and_leaves_history() {
        let (completion, store, client, id) =
            setup(vec![ok("garbage"), ok("more garbage"), ok("{ broken"), ok("unused")]);
        let before = vec![ChatMessage::user("old"), ChatMessage::assistant("older")];
        store.update_history(&id, &before).await.unwrap();

        let outcome = completion.respond(&id, "hello").await;

        assert_eq!(outcome, TurnOutcome::Exhausted { attempts: 3 });
        assert_eq!(client.requests().len(), 3);
        assert_eq!(store.full_history(&id).await.unwrap(), before);
        assert_eq!(store.checkpoint(&id, "latest").await.unwrap(), Some(before));
        assert_eq!(outcome.into_text(":("), ":(");
    }

    #[tokio::test]
    async fn model_sees_only_the_window() {
        let (completion, store, client, id) = setup(vec![ok(r#"{"user 2": "ok"}"#)]);
        let history: Vec<ChatMessage> = (0..6)
            .map(|i| ChatMessage::user(format!("turn {i}")))
            .collect();
        store.update_history(&id, &history).await.unwrap();
        store.update_window_size(&id, 2).await.unwrap();
        store.update_context(&id, "a ship").await.unwrap();

        completion.respond(&id, "next").await;

        let sent = &client.requests()[0];
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].content, "turn 4");
        assert_eq!(sent[1].content, "turn 5");
        assert!(sent[2].content.ends_with(r#"{ "context": "a ship", "user 1": "next""#));

        // the whole history survives, not just the window
        assert_eq!(store.full_history(&id).await.unwrap().len(), 8);
        assert_eq!(store.checkpoint(&id, "latest").await.unwrap(), Some(history));
    }

    struct SlowClient;

    #[async_trait]
    impl CompletionClient for SlowClient {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _params: &SamplingParams,
        ) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(r#"{"user 2": "too late"}"#.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_against_the_budget() {
        let store = ConversationStore::new(Arc::new(MemoryStore::new()));
        let policy = CompletionPolicy {
            attempt_timeout: Duration::from_secs(5),
            retry_budget: 2,
            ..CompletionPolicy::default()
        };
        let completion = ResilientCompletion::new(store, SlowClient, policy);

        let outcome = completion.respond(&ConversationId::from(1_i64), "hi").await;
        assert_eq!(outcome, TurnOutcome::Exhausted { attempts: 2 });
    }

    #[tokio::test]
    async fn zero_budget_still_makes_one_attempt() {
        let store = ConversationStore::new(Arc::new(MemoryStore::new()));
        let client = ScriptedClient::new(vec![ok("nope")]);
        let policy = CompletionPolicy {
            retry_budget: 0,
            ..CompletionPolicy::default()
        };
        let completion = ResilientCompletion::new(store, client.clone(), policy);

        let outcome = completion.respond(&ConversationId::from(1_i64), "hi").await;
        assert_eq!(outcome, TurnOutcome::Exhausted { attempts: 1 });
        assert_eq!(client.requests().len(), 1);
    }

    fn embedded(
        store: &ConversationStore<Arc<MemoryStore>>,
        responses: Vec<anyhow::Result<String>>,
    ) -> (
        ResilientCompletion<Arc<MemoryStore>, Arc<ScriptedClient>>,
        Arc<ScriptedClient>,
    ) {
        let client = ScriptedClient::new(responses);
        let policy = CompletionPolicy {
            prompt_style: PromptStyle::EmbeddedHistory,
            ..CompletionPolicy::default()
        };
        (
            ResilientCompletion::new(store.clone(), client.clone(), policy),
            client,
        )
    }

    fn earlier_turns() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("hey"),
            ChatMessage::user("old"),
            ChatMessage::assistant("older"),
        ]
    }

    #[tokio::test]
    async fn embedded_history_retries_and_commits_plain_turns() {
        let store = ConversationStore::new(Arc::new(MemoryStore::new()));
        let id = ConversationId::from(3_i64);
        let before = earlier_turns();
        store.update_history(&id, &before).await.unwrap();
        store.update_window_size(&id, 2).await.unwrap();
        let (completion, client) = embedded(
            &store,
            vec![ok("not json at all"), ok(r#"{"user 2": "Embedded reply"}"#)],
        );

        let outcome = completion.respond(&id, "next").await;
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: "Embedded reply".to_string(),
                attempts: 2
            }
        );

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].len(), 1);
        assert_eq!(requests[0][0].role, Role::User);
        assert!(requests[0][0].content.contains(
            r#""history": [{"user 1":"old"},{"user 2":"older"}], "user 1": "next""#
        ));
        assert!(!requests[0][0].content.contains(r#"{"user 1":"hi"}"#));

        assert_eq!(requests[1].len(), 3);
        assert_eq!(requests[1][0], requests[0][0]);
        assert_eq!(requests[1][1], ChatMessage::assistant("Of course!"));
        assert_eq!(
            requests[1][2],
            ChatMessage::user("json format error: parsing failed.")
        );

        let mut expected = before.clone();
        expected.push(ChatMessage::user("next"));
        expected.push(ChatMessage::assistant("Embedded reply"));
        assert_eq!(store.full_history(&id).await.unwrap(), expected);
        assert_eq!(store.checkpoint(&id, "latest").await.unwrap(), Some(before));
    }

    #[tokio::test]
    async fn embedded_history_exhaustion_leaves_state_alone() {
        let store = ConversationStore::new(Arc::new(MemoryStore::new()));
        let id = ConversationId::from(3_i64);
        let before = earlier_turns();
        store.update_history(&id, &before).await.unwrap();
        let (completion, client) = embedded(&store, vec![ok("no"), ok("still no"), ok("{ nope")]);

        let outcome = completion.respond(&id, "next").await;

        assert_eq!(outcome, TurnOutcome::Exhausted { attempts: 3 });
        let requests = client.requests();
        assert_eq!(
            requests.iter().map(Vec::len).collect::<Vec<_>>(),
            [1, 3, 5]
        );
        assert_eq!(store.full_history(&id).await.unwrap(), before);
        assert_eq!(store.checkpoint(&id, "latest").await.unwrap(), Some(before));
    }
}
