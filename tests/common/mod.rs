use async_trait::async_trait;
use futures::StreamExt;
use parley::engine::ConversationEngine;
use parley::error::{ParleyError, Result};
use parley::providers::{ChatClient, ClientFactory, Message, ProviderKind, TextStream};
use parley::storage::{CheckpointStore, SqliteStorage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_temp_storage() -> (SqliteStorage, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("history.db");
    let storage =
        SqliteStorage::new_with_path(db_path).expect("failed to create sqlite storage with path");
    (storage, tmp)
}

/// What the scripted backend does for one call
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Step {
    /// Whole reply; streamed as small fragments
    Reply(String),
    /// Fail before producing anything
    Fail(String),
    /// Stream these fragments, then fail
    StreamThenFail(Vec<String>, String),
}

/// A recorded invocation
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Call {
    pub provider: ProviderKind,
    pub model: String,
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub new_message: Message,
    pub streamed: bool,
}

#[derive(Default)]
struct ScriptState {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
}

/// Client factory whose clients follow a shared script
///
/// Calls consume steps in order; once the script is empty every call
/// replies "ok". Validation mirrors the real gateway.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    state: Arc<ScriptState>,
}

#[allow(dead_code)]
impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        let gateway = Self::new();
        for step in steps {
            gateway.push(step);
        }
        gateway
    }

    pub fn push(&self, step: Step) {
        self.state.steps.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }
}

impl ClientFactory for ScriptedGateway {
    fn create_client(
        &self,
        provider: &str,
        model: &str,
        api_key: &str,
    ) -> Result<Box<dyn ChatClient>> {
        let kind: ProviderKind = provider.parse()?;
        if api_key.trim().is_empty() {
            return Err(ParleyError::MissingCredential(kind.display_name().to_string()).into());
        }
        Ok(Box::new(ScriptedClient {
            state: Arc::clone(&self.state),
            kind,
            model: model.to_string(),
        }))
    }
}

struct ScriptedClient {
    state: Arc<ScriptState>,
    kind: ProviderKind,
    model: String,
}

impl ScriptedClient {
    fn next_step(
        &self,
        system_prompt: &str,
        history: &[Message],
        new_message: &Message,
        streamed: bool,
    ) -> Step {
        self.state.calls.lock().unwrap().push(Call {
            provider: self.kind,
            model: self.model.clone(),
            system_prompt: system_prompt.to_string(),
            history: history.to_vec(),
            new_message: new_message.clone(),
            streamed,
        });
        self.state
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Reply("ok".to_string()))
    }

    fn failure(&self, cause: &str) -> anyhow::Error {
        ParleyError::provider(self.kind.display_name(), cause).into()
    }
}

/// Split text into fragments of at most three characters
fn fragments(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(3).map(|c| c.iter().collect()).collect()
}

#[async_trait]
impl ChatClient for ScriptedClient {
    fn provider(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
        new_message: &Message,
    ) -> Result<Message> {
        match self.next_step(system_prompt, history, new_message, false) {
            Step::Reply(text) => Ok(Message::assistant(text)),
            Step::Fail(cause) | Step::StreamThenFail(_, cause) => Err(self.failure(&cause)),
        }
    }

    async fn stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        new_message: &Message,
    ) -> Result<TextStream> {
        let items: Vec<Result<String>> =
            match self.next_step(system_prompt, history, new_message, true) {
                Step::Reply(text) => fragments(&text).into_iter().map(Ok).collect(),
                Step::Fail(cause) => return Err(self.failure(&cause)),
                Step::StreamThenFail(parts, cause) => parts
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(self.failure(&cause))))
                    .collect(),
            };
        Ok(futures::stream::iter(items).boxed())
    }
}

/// Checkpoint store that reads normally but cannot write
#[allow(dead_code)]
pub struct ReadOnlyCheckpoints {
    pub inner: Arc<SqliteStorage>,
}

impl CheckpointStore for ReadOnlyCheckpoints {
    fn load_thread(&self, thread_id: &str) -> Result<Vec<Message>> {
        self.inner.load_thread(thread_id)
    }

    fn append_turn(&self, _thread_id: &str, _messages: &[Message]) -> Result<()> {
        Err(ParleyError::store("disk I/O error").into())
    }

    fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.inner.delete_thread(thread_id)
    }
}

/// Engine over a fresh temp database and a scripted gateway
#[allow(dead_code)]
pub fn scripted_engine(
    steps: impl IntoIterator<Item = Step>,
) -> (ConversationEngine, ScriptedGateway, Arc<SqliteStorage>, TempDir) {
    let (storage, tmp) = create_temp_storage();
    let storage = Arc::new(storage);
    let gateway = ScriptedGateway::with_steps(steps);
    let engine = ConversationEngine::with_storage(Arc::clone(&storage), Arc::new(gateway.clone()));
    (engine, gateway, storage, tmp)
}
