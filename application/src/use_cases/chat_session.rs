//! Chat session use case.
//!
//! Turns one user message into an ordered sequence of persisted chat
//! snapshots while the remote completion streams in.
//!
//! # Send state machine
//!
//! ```text
//! Load ─▶ AppendUser ─▶ OpenPlaceholder ─▶ Accumulate* ─┬─▶ Finalize
//!                                                       └─▶ Fail
//! ```
//!
//! Every transition writes the chat through the [`ChatStore`] before the
//! snapshot is yielded, so a caller never observes a state that is not
//! already durable. The sequence is single-pass and forward-only.

use crate::config::ChatConfig;
use crate::ports::chat_store::{ChatStore, StoreError};
use crate::ports::completion_gateway::{CompletionGateway, GatewayError};
use crate::ports::conversation_logger::{
    ConversationEvent, ConversationLogger, NoConversationLogger,
};
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use streamchat_domain::core::string::truncate_chars;
use streamchat_domain::{Chat, ChatId};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during chat session operations.
#[derive(Error, Debug)]
pub enum ChatSessionError {
    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("A message is already being sent to chat {0}")]
    SendInProgress(ChatId),

    #[error("Chat title cannot be empty")]
    InvalidTitle,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] GatewayError),
}

impl ChatSessionError {
    /// Whether the completion request failed (as opposed to a caller or
    /// storage error).
    pub fn is_transport(&self) -> bool {
        matches!(self, ChatSessionError::Transport(_))
    }
}

/// Lazy sequence of persisted chat snapshots produced by
/// [`ChatSessionUseCase::send_message`].
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<Chat, ChatSessionError>> + Send>>;

/// Use case for managing chats and streaming replies into them.
#[derive(Clone)]
pub struct ChatSessionUseCase {
    store: Arc<dyn ChatStore>,
    gateway: Arc<dyn CompletionGateway>,
    conversation_logger: Arc<dyn ConversationLogger>,
    config: ChatConfig,
    in_flight: Arc<Mutex<HashSet<ChatId>>>,
}

impl ChatSessionUseCase {
    pub fn new(store: Arc<dyn ChatStore>, gateway: Arc<dyn CompletionGateway>) -> Self {
        Self {
            store,
            gateway,
            conversation_logger: Arc::new(NoConversationLogger),
            config: ChatConfig::default(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Create with a conversation logger.
    pub fn with_conversation_logger(mut self, logger: Arc<dyn ConversationLogger>) -> Self {
        self.conversation_logger = logger;
        self
    }

    pub fn with_config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// All chats. An unreadable store is reported as empty.
    pub async fn list_chats(&self) -> Result<Vec<Chat>, ChatSessionError> {
        match self.store.list().await {
            Ok(chats) => Ok(chats),
            Err(StoreError::StorageCorrupt(reason)) => {
                warn!("Stored chats are unreadable, treating as empty: {}", reason);
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create and persist a new chat, titled from `first_message` if given.
    pub async fn create_chat(&self, first_message: Option<&str>) -> Result<Chat, ChatSessionError> {
        let chat = Chat::new(first_message);
        self.store.put(&chat).await?;

        info!(chat_id = %chat.id(), "Created chat \"{}\"", chat.title());
        self.conversation_logger.log(ConversationEvent::new(
            "chat_created",
            serde_json::json!({
                "chat_id": chat.id().as_str(),
                "title": chat.title(),
            }),
        ));
        Ok(chat)
    }

    /// Send `text` to the chat and stream the reply.
    ///
    /// The returned stream yields, in order: the chat with the user message
    /// appended, the chat with an empty streaming assistant message, one
    /// snapshot per received delta, and the finalized chat. If the completion
    /// fails, the last snapshot carries an appended error message and the
    /// stream then yields [`ChatSessionError::Transport`].
    ///
    /// Nothing happens until the stream is polled. A second send to the same
    /// chat while one is in flight yields [`ChatSessionError::SendInProgress`].
    pub fn send_message(&self, chat_id: &ChatId, text: impl Into<String>) -> SnapshotStream {
        let context = SendContext {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            logger: self.conversation_logger.clone(),
            error_message: self.config.error_message.clone(),
            in_flight: self.in_flight.clone(),
        };
        Box::pin(snapshots(context, chat_id.clone(), text.into()))
    }

    /// Abort the completion currently streaming, if any.
    ///
    /// The interrupted reply is finalized with whatever text had arrived.
    pub fn cancel(&self) {
        info!("Cancelling in-flight completion");
        self.gateway.cancel();
    }

    pub async fn toggle_pin(&self, chat_id: &ChatId) -> Result<Chat, ChatSessionError> {
        let mut chat = load_chat(self.store.as_ref(), chat_id).await?;
        let pinned = chat.toggle_pin();
        self.store.put(&chat).await?;
        debug!(chat_id = %chat_id, pinned, "Toggled pin");
        Ok(chat)
    }

    pub async fn rename_chat(
        &self,
        chat_id: &ChatId,
        new_title: &str,
    ) -> Result<Chat, ChatSessionError> {
        let new_title = new_title.trim();
        if new_title.is_empty() {
            return Err(ChatSessionError::InvalidTitle);
        }

        let mut chat = load_chat(self.store.as_ref(), chat_id).await?;
        chat.rename(new_title);
        self.store.put(&chat).await?;
        debug!(chat_id = %chat_id, "Renamed chat to \"{}\"", new_title);
        Ok(chat)
    }

    /// Delete one chat. Deleting an unknown id is a no-op.
    pub async fn delete_chat(&self, chat_id: &ChatId) -> Result<(), ChatSessionError> {
        self.store.delete(chat_id).await?;
        if self.store.last_active_chat_id().await?.as_ref() == Some(chat_id) {
            self.store.set_last_active_chat_id(None).await?;
        }

        info!(chat_id = %chat_id, "Deleted chat");
        self.conversation_logger.log(ConversationEvent::new(
            "chat_deleted",
            serde_json::json!({ "chat_id": chat_id.as_str() }),
        ));
        Ok(())
    }

    pub async fn clear_all_chats(&self) -> Result<(), ChatSessionError> {
        self.store.clear().await?;
        self.store.set_last_active_chat_id(None).await?;

        info!("Cleared all chats");
        self.conversation_logger.log(ConversationEvent::new(
            "chats_cleared",
            serde_json::json!({}),
        ));
        Ok(())
    }

    pub async fn last_active_chat_id(&self) -> Result<Option<ChatId>, ChatSessionError> {
        Ok(self.store.last_active_chat_id().await?)
    }

    /// The last active chat, if it is recorded and still exists.
    pub async fn last_active_chat(&self) -> Result<Option<Chat>, ChatSessionError> {
        let Some(id) = self.store.last_active_chat_id().await? else {
            return Ok(None);
        };
        match load_chat(self.store.as_ref(), &id).await {
            Ok(chat) => Ok(Some(chat)),
            Err(ChatSessionError::ChatNotFound(_)) => {
                debug!(chat_id = %id, "Last active chat no longer exists");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Record `chat_id` as the open chat. The chat must exist.
    pub async fn set_last_active_chat_id(&self, chat_id: &ChatId) -> Result<(), ChatSessionError> {
        load_chat(self.store.as_ref(), chat_id).await?;
        self.store.set_last_active_chat_id(Some(chat_id)).await?;
        Ok(())
    }
}

/// Everything one send needs, detached from the use case so the snapshot
/// stream is `'static`.
struct SendContext {
    store: Arc<dyn ChatStore>,
    gateway: Arc<dyn CompletionGateway>,
    logger: Arc<dyn ConversationLogger>,
    error_message: String,
    in_flight: Arc<Mutex<HashSet<ChatId>>>,
}

fn snapshots(
    context: SendContext,
    chat_id: ChatId,
    text: String,
) -> impl Stream<Item = Result<Chat, ChatSessionError>> + Send {
    try_stream! {
        let _guard = InFlightGuard::acquire(&context.in_flight, &chat_id)?;

        // Load
        let mut chat = load_chat(context.store.as_ref(), &chat_id).await?;

        // AppendUser
        chat.push_user_message(text.as_str());
        context.store.put(&chat).await?;
        info!(chat_id = %chat_id, "Sending message: {}", truncate_chars(&text, 60));
        context.logger.log(ConversationEvent::new(
            "message_sent",
            serde_json::json!({
                "chat_id": chat_id.as_str(),
                "text": text,
                "history_len": chat.messages().len(),
            }),
        ));
        yield chat.clone();

        // OpenPlaceholder
        let history = chat.history();
        chat.open_placeholder();
        context.store.put(&chat).await?;
        yield chat.clone();

        // Accumulate
        let mut deltas = context.gateway.stream_completion(history);
        let mut delta_count = 0usize;
        let failure = loop {
            match deltas.next().await {
                Some(Ok(delta)) => {
                    chat.append_delta(&delta);
                    context.store.put(&chat).await?;
                    delta_count += 1;
                    debug!(chat_id = %chat_id, bytes = delta.len(), "Delta persisted");
                    yield chat.clone();
                }
                Some(Err(error)) => break Some(error),
                None => break None,
            }
        };

        match failure {
            // Finalize
            None => {
                chat.finish_streaming();
                context.store.put(&chat).await?;

                let reply_len = chat.last_message().map(|m| m.text().len()).unwrap_or(0);
                info!(chat_id = %chat_id, deltas = delta_count, bytes = reply_len, "Stream completed");
                context.logger.log(ConversationEvent::new(
                    "stream_completed",
                    serde_json::json!({
                        "chat_id": chat_id.as_str(),
                        "deltas": delta_count,
                        "text": chat.last_message().map(|m| m.text()).unwrap_or_default(),
                    }),
                ));
                yield chat.clone();
            }
            // Fail
            Some(error) => {
                warn!(chat_id = %chat_id, deltas = delta_count, "Stream failed: {}", error);
                chat.push_error_message(context.error_message.as_str());
                context.store.put(&chat).await?;
                context.logger.log(ConversationEvent::new(
                    "stream_failed",
                    serde_json::json!({
                        "chat_id": chat_id.as_str(),
                        "deltas": delta_count,
                        "error": error.to_string(),
                    }),
                ));
                yield chat.clone();

                Err::<(), _>(ChatSessionError::Transport(error))?;
            }
        }
    }
}

/// Fetch a chat, treating an unreadable store as one without the chat.
async fn load_chat(store: &dyn ChatStore, chat_id: &ChatId) -> Result<Chat, ChatSessionError> {
    match store.get(chat_id).await {
        Ok(Some(chat)) => Ok(chat),
        Ok(None) => Err(ChatSessionError::ChatNotFound(chat_id.clone())),
        Err(StoreError::StorageCorrupt(reason)) => {
            warn!("Stored chats are unreadable, treating as empty: {}", reason);
            Err(ChatSessionError::ChatNotFound(chat_id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Marks a chat as having a send in flight until dropped.
struct InFlightGuard {
    chats: Arc<Mutex<HashSet<ChatId>>>,
    chat_id: ChatId,
}

impl InFlightGuard {
    fn acquire(
        chats: &Arc<Mutex<HashSet<ChatId>>>,
        chat_id: &ChatId,
    ) -> Result<Self, ChatSessionError> {
        let mut active = chats.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(chat_id.clone()) {
            warn!(chat_id = %chat_id, "Rejected concurrent send");
            return Err(ChatSessionError::SendInProgress(chat_id.clone()));
        }
        Ok(Self {
            chats: chats.clone(),
            chat_id: chat_id.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.chats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ERROR_MESSAGE;
    use crate::ports::completion_gateway::DeltaStream;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use streamchat_domain::{CompletionMessage, Role};

    /// In-memory store that records every successful `put`.
    #[derive(Default)]
    struct RecordingStore {
        chats: Mutex<Vec<Chat>>,
        active: Mutex<Option<ChatId>>,
        puts: Mutex<Vec<Chat>>,
        corrupt: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl RecordingStore {
        fn puts(&self) -> Vec<Chat> {
            self.puts.lock().unwrap().clone()
        }

        fn stored(&self, id: &ChatId) -> Option<Chat> {
            self.chats.lock().unwrap().iter().find(|c| c.id() == id).cloned()
        }
    }

    #[async_trait]
    impl ChatStore for RecordingStore {
        async fn list(&self) -> Result<Vec<Chat>, StoreError> {
            if self.corrupt.load(Ordering::SeqCst) {
                return Err(StoreError::StorageCorrupt("expected array".to_string()));
            }
            Ok(self.chats.lock().unwrap().clone())
        }

        async fn get(&self, id: &ChatId) -> Result<Option<Chat>, StoreError> {
            Ok(self.list().await?.into_iter().find(|c| c.id() == id))
        }

        async fn put(&self, chat: &Chat) -> Result<(), StoreError> {
            chat.validate()?;
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::WriteFailed("quota exceeded".into()));
            }
            let mut chats = self.chats.lock().unwrap();
            match chats.iter_mut().find(|c| c.id() == chat.id()) {
                Some(existing) => *existing = chat.clone(),
                None => chats.push(chat.clone()),
            }
            self.puts.lock().unwrap().push(chat.clone());
            Ok(())
        }

        async fn delete(&self, id: &ChatId) -> Result<(), StoreError> {
            self.chats.lock().unwrap().retain(|c| c.id() != id);
            Ok(())
        }

        async fn clear(&self) -> Result<(), StoreError> {
            self.chats.lock().unwrap().clear();
            Ok(())
        }

        async fn last_active_chat_id(&self) -> Result<Option<ChatId>, StoreError> {
            Ok(self.active.lock().unwrap().clone())
        }

        async fn set_last_active_chat_id(&self, id: Option<&ChatId>) -> Result<(), StoreError> {
            *self.active.lock().unwrap() = id.cloned();
            Ok(())
        }
    }

    /// Gateway that replays scripted delta sequences, one per request.
    #[derive(Default)]
    struct ScriptedGateway {
        scripts: Mutex<VecDeque<Vec<Result<String, GatewayError>>>>,
        requests: Mutex<Vec<Vec<CompletionMessage>>>,
        cancelled: AtomicBool,
    }

    impl ScriptedGateway {
        fn with_script(script: Vec<Result<String, GatewayError>>) -> Self {
            let gateway = Self::default();
            gateway.scripts.lock().unwrap().push_back(script);
            gateway
        }

        fn deltas(deltas: &[&str]) -> Self {
            Self::with_script(deltas.iter().map(|d| Ok(d.to_string())).collect())
        }
    }

    impl CompletionGateway for ScriptedGateway {
        fn stream_completion(&self, history: Vec<CompletionMessage>) -> DeltaStream {
            self.requests.lock().unwrap().push(history);
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            Box::pin(futures::stream::iter(script))
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    fn use_case(
        store: &Arc<RecordingStore>,
        gateway: &Arc<ScriptedGateway>,
    ) -> ChatSessionUseCase {
        ChatSessionUseCase::new(store.clone(), gateway.clone())
    }

    fn status_error() -> GatewayError {
        GatewayError::Status {
            status: 500,
            body: "internal error".to_string(),
        }
    }

    #[tokio::test]
    async fn send_message_accumulates_deltas_and_finalizes() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["Hel", "lo", " world"]));
        let use_case = use_case(&store, &gateway);

        let chat = use_case.create_chat(None).await.unwrap();
        let results: Vec<_> = use_case.send_message(chat.id(), "Hi").collect().await;
        let snapshots: Vec<Chat> = results.into_iter().map(|r| r.unwrap()).collect();

        // user, placeholder, three deltas, final
        assert_eq!(snapshots.len(), 6);

        assert_eq!(snapshots[0].messages().len(), 1);
        assert!(snapshots[0].messages()[0].is_user());

        let placeholder = snapshots[1].last_message().unwrap();
        assert_eq!(placeholder.text(), "");
        assert!(placeholder.is_streaming());

        let texts: Vec<&str> = snapshots[2..5]
            .iter()
            .map(|c| c.last_message().unwrap().text())
            .collect();
        assert_eq!(texts, vec!["Hel", "Hello", "Hello world"]);
        assert!(snapshots[4].last_message().unwrap().is_streaming());

        let last = snapshots[5].last_message().unwrap();
        assert_eq!(last.text(), "Hello world");
        assert!(!last.is_streaming());
        assert!(!last.is_user());

        assert_eq!(store.stored(chat.id()).unwrap(), snapshots[5]);
    }

    #[tokio::test]
    async fn every_snapshot_is_persisted_before_it_is_yielded() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["a", "b"]));
        let use_case = use_case(&store, &gateway);

        let chat = use_case.create_chat(None).await.unwrap();
        let mut stream = use_case.send_message(chat.id(), "go");

        while let Some(snapshot) = stream.next().await {
            let snapshot = snapshot.unwrap();
            assert_eq!(store.puts().last(), Some(&snapshot));
        }
        // create + user + placeholder + 2 deltas + final
        assert_eq!(store.puts().len(), 6);
    }

    #[tokio::test]
    async fn long_first_message_sets_truncated_title() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["ok"]));
        let use_case = use_case(&store, &gateway);

        let chat = use_case.create_chat(None).await.unwrap();
        assert_eq!(chat.title(), "New Chat");

        let message = "Hello there, how are you today friend of mine this is long";
        let results: Vec<_> = use_case.send_message(chat.id(), message).collect().await;
        let last = results.last().unwrap().as_ref().unwrap();

        assert_eq!(last.title(), "Hello there, how are you today friend of mine t...");
        assert_eq!(store.stored(chat.id()).unwrap().title(), last.title());
    }

    #[tokio::test]
    async fn later_messages_do_not_change_title() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["one"]));
        gateway
            .scripts
            .lock()
            .unwrap()
            .push_back(vec![Ok("two".to_string())]);
        let use_case = use_case(&store, &gateway);

        let chat = use_case.create_chat(None).await.unwrap();
        let _: Vec<_> = use_case.send_message(chat.id(), "first").collect().await;
        let results: Vec<_> = use_case.send_message(chat.id(), "second").collect().await;

        let last = results.last().unwrap().as_ref().unwrap();
        assert_eq!(last.title(), "first");
        assert_eq!(last.messages().len(), 4);
    }

    #[tokio::test]
    async fn immediate_transport_failure_appends_one_error_message() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::with_script(vec![Err(status_error())]));
        let use_case = use_case(&store, &gateway);

        let chat = use_case.create_chat(None).await.unwrap();
        let mut stream = use_case.send_message(chat.id(), "Hello");

        let user = stream.next().await.unwrap().unwrap();
        assert_eq!(user.messages().len(), 1);
        let placeholder = stream.next().await.unwrap().unwrap();
        assert_eq!(placeholder.messages().len(), 2);

        let errored = stream.next().await.unwrap().unwrap();
        let errors: Vec<_> = errored.messages().iter().filter(|m| m.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text(), DEFAULT_ERROR_MESSAGE);
        assert_eq!(errored.messages().len(), 3);
        assert!(errored.streaming_message().is_none());

        let failure = stream.next().await.unwrap();
        assert!(matches!(
            failure,
            Err(ChatSessionError::Transport(GatewayError::Status { status: 500, .. }))
        ));
        assert!(stream.next().await.is_none());

        // The error state was persisted before the failure was reported
        assert_eq!(store.stored(chat.id()).unwrap(), errored);
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_reply() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::with_script(vec![
            Ok("Partial ".to_string()),
            Ok("answer".to_string()),
            Err(GatewayError::Connection("reset by peer".to_string())),
        ]));
        let use_case = use_case(&store, &gateway);

        let chat = use_case.create_chat(None).await.unwrap();
        let results: Vec<_> = use_case.send_message(chat.id(), "Tell me").collect().await;

        assert!(results.last().unwrap().as_ref().unwrap_err().is_transport());
        let errored = results[results.len() - 2].as_ref().unwrap();

        let messages = errored.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].text(), "Partial answer");
        assert!(!messages[1].is_error());
        assert!(messages[2].is_error());
    }

    #[tokio::test]
    async fn configured_error_message_is_used() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::with_script(vec![Err(status_error())]));
        let use_case = use_case(&store, &gateway)
            .with_config(ChatConfig::default().with_error_message("Service unavailable"));

        let chat = use_case.create_chat(None).await.unwrap();
        let _: Vec<_> = use_case.send_message(chat.id(), "Hello").collect().await;

        let stored = store.stored(chat.id()).unwrap();
        assert_eq!(stored.last_message().unwrap().text(), "Service unavailable");
    }

    #[tokio::test]
    async fn unknown_chat_fails_without_side_effects() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["never"]));
        let use_case = use_case(&store, &gateway);

        let results: Vec<_> = use_case
            .send_message(&ChatId::new("missing"), "Hello")
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ChatSessionError::ChatNotFound(_))));
        assert!(store.puts().is_empty());
        assert!(gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_excludes_the_placeholder() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["4"]));
        gateway
            .scripts
            .lock()
            .unwrap()
            .push_back(vec![Ok("8".to_string())]);
        let use_case = use_case(&store, &gateway);

        let chat = use_case.create_chat(None).await.unwrap();
        let _: Vec<_> = use_case.send_message(chat.id(), "2+2?").collect().await;
        let _: Vec<_> = use_case.send_message(chat.id(), "4+4?").collect().await;

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], vec![CompletionMessage::user("2+2?")]);

        let roles: Vec<Role> = requests[1].iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(requests[1][1].content, "4");
        assert_eq!(requests[1][2].content, "4+4?");
    }

    #[tokio::test]
    async fn concurrent_send_to_same_chat_is_rejected() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["a"]));
        gateway
            .scripts
            .lock()
            .unwrap()
            .push_back(vec![Ok("b".to_string())]);
        let use_case = use_case(&store, &gateway);
        let chat = use_case.create_chat(None).await.unwrap();

        let mut first = use_case.send_message(chat.id(), "one");
        first.next().await.unwrap().unwrap();

        let second: Vec<_> = use_case.send_message(chat.id(), "two").collect().await;
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0], Err(ChatSessionError::SendInProgress(_))));

        // Dropping the first stream releases the chat
        drop(first);
        let third: Vec<_> = use_case.send_message(chat.id(), "three").collect().await;
        assert!(third.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn sends_to_different_chats_are_independent() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["a"]));
        gateway
            .scripts
            .lock()
            .unwrap()
            .push_back(vec![Ok("b".to_string())]);
        let use_case = use_case(&store, &gateway);
        let one = use_case.create_chat(None).await.unwrap();
        let two = use_case.create_chat(None).await.unwrap();

        let mut first = use_case.send_message(one.id(), "x");
        first.next().await.unwrap().unwrap();
        let second: Vec<_> = use_case.send_message(two.id(), "y").collect().await;
        assert!(second.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn write_failure_ends_the_stream() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["a"]));
        let use_case = use_case(&store, &gateway);
        let chat = use_case.create_chat(None).await.unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        let results: Vec<_> = use_case.send_message(chat.id(), "hi").collect().await;

        assert_eq!(results.len(), 1);
        let error = results[0].as_ref().unwrap_err();
        assert!(matches!(error, ChatSessionError::Store(StoreError::WriteFailed(_))));
        assert!(error.to_string().contains("Failed to save chats to storage"));
    }

    #[tokio::test]
    async fn stream_is_lazy() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["a"]));
        let use_case = use_case(&store, &gateway);
        let chat = use_case.create_chat(None).await.unwrap();

        let stream = use_case.send_message(chat.id(), "hi");
        assert_eq!(store.puts().len(), 1);
        drop(stream);
        assert_eq!(store.stored(chat.id()).unwrap().messages().len(), 0);
    }

    #[tokio::test]
    async fn create_chat_titles_from_first_message() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::default());
        let use_case = use_case(&store, &gateway);

        let chat = use_case.create_chat(Some("Plan a trip")).await.unwrap();
        assert_eq!(chat.title(), "Plan a trip");
        assert!(chat.messages().is_empty());
        assert_eq!(use_case.list_chats().await.unwrap(), vec![chat]);
    }

    #[tokio::test]
    async fn empty_first_message_keeps_default_title() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["ok"]));
        let use_case = use_case(&store, &gateway);

        let created = use_case.create_chat(Some("")).await.unwrap();
        assert_eq!(created.title(), "New Chat");

        let fresh = use_case.create_chat(None).await.unwrap();
        let results: Vec<_> = use_case.send_message(fresh.id(), "").collect().await;
        let last = results.last().unwrap().as_ref().unwrap();

        assert_eq!(last.title(), "New Chat");
        assert_eq!(last.messages()[0].text(), "");
        assert_eq!(last.last_message().unwrap().text(), "ok");
        assert_eq!(store.stored(fresh.id()).unwrap().title(), "New Chat");
    }

    #[tokio::test]
    async fn toggle_pin_and_rename_persist() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::default());
        let use_case = use_case(&store, &gateway);
        let chat = use_case.create_chat(None).await.unwrap();

        let pinned = use_case.toggle_pin(chat.id()).await.unwrap();
        assert!(pinned.pinned());
        assert!(store.stored(chat.id()).unwrap().pinned());

        let renamed = use_case.rename_chat(chat.id(), "  Groceries ").await.unwrap();
        assert_eq!(renamed.title(), "Groceries");
        assert_eq!(store.stored(chat.id()).unwrap().title(), "Groceries");

        assert!(matches!(
            use_case.rename_chat(chat.id(), "   ").await,
            Err(ChatSessionError::InvalidTitle)
        ));
        assert!(matches!(
            use_case.toggle_pin(&ChatId::new("nope")).await,
            Err(ChatSessionError::ChatNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_and_clear_reset_last_active_chat() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::default());
        let use_case = use_case(&store, &gateway);
        let one = use_case.create_chat(Some("one")).await.unwrap();
        let two = use_case.create_chat(Some("two")).await.unwrap();

        use_case.set_last_active_chat_id(one.id()).await.unwrap();
        assert_eq!(use_case.last_active_chat().await.unwrap(), Some(one.clone()));

        use_case.delete_chat(one.id()).await.unwrap();
        assert_eq!(use_case.last_active_chat_id().await.unwrap(), None);
        assert_eq!(use_case.list_chats().await.unwrap(), vec![two.clone()]);

        // Deleting an unknown id is a no-op
        use_case.delete_chat(&ChatId::new("ghost")).await.unwrap();

        use_case.set_last_active_chat_id(two.id()).await.unwrap();
        use_case.clear_all_chats().await.unwrap();
        assert!(use_case.list_chats().await.unwrap().is_empty());
        assert_eq!(use_case.last_active_chat_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_last_active_requires_existing_chat() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::default());
        let use_case = use_case(&store, &gateway);

        let result = use_case.set_last_active_chat_id(&ChatId::new("ghost")).await;
        assert!(matches!(result, Err(ChatSessionError::ChatNotFound(_))));
    }

    #[tokio::test]
    async fn corrupt_store_lists_as_empty() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::default());
        let use_case = use_case(&store, &gateway);
        let chat = use_case.create_chat(None).await.unwrap();

        store.corrupt.store(true, Ordering::SeqCst);
        assert!(use_case.list_chats().await.unwrap().is_empty());

        let results: Vec<_> = use_case.send_message(chat.id(), "hi").collect().await;
        assert!(matches!(results[0], Err(ChatSessionError::ChatNotFound(_))));
    }

    #[tokio::test]
    async fn cancel_delegates_to_gateway() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::default());
        let use_case = use_case(&store, &gateway);

        use_case.cancel();
        assert!(gateway.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stream_ending_early_finalizes_partial_reply() {
        // A cancelled transport simply ends its stream
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(ScriptedGateway::deltas(&["half"]));
        let use_case = use_case(&store, &gateway);
        let chat = use_case.create_chat(None).await.unwrap();

        let results: Vec<_> = use_case.send_message(chat.id(), "hi").collect().await;
        let last = results.last().unwrap().as_ref().unwrap();
        assert_eq!(last.last_message().unwrap().text(), "half");
        assert!(last.streaming_message().is_none());
        assert!(last.messages().iter().all(|m| !m.is_error()));
    }
}
