//! Conversation lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use super::history::build_api_messages;
use super::renderer::{render_with_timeout, ContentRenderer, MarkdownRenderer};
use crate::api::{ApiClient, CompletionResponse, RequestOptions};
use crate::error::{AppError, ChatError, ConfigError, ErrorContext, ResultExt};
use crate::events::{topics, Event, EventBus, HandlerResult, Subscription};
use crate::models::{derive_title, Chat, FileAttachment, Message, Preferences};
use crate::sse::StreamProgress;
use crate::storage::{StorageService, LAST_ACTIVE_CHAT_KEY};
use crate::store::reducers::{
    add_chat_action, add_error_action, add_message_action, delete_chat_action,
    mark_chat_saved_action, set_chat_title_action, set_chats_action, set_current_chat_action,
    set_processing_action, simple_action, stream_content_action, stream_started_action,
    stream_thinking_action, truncate_messages_action, update_message_action,
    CLEAR_ATTACHED_FILES, REQUEST_FINISHED, REQUEST_STARTED, STREAM_FINISHED,
};
use crate::store::{AppState, ErrorRecord, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub auto_save_interval: Duration,
    pub render_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            auto_save_interval: Duration::from_secs(30),
            render_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    /// Attachments for this message. Defaults to the snapshot's
    /// `attached_files`, which are then cleared.
    pub files: Option<Vec<FileAttachment>>,
}

impl SendOptions {
    pub fn with_files(files: Vec<FileAttachment>) -> Self {
        Self { files: Some(files) }
    }
}

struct Inner {
    store: Store<AppState>,
    storage: StorageService,
    api: Arc<ApiClient>,
    bus: EventBus,
    renderer: Arc<dyn ContentRenderer>,
    config: CoordinatorConfig,
    sending: AtomicBool,
    auto_save: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Clears the in-flight flag when a send finishes, however it finishes.
struct SendGuard<'a>(&'a AtomicBool);

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates chats: creation, selection, deletion, sending, editing
/// and regeneration, plus persistence of the results.
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct ChatCoordinator {
    inner: Arc<Inner>,
}

impl ChatCoordinator {
    pub fn new(
        store: Store<AppState>,
        storage: StorageService,
        api: Arc<ApiClient>,
        bus: EventBus,
    ) -> Self {
        Self::with_parts(
            store,
            storage,
            api,
            bus,
            Arc::new(MarkdownRenderer),
            CoordinatorConfig::default(),
        )
    }

    pub fn with_parts(
        store: Store<AppState>,
        storage: StorageService,
        api: Arc<ApiClient>,
        bus: EventBus,
        renderer: Arc<dyn ContentRenderer>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                storage,
                api,
                bus,
                renderer,
                config,
                sending: AtomicBool::new(false),
                auto_save: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub fn store(&self) -> &Store<AppState> {
        &self.inner.store
    }

    pub fn storage(&self) -> &StorageService {
        &self.inner.storage
    }

    pub fn current_chat(&self) -> Option<Arc<Chat>> {
        self.inner.store.get_state().current_chat().cloned()
    }

    /// Whether a send, edit or regeneration is in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.sending.load(Ordering::SeqCst)
    }

    fn dispatch(&self, action: crate::store::PlainAction) -> Arc<AppState> {
        self.inner.store.dispatch_plain(action)
    }

    fn emit(&self, topic: &str, payload: Value) {
        self.inner.bus.emit(topic, payload);
    }

    fn begin_send(&self) -> Result<SendGuard<'_>, ChatError> {
        if self.inner.sending.swap(true, Ordering::SeqCst) {
            return Err(ChatError::Busy);
        }
        Ok(SendGuard(&self.inner.sending))
    }

    fn require_current(&self) -> Result<Arc<Chat>, ChatError> {
        self.current_chat().ok_or(ChatError::NoActiveChat)
    }

    fn require_api_key(&self) -> Result<(), ConfigError> {
        if self.inner.api.has_api_key() {
            Ok(())
        } else {
            Err(ConfigError::MissingApiKey)
        }
    }

    async fn remember_active(&self, chat_id: Option<&str>) {
        let storage = &self.inner.storage;
        match chat_id {
            Some(id) => {
                storage.set(LAST_ACTIVE_CHAT_KEY, json!(id)).await;
            }
            None => {
                storage
                    .remove_item(LAST_ACTIVE_CHAT_KEY, crate::storage::collections::KEY_VALUE)
                    .await;
            }
        }
    }

    /// Write a chat to storage and clear its dirty flag.
    async fn persist(&self, chat_id: &str) -> bool {
        let Some(chat) = self.inner.store.get_state().chat(chat_id).cloned() else {
            return false;
        };
        if !self.inner.storage.save_chat(&chat).await {
            tracing::warn!("Chat {} was not saved", chat_id);
            return false;
        }
        self.dispatch(mark_chat_saved_action(chat_id));
        self.emit(topics::CHAT_SAVED, json!({ "chatId": chat_id }));
        true
    }

    /// Start an empty chat and make it current.
    pub async fn create_new_chat(&self) -> Arc<Chat> {
        let chat = Chat::new();
        tracing::info!("Creating chat {}", chat.id);
        self.dispatch(add_chat_action(&chat));
        self.dispatch(set_current_chat_action(Some(&chat.id)));
        self.persist(&chat.id).await;
        self.remember_active(Some(&chat.id)).await;
        self.emit(topics::CHAT_CREATED, json!({ "chatId": chat.id }));

        self.inner
            .store
            .get_state()
            .chat(&chat.id)
            .cloned()
            .unwrap_or_else(|| Arc::new(chat))
    }

    pub async fn load_chat(&self, chat_id: &str) -> Result<Arc<Chat>, AppError> {
        let state = self.inner.store.get_state();
        let Some(chat) = state.chat(chat_id).cloned() else {
            return Err(ChatError::NotFound {
                chat_id: chat_id.to_string(),
            }
            .into());
        };
        self.dispatch(set_current_chat_action(Some(chat_id)));
        self.remember_active(Some(chat_id)).await;
        self.emit(
            topics::CHAT_LOADED,
            json!({ "chatId": chat_id, "messageCount": chat.messages.len() }),
        );
        Ok(chat)
    }

    /// Remove a chat everywhere. When it was current, the newest remaining
    /// chat takes its place.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), AppError> {
        if self.inner.store.get_state().chat(chat_id).is_none() {
            return Err(ChatError::NotFound {
                chat_id: chat_id.to_string(),
            }
            .into());
        }
        let was_current = self.current_chat().is_some_and(|c| c.id == chat_id);
        let state = self.dispatch(delete_chat_action(chat_id));
        self.inner.storage.delete_chat(chat_id).await;
        if was_current {
            self.remember_active(state.current_chat_id.as_deref()).await;
        }
        tracing::info!("Deleted chat {}", chat_id);
        self.emit(
            topics::CHAT_DELETED,
            json!({ "chatId": chat_id, "currentChatId": state.current_chat_id }),
        );
        Ok(())
    }

    /// Append a human message to the current chat and request a reply.
    ///
    /// A failed request still resolves the turn: an error message is
    /// appended to the chat and the error is returned.
    pub async fn send_message(&self, content: &str, options: SendOptions) -> Result<Message, AppError> {
        let chat = self.require_current()?;
        let state = self.inner.store.get_state();
        let (files, from_snapshot) = match options.files {
            Some(files) => (files, false),
            None => (state.attached_files.clone(), true),
        };
        if content.trim().is_empty() && files.is_empty() {
            return Err(ChatError::EmptyMessage.into());
        }
        let _guard = self.begin_send()?;

        let message = Message::human(content, files);
        self.dispatch(add_message_action(&chat.id, &message));
        if from_snapshot && !state.attached_files.is_empty() {
            self.dispatch(simple_action(CLEAR_ATTACHED_FILES));
        }
        if chat.messages.is_empty() {
            self.dispatch(set_chat_title_action(&chat.id, &derive_title(content)));
        }
        self.persist(&chat.id).await;

        self.request_completion(&chat.id, None).await
    }

    /// Replace a human message's content, drop everything after it and
    /// ask for a new reply.
    pub async fn edit_message(&self, message_id: &str, new_content: &str) -> Result<Message, AppError> {
        let chat = self.require_current()?;
        let index = chat
            .message_index(message_id)
            .ok_or_else(|| ChatError::MessageNotFound {
                message_id: message_id.to_string(),
            })?;
        let original = &chat.messages[index];
        if !original.is_human() {
            return Err(ChatError::InvalidRole {
                message_id: message_id.to_string(),
                expected: "human",
            }
            .into());
        }
        if new_content.trim().is_empty() && original.files.is_empty() {
            return Err(ChatError::EmptyMessage.into());
        }
        let _guard = self.begin_send()?;

        let edited = original.edited(new_content);
        self.dispatch(update_message_action(&chat.id, &edited));
        self.dispatch(truncate_messages_action(&chat.id, index + 1));
        if index == 0 {
            self.dispatch(set_chat_title_action(&chat.id, &derive_title(new_content)));
        }
        self.persist(&chat.id).await;

        self.request_completion(&chat.id, None).await
    }

    /// Replace an assistant reply with a fresh one for the human turn
    /// before it.
    pub async fn regenerate_message(&self, message_id: &str) -> Result<Message, AppError> {
        let chat = self.require_current()?;
        let index = chat
            .message_index(message_id)
            .ok_or_else(|| ChatError::MessageNotFound {
                message_id: message_id.to_string(),
            })?;
        if !chat.messages[index].is_assistant() {
            return Err(ChatError::InvalidRole {
                message_id: message_id.to_string(),
                expected: "assistant",
            }
            .into());
        }
        let human = chat
            .preceding_human_index(index)
            .ok_or_else(|| ChatError::NoPrecedingHumanMessage {
                message_id: message_id.to_string(),
            })?;
        let _guard = self.begin_send()?;

        self.dispatch(truncate_messages_action(&chat.id, index));
        self.persist(&chat.id).await;

        self.request_completion(&chat.id, Some(human + 1)).await
    }

    fn request_options(preferences: &Preferences) -> RequestOptions {
        let mut options = RequestOptions::new()
            .with_model(preferences.model.clone())
            .with_max_tokens(preferences.max_tokens)
            .with_temperature(preferences.temperature)
            .with_system(preferences.system_prompt.clone())
            .streaming(preferences.streaming);
        if preferences.thinking_enabled {
            options = options.with_thinking(preferences.thinking_budget);
        }
        options
    }

    /// Ask for a reply to the chat's first `history_len` messages (all of
    /// them when `None`) and append the outcome.
    async fn request_completion(
        &self,
        chat_id: &str,
        history_len: Option<usize>,
    ) -> Result<Message, AppError> {
        let state = self.inner.store.get_state();
        let Some(chat) = state.chat(chat_id).cloned() else {
            return Err(ChatError::NotFound {
                chat_id: chat_id.to_string(),
            }
            .into());
        };
        let preferences = state.preferences.clone();
        let end = history_len.unwrap_or(chat.messages.len()).min(chat.messages.len());
        let history = build_api_messages(&chat.messages[..end]);
        let options = Self::request_options(&preferences);

        self.dispatch(set_processing_action(true));
        self.dispatch(simple_action(REQUEST_STARTED));
        self.emit(topics::ASSISTANT_THINKING, json!({ "chatId": chat_id }));

        // A missing key is answered in the chat like any other failure.
        let result = if let Err(err) = self.require_api_key() {
            Err(AppError::from(err))
        } else if preferences.streaming {
            self.dispatch(stream_started_action(chat_id));
            let store = self.inner.store.clone();
            let bus = self.inner.bus.clone();
            let id = chat_id.to_string();
            self.inner
                .api
                .stream_message(history, options, move |progress| match progress {
                    StreamProgress::Content { delta, content } => {
                        store.dispatch_plain(stream_content_action(&content));
                        bus.emit(
                            topics::ASSISTANT_STREAMING,
                            json!({ "chatId": id, "delta": delta, "content": content }),
                        );
                    }
                    StreamProgress::Thinking { delta } => {
                        store.dispatch_plain(stream_thinking_action());
                        bus.emit(
                            topics::ASSISTANT_THINKING,
                            json!({ "chatId": id, "delta": delta }),
                        );
                    }
                })
                .await
        } else {
            self.inner.api.send_message(history, options).await
        };
        let result = result.with_context(|| {
            ErrorContext::new("request_completion")
                .with_chat_id(chat_id)
                .with_component("chat")
        });

        self.dispatch(simple_action(STREAM_FINISHED));
        self.dispatch(simple_action(REQUEST_FINISHED));

        let outcome = match result {
            Ok(response) => {
                let stop_reason = response.stop_reason.clone();
                let reply = self.assistant_message(response, &preferences).await;
                self.dispatch(add_message_action(chat_id, &reply));
                self.emit(
                    topics::ASSISTANT_RESPONDED,
                    json!({
                        "chatId": chat_id,
                        "messageId": reply.id,
                        "stopReason": stop_reason,
                    }),
                );
                Ok(reply)
            }
            Err(err) => {
                tracing::error!("Completion for chat {} failed: {}", chat_id, err);
                let explanation = err.user_message();
                self.dispatch(add_message_action(chat_id, &Message::error(&explanation)));
                self.dispatch(add_error_action(&ErrorRecord::new(
                    explanation.clone(),
                    err.error_code(),
                    "chat",
                )));
                self.emit(
                    topics::ASSISTANT_ERROR,
                    json!({
                        "chatId": chat_id,
                        "code": err.error_code(),
                        "message": explanation,
                    }),
                );
                Err(err)
            }
        };

        self.dispatch(set_processing_action(false));
        self.persist(chat_id).await;
        outcome
    }

    async fn assistant_message(&self, response: CompletionResponse, preferences: &Preferences) -> Message {
        let model = response.model.or_else(|| Some(preferences.model.clone()));
        let raw = response.content;
        if !preferences.markdown_enabled {
            return Message::assistant(raw, model);
        }
        let rendered = render_with_timeout(
            self.inner.renderer.clone(),
            raw.clone(),
            self.inner.config.render_timeout,
        )
        .await;
        match rendered {
            Some(html) => {
                let mut message = Message::assistant(html, model);
                message.raw_content = Some(raw);
                message
            }
            None => Message::assistant(raw, model),
        }
    }

    /// Persist the current chat. Returns whether it was written.
    pub async fn save_current_chat(&self) -> bool {
        match self.current_chat() {
            Some(chat) => self.persist(&chat.id).await,
            None => false,
        }
    }

    /// Load saved chats and reopen the last active one, creating a chat
    /// when there is none.
    pub async fn initialize(&self) -> Arc<AppState> {
        let chats = self.inner.storage.load_chats().await;
        tracing::info!("Loaded {} chats", chats.len());
        self.dispatch(set_chats_action(&chats));

        let last_active = self
            .inner
            .storage
            .get(LAST_ACTIVE_CHAT_KEY)
            .await
            .and_then(|v| v.as_str().map(str::to_string));
        let state = self.inner.store.get_state();
        let reopen = last_active
            .filter(|id| state.chat(id).is_some())
            .or_else(|| state.chats.first().map(|c| c.id.clone()));

        match reopen {
            Some(id) => {
                self.dispatch(set_current_chat_action(Some(&id)));
            }
            None => {
                self.create_new_chat().await;
            }
        }
        self.inner.store.get_state()
    }

    async fn save_dirty_chats(&self) -> usize {
        let dirty: Vec<String> = self
            .inner
            .store
            .get_state()
            .chats
            .iter()
            .filter(|c| c.dirty)
            .map(|c| c.id.clone())
            .collect();
        let mut saved = 0;
        for id in dirty {
            if self.persist(&id).await {
                saved += 1;
            }
        }
        saved
    }

    fn lock_auto_save(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.auto_save.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Save dirty chats every `auto_save_interval`.
    pub fn start_auto_save(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.auto_save_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let saved = ChatCoordinator::from_inner(inner).save_dirty_chats().await;
                if saved > 0 {
                    tracing::debug!("Auto-saved {} chats", saved);
                }
            }
        });
        if let Some(previous) = self.lock_auto_save().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_auto_save(&self) {
        if let Some(handle) = self.lock_auto_save().take() {
            handle.abort();
        }
    }

    /// Stop background work and flush the current chat if it has unsaved
    /// changes.
    pub async fn shutdown(&self) {
        self.stop_auto_save();
        let subscriptions: Vec<Subscription> = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        if let Some(chat) = self.current_chat() {
            if chat.dirty {
                self.persist(&chat.id).await;
            }
        }
        tracing::info!("Chat coordinator shut down");
    }

    /// Handle the chat commands published on `bus`.
    ///
    /// Each command runs on its own task; its outcome is announced through
    /// the usual produced events.
    pub fn attach(&self, bus: &EventBus) {
        let subscriptions = vec![
            self.route(bus, topics::CHAT_NEW, |c, _| async move {
                c.create_new_chat().await;
                Ok(())
            }),
            self.route(bus, topics::CHAT_LOAD, |c, p| async move {
                c.load_chat(&str_field(&p, "chatId")?).await.map(|_| ())
            }),
            self.route(bus, topics::CHAT_DELETE, |c, p| async move {
                c.delete_chat(&str_field(&p, "chatId")?).await
            }),
            self.route(bus, topics::CHAT_SEND, |c, p| async move {
                let content = str_field(&p, "content")?;
                let files = p
                    .get("files")
                    .cloned()
                    .map(serde_json::from_value::<Vec<FileAttachment>>)
                    .transpose()?;
                c.send_message(&content, SendOptions { files }).await.map(|_| ())
            }),
            self.route(bus, topics::MESSAGE_EDIT, |c, p| async move {
                let id = str_field(&p, "messageId")?;
                c.edit_message(&id, &str_field(&p, "content")?).await.map(|_| ())
            }),
            self.route(bus, topics::MESSAGE_REGENERATE, |c, p| async move {
                c.regenerate_message(&str_field(&p, "messageId")?).await.map(|_| ())
            }),
        ];
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(subscriptions);
    }

    fn route<F, Fut>(&self, bus: &EventBus, topic: &'static str, command: F) -> Subscription
    where
        F: Fn(ChatCoordinator, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let command = Arc::new(command);
        bus.subscribe(topic, move |event: &Event| -> HandlerResult {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let handle = tokio::runtime::Handle::try_current()?;
            let command = command.clone();
            let payload = event.payload.clone();
            handle.spawn(async move {
                if let Err(e) = command(ChatCoordinator::from_inner(inner), payload).await {
                    tracing::warn!("{} failed: {}", topic, e);
                }
            });
            Ok(())
        })
    }
}

fn str_field(payload: &Value, key: &str) -> Result<String, AppError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::Effect {
            message: format!("command payload is missing '{}'", key),
        })
}
