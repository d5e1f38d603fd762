//! Application reducers and action constructors.
//!
//! Every reducer is pure: it reads the previous snapshot and the payload
//! and returns the next snapshot. A malformed payload is logged and the
//! previous state is returned unchanged.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::action::PlainAction;
use super::state::{AppState, ErrorRecord, NetworkStatus, StreamingState, MAX_ERROR_HISTORY};
use super::StoreBuilder;
use crate::models::{Chat, FileAttachment, Message};

pub const ADD_CHAT: &str = "ADD_CHAT";
pub const SET_CHATS: &str = "SET_CHATS";
pub const SET_CURRENT_CHAT: &str = "SET_CURRENT_CHAT";
pub const DELETE_CHAT: &str = "DELETE_CHAT";
pub const ADD_MESSAGE: &str = "ADD_MESSAGE";
pub const UPDATE_MESSAGE: &str = "UPDATE_MESSAGE";
pub const TRUNCATE_MESSAGES: &str = "TRUNCATE_MESSAGES";
pub const SET_CHAT_TITLE: &str = "SET_CHAT_TITLE";
pub const MARK_CHAT_SAVED: &str = "MARK_CHAT_SAVED";
pub const SET_PROCESSING: &str = "SET_PROCESSING";
pub const SET_PREFERENCES: &str = "SET_PREFERENCES";
pub const SET_NETWORK_STATUS: &str = "SET_NETWORK_STATUS";
pub const REQUEST_STARTED: &str = "REQUEST_STARTED";
pub const REQUEST_FINISHED: &str = "REQUEST_FINISHED";
pub const ADD_ERROR: &str = "ADD_ERROR";
pub const CLEAR_ERRORS: &str = "CLEAR_ERRORS";
pub const ATTACH_FILE: &str = "ATTACH_FILE";
pub const REMOVE_ATTACHED_FILE: &str = "REMOVE_ATTACHED_FILE";
pub const CLEAR_ATTACHED_FILES: &str = "CLEAR_ATTACHED_FILES";
pub const STREAM_STARTED: &str = "STREAM_STARTED";
pub const STREAM_DELTA: &str = "STREAM_DELTA";
pub const STREAM_FINISHED: &str = "STREAM_FINISHED";
pub const SET_RECOVERY_MODE: &str = "SET_RECOVERY_MODE";
pub const RESET_STATE: &str = "RESET_STATE";

/// Register every app reducer on `builder`.
pub fn register(builder: StoreBuilder<AppState>) -> StoreBuilder<AppState> {
    builder
        .reducer(ADD_CHAT, add_chat)
        .reducer(SET_CHATS, set_chats)
        .reducer(SET_CURRENT_CHAT, set_current_chat)
        .reducer(DELETE_CHAT, delete_chat)
        .reducer(ADD_MESSAGE, add_message)
        .reducer(UPDATE_MESSAGE, update_message)
        .reducer(TRUNCATE_MESSAGES, truncate_messages)
        .reducer(SET_CHAT_TITLE, set_chat_title)
        .reducer(MARK_CHAT_SAVED, mark_chat_saved)
        .reducer(SET_PROCESSING, set_processing)
        .reducer(SET_PREFERENCES, set_preferences)
        .reducer(SET_NETWORK_STATUS, set_network_status)
        .reducer(REQUEST_STARTED, request_started)
        .reducer(REQUEST_FINISHED, request_finished)
        .reducer(ADD_ERROR, add_error)
        .reducer(CLEAR_ERRORS, clear_errors)
        .reducer(ATTACH_FILE, attach_file)
        .reducer(REMOVE_ATTACHED_FILE, remove_attached_file)
        .reducer(CLEAR_ATTACHED_FILES, clear_attached_files)
        .reducer(STREAM_STARTED, stream_started)
        .reducer(STREAM_DELTA, stream_delta)
        .reducer(STREAM_FINISHED, stream_finished)
        .reducer(SET_RECOVERY_MODE, set_recovery_mode)
        .reducer(RESET_STATE, reset_state)
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn field<T: DeserializeOwned>(payload: &Value, key: &str) -> Option<T> {
    let value = payload.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Malformed '{}' in action payload: {}", key, e);
            None
        }
    }
}

fn parse<T: DeserializeOwned>(payload: &Value, action: &str) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Malformed {} payload: {}", action, e);
            None
        }
    }
}

/// Clone `state` and apply `f` to the chat with `chat_id`, copying only
/// that chat. Unknown ids leave the state unchanged.
fn with_chat(state: &AppState, chat_id: &str, f: impl FnOnce(&mut Chat)) -> AppState {
    let mut next = state.clone();
    match next.chats.iter_mut().find(|c| c.id == chat_id) {
        Some(chat) => f(Arc::make_mut(chat)),
        None => tracing::warn!("Action targets unknown chat {}", chat_id),
    }
    next
}

// Chats

fn add_chat(state: &AppState, payload: &Value) -> AppState {
    let Some(chat) = parse::<Chat>(payload, ADD_CHAT) else {
        return state.clone();
    };
    let mut next = state.clone();
    next.chats.retain(|c| c.id != chat.id);
    next.chats.insert(0, Arc::new(chat));
    next
}

fn set_chats(state: &AppState, payload: &Value) -> AppState {
    let Some(chats) = parse::<Vec<Chat>>(payload, SET_CHATS) else {
        return state.clone();
    };
    let mut next = state.clone();
    next.chats = chats.into_iter().map(Arc::new).collect();
    if let Some(id) = &next.current_chat_id {
        if next.chat(id).is_none() {
            next.current_chat_id = None;
        }
    }
    next
}

fn set_current_chat(state: &AppState, payload: &Value) -> AppState {
    let chat_id = payload.get("chatId").and_then(Value::as_str);
    if let Some(id) = chat_id {
        if state.chat(id).is_none() {
            tracing::warn!("SET_CURRENT_CHAT for unknown chat {}", id);
            return state.clone();
        }
    }
    AppState {
        current_chat_id: chat_id.map(str::to_string),
        ..state.clone()
    }
}

fn delete_chat(state: &AppState, payload: &Value) -> AppState {
    let Some(chat_id) = field::<String>(payload, "chatId") else {
        return state.clone();
    };
    let mut next = state.clone();
    next.chats.retain(|c| c.id != chat_id);
    if next.current_chat_id.as_deref() == Some(chat_id.as_str()) {
        next.current_chat_id = next.chats.first().map(|c| c.id.clone());
    }
    next
}

// Messages

fn add_message(state: &AppState, payload: &Value) -> AppState {
    let (Some(chat_id), Some(message)) = (
        field::<String>(payload, "chatId"),
        field::<Message>(payload, "message"),
    ) else {
        return state.clone();
    };
    with_chat(state, &chat_id, |chat| {
        chat.updated_at = message.timestamp;
        chat.messages.push(message);
        chat.dirty = true;
    })
}

fn update_message(state: &AppState, payload: &Value) -> AppState {
    let (Some(chat_id), Some(message)) = (
        field::<String>(payload, "chatId"),
        field::<Message>(payload, "message"),
    ) else {
        return state.clone();
    };
    with_chat(state, &chat_id, |chat| {
        match chat.messages.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                chat.updated_at = message.edited_at.unwrap_or(message.timestamp);
                *slot = message;
                chat.dirty = true;
            }
            None => tracing::warn!("UPDATE_MESSAGE for unknown message {}", message.id),
        }
    })
}

fn truncate_messages(state: &AppState, payload: &Value) -> AppState {
    let (Some(chat_id), Some(from)) = (
        field::<String>(payload, "chatId"),
        field::<usize>(payload, "fromIndex"),
    ) else {
        return state.clone();
    };
    with_chat(state, &chat_id, |chat| {
        if from < chat.messages.len() {
            chat.messages.truncate(from);
            chat.dirty = true;
        }
    })
}

fn set_chat_title(state: &AppState, payload: &Value) -> AppState {
    let (Some(chat_id), Some(title)) = (
        field::<String>(payload, "chatId"),
        field::<String>(payload, "title"),
    ) else {
        return state.clone();
    };
    with_chat(state, &chat_id, |chat| {
        if chat.title != title {
            chat.title = title;
            chat.dirty = true;
        }
    })
}

fn mark_chat_saved(state: &AppState, payload: &Value) -> AppState {
    let Some(chat_id) = field::<String>(payload, "chatId") else {
        return state.clone();
    };
    match state.chat(&chat_id) {
        Some(chat) if chat.dirty => with_chat(state, &chat_id, |chat| chat.dirty = false),
        _ => state.clone(),
    }
}

// Flags and settings

fn set_processing(state: &AppState, payload: &Value) -> AppState {
    match payload.as_bool() {
        Some(value) => AppState {
            is_processing: value,
            ..state.clone()
        },
        None => {
            tracing::warn!("Malformed {} payload: expected bool", SET_PROCESSING);
            state.clone()
        }
    }
}

fn set_preferences(state: &AppState, payload: &Value) -> AppState {
    if !payload.is_object() {
        tracing::warn!("Malformed {} payload: expected object", SET_PREFERENCES);
        return state.clone();
    }
    AppState {
        preferences: state.preferences.merged(payload),
        ..state.clone()
    }
}

fn set_network_status(state: &AppState, payload: &Value) -> AppState {
    let Some(online) = field::<bool>(payload, "online") else {
        return state.clone();
    };
    AppState {
        network_status: if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        },
        ..state.clone()
    }
}

fn request_started(state: &AppState, _payload: &Value) -> AppState {
    AppState {
        pending_requests: state.pending_requests.saturating_add(1),
        ..state.clone()
    }
}

fn request_finished(state: &AppState, _payload: &Value) -> AppState {
    AppState {
        pending_requests: state.pending_requests.saturating_sub(1),
        ..state.clone()
    }
}

fn add_error(state: &AppState, payload: &Value) -> AppState {
    let Some(record) = parse::<ErrorRecord>(payload, ADD_ERROR) else {
        return state.clone();
    };
    let mut next = state.clone();
    next.errors.push(record.clone());
    if next.errors.len() > MAX_ERROR_HISTORY {
        let excess = next.errors.len() - MAX_ERROR_HISTORY;
        next.errors.drain(..excess);
    }
    next.last_error = Some(record);
    next
}

fn clear_errors(state: &AppState, _payload: &Value) -> AppState {
    AppState {
        errors: Vec::new(),
        last_error: None,
        ..state.clone()
    }
}

// Attachments

fn attach_file(state: &AppState, payload: &Value) -> AppState {
    let Some(file) = parse::<FileAttachment>(payload, ATTACH_FILE) else {
        return state.clone();
    };
    let mut next = state.clone();
    next.attached_files.push(file);
    next
}

fn remove_attached_file(state: &AppState, payload: &Value) -> AppState {
    let Some(name) = field::<String>(payload, "name") else {
        return state.clone();
    };
    let mut next = state.clone();
    if let Some(index) = next.attached_files.iter().position(|f| f.name == name) {
        next.attached_files.remove(index);
    }
    next
}

fn clear_attached_files(state: &AppState, _payload: &Value) -> AppState {
    AppState {
        attached_files: Vec::new(),
        ..state.clone()
    }
}

// Streaming

fn stream_started(state: &AppState, payload: &Value) -> AppState {
    let Some(chat_id) = field::<String>(payload, "chatId") else {
        return state.clone();
    };
    AppState {
        streaming: Some(StreamingState {
            chat_id,
            content: String::new(),
            thinking: false,
        }),
        ..state.clone()
    }
}

fn stream_delta(state: &AppState, payload: &Value) -> AppState {
    let Some(current) = &state.streaming else {
        tracing::debug!("{} without an active stream", STREAM_DELTA);
        return state.clone();
    };
    let mut streaming = current.clone();
    if let Some(content) = payload.get("content").and_then(Value::as_str) {
        streaming.content = content.to_string();
        streaming.thinking = false;
    }
    if let Some(thinking) = payload.get("thinking").and_then(Value::as_bool) {
        streaming.thinking = thinking;
    }
    AppState {
        streaming: Some(streaming),
        ..state.clone()
    }
}

fn stream_finished(state: &AppState, _payload: &Value) -> AppState {
    AppState {
        streaming: None,
        ..state.clone()
    }
}

// Recovery

fn set_recovery_mode(state: &AppState, payload: &Value) -> AppState {
    AppState {
        recovery_mode: payload.as_bool().unwrap_or(false),
        ..state.clone()
    }
}

/// Back to a clean slate. Preferences and the chat list survive; transient
/// flags, errors, attachments and any in-flight stream are dropped.
fn reset_state(state: &AppState, _payload: &Value) -> AppState {
    AppState {
        chats: state.chats.clone(),
        current_chat_id: state.current_chat_id.clone(),
        preferences: state.preferences.clone(),
        network_status: state.network_status,
        ..AppState::default()
    }
}

// Action constructors

pub fn add_chat_action(chat: &Chat) -> PlainAction {
    PlainAction::new(ADD_CHAT, to_payload(chat))
}

pub fn set_chats_action(chats: &[Chat]) -> PlainAction {
    PlainAction::new(SET_CHATS, to_payload(&chats))
}

pub fn set_current_chat_action(chat_id: Option<&str>) -> PlainAction {
    PlainAction::new(SET_CURRENT_CHAT, json!({ "chatId": chat_id }))
}

pub fn delete_chat_action(chat_id: &str) -> PlainAction {
    PlainAction::new(DELETE_CHAT, json!({ "chatId": chat_id }))
}

pub fn add_message_action(chat_id: &str, message: &Message) -> PlainAction {
    PlainAction::new(
        ADD_MESSAGE,
        json!({ "chatId": chat_id, "message": to_payload(message) }),
    )
}

pub fn update_message_action(chat_id: &str, message: &Message) -> PlainAction {
    PlainAction::new(
        UPDATE_MESSAGE,
        json!({ "chatId": chat_id, "message": to_payload(message) }),
    )
}

pub fn truncate_messages_action(chat_id: &str, from_index: usize) -> PlainAction {
    PlainAction::new(
        TRUNCATE_MESSAGES,
        json!({ "chatId": chat_id, "fromIndex": from_index }),
    )
}

pub fn set_chat_title_action(chat_id: &str, title: &str) -> PlainAction {
    PlainAction::new(SET_CHAT_TITLE, json!({ "chatId": chat_id, "title": title }))
}

pub fn mark_chat_saved_action(chat_id: &str) -> PlainAction {
    PlainAction::new(MARK_CHAT_SAVED, json!({ "chatId": chat_id }))
}

pub fn set_processing_action(value: bool) -> PlainAction {
    PlainAction::new(SET_PROCESSING, Value::Bool(value))
}

pub fn set_preferences_action(partial: Value) -> PlainAction {
    PlainAction::new(SET_PREFERENCES, partial)
}

pub fn set_network_status_action(online: bool) -> PlainAction {
    PlainAction::new(SET_NETWORK_STATUS, json!({ "online": online }))
}

pub fn add_error_action(record: &ErrorRecord) -> PlainAction {
    PlainAction::new(ADD_ERROR, to_payload(record))
}

pub fn attach_file_action(file: &FileAttachment) -> PlainAction {
    PlainAction::new(ATTACH_FILE, to_payload(file))
}

pub fn stream_started_action(chat_id: &str) -> PlainAction {
    PlainAction::new(STREAM_STARTED, json!({ "chatId": chat_id }))
}

pub fn stream_content_action(content: &str) -> PlainAction {
    PlainAction::new(STREAM_DELTA, json!({ "content": content }))
}

pub fn stream_thinking_action() -> PlainAction {
    PlainAction::new(STREAM_DELTA, json!({ "thinking": true }))
}

pub fn set_recovery_mode_action(value: bool) -> PlainAction {
    PlainAction::new(SET_RECOVERY_MODE, Value::Bool(value))
}

pub fn simple_action(action_type: &str) -> PlainAction {
    PlainAction::new(action_type, Value::Null)
}
