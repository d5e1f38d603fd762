//! Where a failure happened: the operation, and the chat or message it
//! concerned.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    /// Name of the failing operation, e.g. `request_completion`.
    pub operation: String,
    pub chat_id: Option<String>,
    /// Message being edited or regenerated.
    pub message_id: Option<String>,
    /// Area that raised the error (`chat`, `storage`, `api`).
    pub component: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            chat_id: None,
            message_id: None,
            component: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Set identifiers as `key=value` pairs, operation first.
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![("operation", self.operation.as_str())];
        let optional = [
            ("component", &self.component),
            ("chat", &self.chat_id),
            ("message", &self.message_id),
        ];
        fields.extend(
            optional
                .into_iter()
                .filter_map(|(key, value)| value.as_deref().map(|v| (key, v))),
        );
        fields
    }

    /// One-line form for log records, including the time of failure.
    pub fn to_log_string(&self) -> String {
        let mut line: Vec<String> = self
            .fields()
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        line.push(format!("at={}", self.occurred_at.to_rfc3339()));
        line.join(" ")
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "during {}", self.operation)?;
        if let Some(chat_id) = &self.chat_id {
            write!(f, " in {}", chat_id)?;
        }
        if let Some(message_id) = &self.message_id {
            write!(f, " on {}", message_id)?;
        }
        Ok(())
    }
}
