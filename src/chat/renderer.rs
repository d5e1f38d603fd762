//! Rendering assistant replies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pulldown_cmark::{html, Event, Options, Parser};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderError(pub String);

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "render failed: {}", self.0)
    }
}

impl std::error::Error for RenderError {}

/// Turns reply Markdown into display content.
pub trait ContentRenderer: Send + Sync {
    fn render(&self, source: &str) -> Result<String, RenderError>;
}

/// CommonMark to HTML, with tables, strikethrough and task lists.
///
/// Raw HTML in the source is escaped rather than passed through.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ContentRenderer for MarkdownRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError> {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        let parser = Parser::new_ext(source, options).map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });
        let mut out = String::with_capacity(source.len() * 3 / 2);
        html::push_html(&mut out, parser);
        Ok(out)
    }
}

/// Render on the blocking pool, giving up after `timeout`.
///
/// Returns `None` when the renderer fails, panics or runs out of time;
/// callers fall back to the raw text.
pub async fn render_with_timeout(
    renderer: Arc<dyn ContentRenderer>,
    source: String,
    timeout: Duration,
) -> Option<String> {
    let task = tokio::task::spawn_blocking(move || renderer.render(&source));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(rendered))) => Some(rendered),
        Ok(Ok(Err(e))) => {
            tracing::warn!("{}", e);
            None
        }
        Ok(Err(e)) => {
            tracing::warn!("Renderer panicked: {}", e);
            None
        }
        Err(_) => {
            tracing::warn!("Rendering exceeded {:?}, showing raw text", timeout);
            None
        }
    }
}
