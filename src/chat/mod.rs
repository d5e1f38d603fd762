//! Chat lifecycle: the coordinator, API history building and reply
//! rendering.

pub mod coordinator;
pub mod history;
pub mod renderer;

pub use coordinator::{ChatCoordinator, CoordinatorConfig, SendOptions};
pub use history::{build_api_messages, to_api_message};
pub use renderer::{render_with_timeout, ContentRenderer, MarkdownRenderer, RenderError};
