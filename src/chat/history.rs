//! Chat messages to API conversation turns.

use crate::api::{ApiMessage, ContentBlock, ImageSource, MessageContent};
use crate::models::{FileAttachment, Message};

/// The conversation as sent to the API. Error messages are left out.
pub fn build_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .filter(|m| !m.is_error)
        .map(to_api_message)
        .collect()
}

/// One turn. Attachments come first as their own blocks, then the text.
pub fn to_api_message(message: &Message) -> ApiMessage {
    let role = message.role.api_name().to_string();
    let text = message.source_text();

    if message.files.is_empty() {
        return ApiMessage {
            role,
            content: MessageContent::Text(text.to_string()),
        };
    }

    let mut blocks: Vec<ContentBlock> = message.files.iter().map(file_block).collect();
    if !text.trim().is_empty() {
        blocks.push(ContentBlock::text(text));
    }
    ApiMessage {
        role,
        content: MessageContent::Blocks(blocks),
    }
}

fn file_block(file: &FileAttachment) -> ContentBlock {
    if file.is_image() {
        return match file.image_payload() {
            Some((media_type, data)) => ContentBlock::Image {
                source: ImageSource::base64(media_type, data),
            },
            None => {
                tracing::warn!("Attachment {} is not valid base64 image data", file.name);
                ContentBlock::text(format!("[Image attachment {} could not be read]", file.name))
            }
        };
    }
    ContentBlock::text(format!("File: {}\n```\n{}\n```", file.name, file.content))
}
