//! Rendering of forum threads into chat messages.

use serde_json::{json, Value};

use crate::constants::{ANONYMOUS_AUTHOR, EMPTY_BODY_PLACEHOLDER, MAX_BODY_CHARS, TRUNCATION_MARKER};
use crate::forum::Thread;

/// A chat message ready to be posted to any destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// `(#number) title`
    pub title: String,
    pub body: String,
    /// `category` or `category: subcategory`
    pub category: String,
    pub author: String,
    pub thread_url: String,
}

impl RenderedMessage {
    /// Plain-text fallback shown in notifications and clients without blocks.
    #[must_use]
    pub fn fallback_text(&self) -> String {
        format!("{}: {}", self.title, self.body)
    }

    /// Block Kit layout: header, body, metadata fields and a link button.
    #[must_use]
    pub fn blocks(&self) -> Value {
        json!([
            {
                "type": "header",
                "text": { "type": "plain_text", "text": self.title, "emoji": true }
            },
            {
                "type": "section",
                "text": { "type": "plain_text", "text": self.body, "emoji": true }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("\u{1f5c2}\u{fe0f} *Category:*\n{}", self.category) },
                    { "type": "mrkdwn", "text": format!("\u{1f464} *Posted by:*\n{}", self.author) }
                ]
            },
            {
                "type": "actions",
                "elements": [
                    {
                        "type": "button",
                        "text": { "type": "plain_text", "text": "\u{1f517} Open in Ed", "emoji": true },
                        "url": self.thread_url
                    }
                ]
            }
        ])
    }
}

/// Render `thread` with a link rooted at `web_url`.
#[must_use]
pub fn render_thread(thread: &Thread, web_url: &str) -> RenderedMessage {
    let category = match &thread.subcategory {
        Some(sub) => format!("{}: {sub}", thread.category),
        None => thread.category.clone(),
    };

    RenderedMessage {
        title: format!("(#{}) {}", thread.number, thread.title),
        body: render_body(&thread.document),
        category,
        author: thread.author().unwrap_or(ANONYMOUS_AUTHOR).to_string(),
        thread_url: format!(
            "{}/courses/{}/discussion/{}",
            web_url.trim_end_matches('/'),
            thread.course_id,
            thread.id
        ),
    }
}

/// Trim, cap at [`MAX_BODY_CHARS`] and substitute a placeholder for empty bodies.
fn render_body(document: &str) -> String {
    let text = document.trim();
    if text.is_empty() {
        return EMPTY_BODY_PLACEHOLDER.to_string();
    }
    if text.chars().count() <= MAX_BODY_CHARS {
        return text.to_string();
    }

    let keep = MAX_BODY_CHARS - TRUNCATION_MARKER.chars().count();
    let mut body: String = text.chars().take(keep).collect();
    body.push_str(TRUNCATION_MARKER);
    body
}
