//! Shared constants used across the application.

/// User agent sent with every forum and chat API request.
pub const USER_AGENT: &str = concat!("ed-notifier/", env!("CARGO_PKG_VERSION"));

/// Sort order requested from the forum threads endpoint.
pub const THREAD_SORT: &str = "new";

/// Upper bound the forum accepts for the `limit` query parameter.
pub const MAX_THREAD_LIMIT: u32 = 100;

/// Page size used when validating a freshly submitted forum token.
pub const TOKEN_CHECK_LIMIT: u32 = 30;

/// Maximum number of characters of post body included in a chat message.
pub const MAX_BODY_CHARS: usize = 3000;

/// Appended to a post body that was cut at [`MAX_BODY_CHARS`].
pub const TRUNCATION_MARKER: &str = "\n\n(...)";

/// Shown in place of a post body with no text.
pub const EMPTY_BODY_PLACEHOLDER: &str = "{post body has no text}";

/// Author shown for anonymous posts.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// Destination name used when posting through an incoming webhook.
pub const WEBHOOK_DESTINATION: &str = "webhook";
