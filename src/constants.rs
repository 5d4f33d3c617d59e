/// Groq's OpenAI-compatible API root.
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Environment variable holding the upstream bearer token.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Model defaults
pub const DEFAULT_TEXT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_VISION_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Persona instructions prepended to every upstream conversation.
pub const SYSTEM_PREAMBLE: &str = "You are AxiomAssist, a friendly, helpful and intelligent AI companion.

CORE PERSONA:
- Act like a close friend, not a robotic assistant.
- Use emojis to express emotion and keep the chat lively.
- Be conversational, warm and engaging.

KEY RULES:
- If asked for your name, respond: \"I am AxiomAssist!\"
- Do not mention the underlying model vendor or its corporate origins.
- Format your responses using Markdown.";

/// Conversation titles
pub const TITLE_MAX_CHARS: usize = 50;
pub const TITLE_PLACEHOLDER: &str = "New Chat";
/// Titles of explicitly saved chats are shorter and marked when cut.
pub const SAVED_TITLE_MAX_CHARS: usize = 30;
pub const SAVED_TITLE_ELLIPSIS: &str = "...";

/// History listing cap
pub const HISTORY_LIST_LIMIT: i64 = 50;

/// SSE framing
pub const SSE_DATA_PREFIX: &str = "data:";
pub const SSE_DONE_PAYLOAD: &str = "[DONE]";
pub const MAX_SSE_LINE_BYTES: usize = 1024 * 1024;

/// Relay backpressure: one forwarded delta in flight per request.
pub const RELAY_CHANNEL_CAPACITY: usize = 1;

/// Database defaults
pub const DB_MAX_CONNECTIONS: u32 = 8;
pub const DB_BUSY_TIMEOUT_MS: u64 = 5000;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
