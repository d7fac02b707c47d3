/// Lexical markers delimiting reasoning content in the raw model stream.
pub const THINK_OPEN_TAG: &str = "<think>";
pub const THINK_CLOSE_TAG: &str = "</think>";

/// Decorations substituted for the markers in display output. The open/close
/// pair renders as a collapsible block in markdown-capable chat surfaces.
pub const THINK_BLOCK_OPEN: &str = "\n<details><summary>Thinking</summary>\n\n";
pub const THINK_BLOCK_CLOSE: &str = "\n\n</details>\n\n";

/// SSE framing literals.
pub const SSE_DATA_PREFIX: &str = "data:";
pub const SSE_DONE_SENTINEL: &str = "[DONE]";

/// Finish signal that forces an immediate tool-call flush.
pub const FINISH_REASON_TOOL_CALLS: &str = "tool_calls";

/// Upper bounds on a single SSE line and on lines per response. Anything past
/// these is a broken upstream, not a legitimate stream.
pub const MAX_SSE_LINE_BYTES: usize = 1024 * 1024;
pub const MAX_STREAM_LINES: u64 = 100_000;

/// Statuses worth retrying on the connection-test path.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504, 520];

/// Default endpoint configuration for the demo binary.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Environment variables probed (in order) for the API credential.
pub const API_KEY_ENV_VARS: &[&str] = &["PRISM_API_KEY", "OPENAI_API_KEY"];

/// How much of an upstream error body survives into error messages and logs.
pub const ERROR_BODY_PREVIEW_CHARS: usize = 300;
