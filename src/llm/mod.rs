//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Groq / Mock）、重试装饰器与 JSON 提取边界

pub mod extract;
pub mod groq;
pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use groq::{create_groq_client, GROQ_BASE_URL, GROQ_FAST_MODEL};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{LlmClient, LlmError, Message, Role};
