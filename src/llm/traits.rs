//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Groq / Mock）实现 LlmClient：complete（非流式）。
//! LlmError 区分可重试（超时/限流/瞬时）与不可重试（请求本身非法）两类。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// LLM 调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request timeout")]
    Timeout,

    #[error("rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("transient error: {0}")]
    Transient(String),

    /// 请求本身非法（如模型名错误、消息格式错误），重试无意义
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("api error: {0}")]
    Api(String),
}

impl LlmError {
    /// 是否值得带退避重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout | LlmError::RateLimited { .. } | LlmError::Transient(_)
        )
    }
}

/// LLM 客户端 trait：非流式完成与累计 token 统计
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条回复内容
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::RateLimited { retry_after_ms: 100 }.is_retryable());
        assert!(LlmError::Transient("503".into()).is_retryable());
        assert!(!LlmError::InvalidRequest("bad model".into()).is_retryable());
        assert!(!LlmError::Api("boom".into()).is_retryable());
    }
}
