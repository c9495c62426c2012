//! LLM 重试装饰器
//!
//! 包装任意 LlmClient：超时/限流/瞬时错误按指数退避重试，最多 max_attempts 次；
//! InvalidRequest 等不可重试错误立即返回。限流时尊重服务端给出的 retry_after。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};

/// 重试策略：尝试上限（含首次）与初始退避
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次失败后的退避时长（attempt 从 1 开始，指数翻倍）
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// 带重试的 LLM 客户端
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let max = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.complete(messages).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_retryable() && attempt < max => {
                    let mut wait = self.config.backoff_for(attempt);
                    if let LlmError::RateLimited { retry_after_ms } = &e {
                        wait = wait.max(Duration::from_millis(*retry_after_ms));
                    }
                    tracing::warn!(
                        attempt,
                        max_attempts = max,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_err(LlmError::Transient("503".into()));
        mock.push_ok("recovered");
        let client = RetryingLlmClient::new(
            mock.clone(),
            RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
            },
        );
        let out = client.complete(&[Message::user("hi")]).await.unwrap();
        assert_eq!(out, "recovered");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_request_not_retried() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_err(LlmError::InvalidRequest("bad".into()));
        mock.push_ok("never reached");
        let client = RetryingLlmClient::new(
            mock.clone(),
            RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
            },
        );
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_err(LlmError::Timeout);
        mock.push_err(LlmError::Timeout);
        mock.push_err(LlmError::Timeout);
        let client = RetryingLlmClient::new(
            mock.clone(),
            RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
            },
        );
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout));
        assert_eq!(mock.call_count(), 3);
    }
}
