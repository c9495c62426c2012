//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 支持预置响应队列（依次弹出，可混入错误），用于脚本化驱动整条研究流水线；
//! 队列为空时回显最后一条 User 消息，便于本地跑通流程。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// Mock 客户端：预置响应队列 + 调用计数
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicU64,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条成功响应
    pub fn push_ok(&self, content: impl Into<String>) {
        self.responses
            .lock()
            .expect("mock responses lock")
            .push_back(Ok(content.into()));
    }

    /// 追加一条失败响应
    pub fn push_err(&self, err: LlmError) {
        self.responses
            .lock()
            .expect("mock responses lock")
            .push_back(Err(err));
    }

    /// 已发生的 complete 调用次数
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if let Some(scripted) = self
            .responses
            .lock()
            .expect("mock responses lock")
            .pop_front()
        {
            return scripted;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_order() {
        let mock = MockLlmClient::new();
        mock.push_ok("first");
        mock.push_err(LlmError::Timeout);
        mock.push_ok("third");

        assert_eq!(mock.complete(&[]).await.unwrap(), "first");
        assert!(mock.complete(&[]).await.is_err());
        assert_eq!(mock.complete(&[]).await.unwrap(), "third");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_echo_when_exhausted() {
        let mock = MockLlmClient::new();
        let out = mock.complete(&[Message::user("ping")]).await.unwrap();
        assert!(out.contains("ping"));
    }
}
