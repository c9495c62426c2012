//! 工具网关
//!
//! 对每次调用施加超时；超时按指数退避重试，最多 max_attempts 次；工具自身报错立即转
//! ToolError。单个工具失败不影响同一子任务的其它工具。每次调用输出结构化审计日志（JSON）。

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;

use crate::tools::{ToolRecord, ToolRegistry};
use crate::tools::registry::ToolId;

/// 片段归一化后的最大字符数
const MAX_SNIPPET_CHARS: usize = 600;

/// 单个工具调用失败：非致命，由调用方记入所属 Finding
#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub tool: ToolId,
    pub cause: String,
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tool, self.cause)
    }
}

/// 工具网关：统一超时、重试与结果归一化
pub struct ToolGateway {
    registry: ToolRegistry,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
}

impl ToolGateway {
    pub fn new(registry: ToolRegistry, timeout_secs: u64, max_attempts: u32) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            max_attempts: max_attempts.max(1),
            backoff_base: Duration::from_millis(250),
        }
    }

    pub fn tool_ids(&self) -> Vec<ToolId> {
        self.registry.ids()
    }

    pub fn descriptions(&self) -> Vec<(ToolId, String)> {
        self.registry.descriptions()
    }

    /// 调用指定知识源；空结果集是正常返回（零条记录）
    pub async fn invoke(&self, tool: ToolId, query: &str) -> Result<Vec<ToolRecord>, ToolError> {
        let Some(t) = self.registry.get(tool) else {
            // 封闭枚举下只会因注册表配置不完整触发
            return Err(ToolError {
                tool,
                cause: "tool not registered (configuration error)".to_string(),
            });
        };

        let start = Instant::now();
        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            match timeout(self.timeout, t.search(query)).await {
                Ok(Ok(records)) => break Ok(self.normalize(records)),
                Ok(Err(cause)) => break Err(ToolError { tool, cause }),
                Err(_) if attempt < self.max_attempts => {
                    let wait = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        tool = %tool,
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "tool call timed out, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(_) => {
                    break Err(ToolError {
                        tool,
                        cause: format!(
                            "timed out after {}s ({} attempts)",
                            self.timeout.as_secs(),
                            attempt
                        ),
                    })
                }
            }
        };

        let (ok, outcome, count) = match &result {
            Ok(records) => (true, "ok", records.len()),
            Err(e) if e.cause.contains("timed out") => (false, "timeout", 0),
            Err(_) => (false, "error", 0),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool.as_str(),
            "ok": ok,
            "outcome": outcome,
            "records": count,
            "attempts": attempt,
            "duration_ms": start.elapsed().as_millis() as u64,
            "query_preview": query.chars().take(80).collect::<String>(),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    /// 归一化：去除首尾空白、截断过长片段、丢弃完全空白的记录
    fn normalize(&self, records: Vec<ToolRecord>) -> Vec<ToolRecord> {
        records
            .into_iter()
            .filter_map(|r| {
                let title = r.title.trim().to_string();
                let snippet = truncate_chars(r.snippet.trim(), MAX_SNIPPET_CHARS);
                let url = r
                    .url
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty());
                if title.is_empty() && snippet.is_empty() {
                    return None;
                }
                Some(ToolRecord { title, url, snippet })
            })
            .collect()
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct SlowTool {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn id(&self) -> ToolId {
            ToolId::WebSearch
        }

        fn description(&self) -> &str {
            "never returns in time"
        }

        async fn search(&self, _query: &str) -> Result<Vec<ToolRecord>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    struct NoisyTool;

    #[async_trait]
    impl Tool for NoisyTool {
        fn id(&self) -> ToolId {
            ToolId::EncyclopediaSearch
        }

        fn description(&self) -> &str {
            "returns messy records"
        }

        async fn search(&self, _query: &str) -> Result<Vec<ToolRecord>, String> {
            Ok(vec![
                ToolRecord {
                    title: "  Padded  ".to_string(),
                    url: Some("  https://example.org/a  ".to_string()),
                    snippet: "x".repeat(2_000),
                },
                ToolRecord {
                    title: String::new(),
                    url: None,
                    snippet: "   ".to_string(),
                },
            ])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retried_then_surfaces() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool { calls: calls.clone() });
        let gateway = ToolGateway::new(registry, 1, 3);

        let err = gateway.invoke(ToolId::WebSearch, "q").await.unwrap_err();
        assert!(err.cause.contains("timed out"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unregistered_is_config_error() {
        let gateway = ToolGateway::new(ToolRegistry::new(), 1, 1);
        let err = gateway.invoke(ToolId::Calculator, "1+1").await.unwrap_err();
        assert!(err.cause.contains("not registered"));
    }

    #[tokio::test]
    async fn test_normalization() {
        let mut registry = ToolRegistry::new();
        registry.register(NoisyTool);
        let gateway = ToolGateway::new(registry, 5, 1);

        let records = gateway
            .invoke(ToolId::EncyclopediaSearch, "q")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Padded");
        assert_eq!(records[0].url.as_deref(), Some("https://example.org/a"));
        assert!(records[0].snippet.chars().count() <= MAX_SNIPPET_CHARS + 3);
    }
}
