//! Web 搜索工具（Tavily）
//!
//! POST /search，附带 include_answer：返回的综合回答作为一条无出处链接的记录，
//! 其后是带 URL 的搜索结果。API Key 缺失在构造流水线时已被拦截。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::tools::registry::ToolId;
use crate::tools::{Tool, ToolRecord};

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// Tavily 搜索客户端
pub struct WebSearchTool {
    client: Client,
    api_key: String,
    max_results: usize,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl WebSearchTool {
    pub fn new(api_key: impl Into<String>, max_results: usize) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            max_results,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn id(&self) -> ToolId {
        ToolId::WebSearch
    }

    fn description(&self) -> &str {
        "Web search for current information (news, documentation, blogs). Best default source for most research subtasks."
    }

    async fn search(&self, query: &str) -> Result<Vec<ToolRecord>, String> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": self.max_results,
            "include_answer": true,
            "include_raw_content": false,
        });

        let resp = self
            .client
            .post(TAVILY_SEARCH_URL)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let parsed: TavilyResponse = resp
            .json()
            .await
            .map_err(|e| format!("decode failed: {}", e))?;

        let mut records = Vec::new();
        // 综合回答没有出处链接，只作为证据文本参与子任务综合
        if let Some(answer) = parsed.answer.filter(|a| !a.trim().is_empty()) {
            records.push(ToolRecord {
                title: "Search summary".to_string(),
                url: None,
                snippet: answer,
            });
        }
        for r in parsed.results.into_iter().take(self.max_results) {
            records.push(ToolRecord {
                title: if r.title.is_empty() {
                    "Untitled".to_string()
                } else {
                    r.title
                },
                url: Some(r.url),
                snippet: r.content,
            });
        }
        Ok(records)
    }
}
