//! 百科检索工具（Wikipedia）
//!
//! MediaWiki search API 返回的 snippet 是 HTML 片段；用 html2text 提取可读文本，
//! 失败时回退到手写去标签。条目链接由标题拼出。

use async_trait::async_trait;
use html2text::from_read;
use reqwest::Client;
use serde::Deserialize;

use crate::tools::registry::ToolId;
use crate::tools::{Tool, ToolRecord};

const WIKIPEDIA_API_URL: &str = "https://en.wikipedia.org/w/api.php";

/// Wikipedia 搜索客户端
pub struct WikipediaSearchTool {
    client: Client,
    max_results: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl WikipediaSearchTool {
    pub fn new(max_results: usize) -> Self {
        Self {
            client: Client::new(),
            max_results,
        }
    }

    fn html_to_text(&self, html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => {
                text.split_whitespace().collect::<Vec<_>>().join(" ")
            }
            _ => strip_html_tags(html),
        }
    }

    fn article_url(title: &str) -> String {
        format!(
            "https://en.wikipedia.org/wiki/{}",
            title.trim().replace(' ', "_")
        )
    }
}

#[async_trait]
impl Tool for WikipediaSearchTool {
    fn id(&self) -> ToolId {
        ToolId::EncyclopediaSearch
    }

    fn description(&self) -> &str {
        "Encyclopedia lookup for background knowledge, definitions and established concepts."
    }

    async fn search(&self, query: &str) -> Result<Vec<ToolRecord>, String> {
        let limit = self.max_results.to_string();
        let resp = self
            .client
            .get(WIKIPEDIA_API_URL)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
                ("format", "json"),
                ("utf8", "1"),
            ])
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| format!("decode failed: {}", e))?;

        let hits = parsed.query.map(|q| q.search).unwrap_or_default();
        Ok(hits
            .into_iter()
            .take(self.max_results)
            .map(|hit| ToolRecord {
                url: Some(Self::article_url(&hit.title)),
                snippet: self.html_to_text(&hit.snippet),
                title: hit.title,
            })
            .collect())
    }
}
