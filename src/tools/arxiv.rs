//! 学术论文搜索工具（arXiv Atom export API）
//!
//! 响应是 Atom XML；这里只需要每个 <entry> 的标题、摘要与链接，用轻量的标签截取即可，
//! 不值得为此引入完整 XML 解析。

use async_trait::async_trait;
use reqwest::Client;

use crate::tools::registry::ToolId;
use crate::tools::{Tool, ToolRecord};

const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

/// arXiv 搜索客户端
pub struct ArxivSearchTool {
    client: Client,
    max_results: usize,
}

/// 截取 <tag>...</tag> 的内容（取第一个出现）
fn extract_tag<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    Some(&block[start..end])
}

/// 还原常见 XML 实体并折叠空白
fn clean_text(s: &str) -> String {
    let s = s
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl ArxivSearchTool {
    pub fn new(max_results: usize) -> Self {
        Self {
            client: Client::new(),
            max_results,
        }
    }
}

#[async_trait]
impl Tool for ArxivSearchTool {
    fn id(&self) -> ToolId {
        ToolId::AcademicSearch
    }

    fn description(&self) -> &str {
        "Scientific paper search on arXiv for academic research, methods and state of the art."
    }

    async fn search(&self, query: &str) -> Result<Vec<ToolRecord>, String> {
        let search_query = format!("all:{}", query);
        let max_results = self.max_results.to_string();
        let resp = self
            .client
            .get(ARXIV_API_URL)
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", "relevance"),
            ])
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("read body: {}", e))?;

        let mut records = Vec::new();
        for block in body.split("<entry>").skip(1).take(self.max_results) {
            let title = extract_tag(block, "title").map(clean_text).unwrap_or_default();
            let summary = extract_tag(block, "summary").map(clean_text).unwrap_or_default();
            let url = extract_tag(block, "id").map(clean_text);
            if title.is_empty() && summary.is_empty() {
                continue;
            }
            records.push(ToolRecord {
                title,
                url,
                snippet: summary,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query Results</title>
  <entry>
    <id>http://arxiv.org/abs/2005.11401v4</id>
    <title>Retrieval-Augmented Generation
      for Knowledge-Intensive NLP Tasks</title>
    <summary>Large pre-trained language models &amp; retrieval...</summary>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <title>Attention Is All You Need</title>
    <summary>The dominant sequence transduction models...</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_entry_extraction() {
        let entries: Vec<&str> = SAMPLE_FEED.split("<entry>").skip(1).collect();
        assert_eq!(entries.len(), 2);

        let first = entries[0];
        assert_eq!(
            extract_tag(first, "title").map(clean_text).unwrap(),
            "Retrieval-Augmented Generation for Knowledge-Intensive NLP Tasks"
        );
        assert_eq!(
            extract_tag(first, "id").map(clean_text).unwrap(),
            "http://arxiv.org/abs/2005.11401v4"
        );
        assert!(extract_tag(first, "summary")
            .map(clean_text)
            .unwrap()
            .contains("language models & retrieval"));
    }

    #[test]
    fn test_missing_tag() {
        assert!(extract_tag("<entry><title>x</title>", "summary").is_none());
    }
}
