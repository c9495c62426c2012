//! 研究运行的共享状态与数据模型
//!
//! ResearchState 由状态机独占持有，各阶段以只读引用取数、以返回值写回；
//! findings 每轮执行整体替换（不跨重试累积），errors 只追加不清空。

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tools::{ToolError, ToolId, ToolRecord};

/// 查询复杂度（规划输出，仅供展示，不影响控制流）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// 子任务优先级（同样仅供展示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// 单个研究子任务
#[derive(Debug, Clone, Serialize)]
pub struct Subtask {
    /// 计划内唯一的正整数 id
    pub id: u32,
    pub description: String,
    /// 非空，且全部来自已注册的知识源集合
    pub tools_needed: Vec<ToolId>,
    pub priority: Priority,
}

/// 规划阶段输出；成功后只读
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub query_analysis: String,
    pub complexity: Complexity,
    pub subtasks: Vec<Subtask>,
    pub expected_sections: Vec<String>,
    /// 预估需要的来源数量（提示性）
    pub estimated_sources: u32,
}

impl Plan {
    pub fn subtask_ids(&self) -> Vec<u32> {
        self.subtasks.iter().map(|s| s.id).collect()
    }
}

/// 引用来源：url 必须是合法的绝对 http(s) 链接
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl Source {
    /// 从工具记录构造；无链接或链接不合法的记录在此被丢弃（仍参与证据文本）
    pub fn from_record(record: &ToolRecord) -> Option<Source> {
        let url = record.url.as_deref()?.trim();
        if !is_valid_absolute_url(url) {
            return None;
        }
        Some(Source {
            title: if record.title.is_empty() {
                "Source".to_string()
            } else {
                record.title.clone()
            },
            url: url.to_string(),
            snippet: record.snippet.clone(),
        })
    }
}

/// 绝对 http(s) URL 的最小校验：协议 + 非空 host，且无空白字符
pub fn is_valid_absolute_url(url: &str) -> bool {
    if url.chars().any(char::is_whitespace) {
        return false;
    }
    let rest = match url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => return false,
    };
    let host = rest.split('/').next().unwrap_or("");
    let host = host.split(':').next().unwrap_or("");
    !host.is_empty() && host != "."
}

/// 单个子任务的研究结果
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    /// 指向 plan.subtasks 中的 id
    pub subtask_id: u32,
    pub summary: String,
    pub sources: Vec<Source>,
    /// 本子任务内失败的工具调用；全部失败的子任务靠它标记为低证据
    pub tool_errors: Vec<ToolError>,
}

/// 校验决策
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Proceed,
    Retry,
}

/// 校验阶段输出；每次校验整体覆盖
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    /// 0-100
    pub confidence: u8,
    pub coverage_notes: String,
    pub decision: Decision,
    /// 仅在 decision = retry 时非空
    pub missing_aspects: Vec<String>,
}

/// 报告章节
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportSection {
    pub heading: String,
    pub content: String,
}

/// 最终报告；仅在流水线成功完成时写入一次
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub title: String,
    pub executive_summary: String,
    /// 经报告装配后长度保证在 [5, 8]
    pub sections: Vec<ReportSection>,
    /// 按 URL 去重，保留首次出现
    pub references: Vec<Source>,
    pub generated_at: DateTime<Utc>,
}

/// 状态机当前节点（外部观察用，仅状态机更新）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStep {
    Start,
    Planning,
    Executing,
    Verifying,
    Synthesizing,
    Complete,
    Error,
}

impl std::fmt::Display for ResearchStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResearchStep::Start => "start",
            ResearchStep::Planning => "planning",
            ResearchStep::Executing => "executing",
            ResearchStep::Verifying => "verifying",
            ResearchStep::Synthesizing => "synthesizing",
            ResearchStep::Complete => "complete",
            ResearchStep::Error => "error",
        };
        f.write_str(s)
    }
}

/// 一次研究运行的全部状态
#[derive(Debug, Clone, Serialize)]
pub struct ResearchState {
    /// 运行标识（并发运行彼此隔离）
    pub id: Uuid,
    /// 原始查询，创建后不变
    pub query: String,
    pub plan: Option<Plan>,
    pub findings: Vec<Finding>,
    pub verification: Option<Verification>,
    pub report: Option<Report>,
    pub current_step: ResearchStep,
    /// 因 retry 决策触发的重新执行次数；只由状态机在派发重试前递增
    pub iteration: u32,
    /// 整个运行期间累积的错误描述；只追加
    pub errors: Vec<String>,
}

impl ResearchState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            plan: None,
            findings: Vec::new(),
            verification: None,
            report: None,
            current_step: ResearchStep::Start,
            iteration: 0,
            errors: Vec::new(),
        }
    }

    /// 终态校验用：报告存在当且仅当成功完成
    pub fn is_complete(&self) -> bool {
        self.current_step == ResearchStep::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(is_valid_absolute_url("https://en.wikipedia.org/wiki/RAG"));
        assert!(is_valid_absolute_url("http://arxiv.org/abs/2005.11401v4"));
        assert!(is_valid_absolute_url("https://example.org"));
        assert!(!is_valid_absolute_url("example.org/page"));
        assert!(!is_valid_absolute_url("ftp://example.org"));
        assert!(!is_valid_absolute_url("https://"));
        assert!(!is_valid_absolute_url("https://bad host/x"));
        assert!(!is_valid_absolute_url(""));
    }

    #[test]
    fn test_source_from_record_drops_missing_url() {
        let no_url = ToolRecord {
            title: "Calculation".into(),
            url: None,
            snippet: "1 + 1 = 2".into(),
        };
        assert!(Source::from_record(&no_url).is_none());

        let bad_url = ToolRecord {
            title: "X".into(),
            url: Some("not a url".into()),
            snippet: "".into(),
        };
        assert!(Source::from_record(&bad_url).is_none());

        let ok = ToolRecord {
            title: "".into(),
            url: Some("https://example.org/a".into()),
            snippet: "text".into(),
        };
        let source = Source::from_record(&ok).unwrap();
        assert_eq!(source.title, "Source");
        assert_eq!(source.url, "https://example.org/a");
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = ResearchState::new("what is RAG");
        assert_eq!(state.current_step, ResearchStep::Start);
        assert_eq!(state.iteration, 0);
        assert!(state.plan.is_none());
        assert!(state.report.is_none());
        assert!(state.errors.is_empty());
    }
}
