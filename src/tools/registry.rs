//! 工具注册表
//!
//! 知识源是封闭集合：ToolId 为带标签的枚举而非任意字符串，未注册的工具在构造期即不可表达。
//! 所有工具实现 Tool trait（id / description / search），由 ToolRegistry 按 ToolId 注册与查找，
//! ToolGateway 在调用时加超时与退避重试。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 知识源标识（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolId {
    /// 网页搜索（Tavily）
    WebSearch,
    /// 学术论文搜索（arXiv）
    AcademicSearch,
    /// 百科检索（Wikipedia）
    EncyclopediaSearch,
    /// 数学表达式求值
    Calculator,
    /// 沙箱代码执行
    CodeExecutor,
}

impl ToolId {
    pub const ALL: [ToolId; 5] = [
        ToolId::WebSearch,
        ToolId::AcademicSearch,
        ToolId::EncyclopediaSearch,
        ToolId::Calculator,
        ToolId::CodeExecutor,
    ];

    /// 规范标识（序列化与日志使用）
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolId::WebSearch => "web-search",
            ToolId::AcademicSearch => "academic-search",
            ToolId::EncyclopediaSearch => "encyclopedia-search",
            ToolId::Calculator => "calculator",
            ToolId::CodeExecutor => "code-executor",
        }
    }

    /// 解析规范标识与常见提供方别名（规划模型惯用 tavily/arxiv/wikipedia/python 等叫法）
    pub fn parse(s: &str) -> Result<ToolId, String> {
        match s.trim().to_lowercase().as_str() {
            "web-search" | "web_search" | "tavily" | "web" | "search" => Ok(ToolId::WebSearch),
            "academic-search" | "academic_search" | "arxiv" | "papers" => {
                Ok(ToolId::AcademicSearch)
            }
            "encyclopedia-search" | "encyclopedia_search" | "wikipedia" | "wiki" => {
                Ok(ToolId::EncyclopediaSearch)
            }
            "calculator" | "calc" => Ok(ToolId::Calculator),
            "code-executor" | "code_executor" | "python" | "code" => Ok(ToolId::CodeExecutor),
            other => Err(format!("unknown tool id: {}", other)),
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolId::parse(s)
    }
}

impl Serialize for ToolId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ToolId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ToolId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// 工具返回的原始记录：url 可缺失（计算器、代码执行、搜索摘要无出处链接）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub title: String,
    pub url: Option<String>,
    pub snippet: String,
}

/// 知识源 trait：标识、描述（供规划模型理解）、按查询检索记录
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> ToolId;

    /// 工具描述（出现在 Planner 的可用工具清单里）
    fn description(&self) -> &str;

    /// 检索；空结果不是错误，Err 仅表示调用本身失败
    async fn search(&self, query: &str) -> Result<Vec<ToolRecord>, String>;
}

/// 工具注册表：按 ToolId 存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<ToolId, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let id = tool.id();
        self.tools.insert(id, Arc::new(tool));
    }

    pub fn get(&self, id: ToolId) -> Option<Arc<dyn Tool>> {
        self.tools.get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<ToolId> {
        self.tools.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 返回 (id, description) 列表，用于生成 prompt 中的 Available tools 段落
    pub fn descriptions(&self) -> Vec<(ToolId, String)> {
        self.tools
            .iter()
            .map(|(id, tool)| (*id, tool.description().to_string()))
            .collect()
    }
}
