//! 规划阶段：把研究查询拆成带工具集的子任务
//!
//! 一次 schema 约束的 LLM 调用；输出不合法时做一次修复重询，仍失败则 PlanningFailed。
//! complexity / priority / estimated_sources 均为提示性字段，不参与控制流。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::{extract, LlmClient, Message};
use crate::research::state::{Complexity, Plan, Priority, Subtask};
use crate::tools::ToolId;

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a research planner. Analyze the research query and break it into manageable subtasks.

Available tools (use these ids in tools_needed):
- tavily: web search for current information
- arxiv: scientific papers and academic research
- wikipedia: background knowledge and definitions
- calculator: mathematical calculations
- python: code examples and demonstrations

Guidelines:
1. Break complex topics into 2-5 subtasks, each with a non-empty tool list
2. Give each subtask a unique positive integer id
3. Suggest 4-6 sections for the final report
4. Estimate the number of sources needed (typically 5-10)

Respond with ONLY a JSON object matching this schema:
{schema}"#;

/// 规划输出的线格式；tools_needed 保持字符串，解析成 ToolId 在校验一步完成
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlanPayload {
    #[serde(alias = "query_understanding")]
    pub query_analysis: String,
    pub complexity: Complexity,
    pub subtasks: Vec<SubtaskPayload>,
    #[serde(default)]
    pub expected_sections: Vec<String>,
    #[serde(default)]
    pub estimated_sources: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SubtaskPayload {
    pub id: u32,
    pub description: String,
    pub tools_needed: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// 规划器：持有 LLM 与构造期拼好的 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        let schema = schemars::schema_for!(PlanPayload);
        let schema_text =
            serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());
        Self {
            llm,
            system_prompt: PLANNER_SYSTEM_PROMPT.replace("{schema}", &schema_text),
        }
    }

    /// 获取 LLM 累计 token 使用统计（各阶段共享同一客户端）
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 生成研究计划；LLM 调用失败或修复后仍不合法时返回 Err（对状态机是致命错误）
    pub async fn plan(&self, query: &str) -> Result<Plan, AgentError> {
        let mut messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(format!("Research query: {}", query)),
        ];

        let raw = self.llm.complete(&messages).await?;
        let first_error = match parse_plan(&raw) {
            Ok(plan) => return Ok(plan),
            Err(e) => e,
        };

        tracing::warn!(error = %first_error, "plan output rejected, reprompting for repair");
        messages.push(Message::assistant(raw));
        messages.push(Message::user(format!(
            "Your previous output could not be used: {}. \
             Respond again with ONLY the JSON object matching the schema, no other text.",
            first_error
        )));

        let raw = self.llm.complete(&messages).await?;
        parse_plan(&raw).map_err(|e| {
            AgentError::PlanningFailed(format!("plan rejected after repair reprompt: {}", e))
        })
    }
}

/// 线格式 -> 领域类型的唯一入口：结构、id 唯一性与工具集在此校验
fn parse_plan(raw: &str) -> Result<Plan, String> {
    let payload: PlanPayload = extract::decode(raw)?;
    validate(payload)
}

fn validate(payload: PlanPayload) -> Result<Plan, String> {
    if payload.subtasks.is_empty() {
        return Err("plan has no subtasks".to_string());
    }

    let mut seen_ids = std::collections::HashSet::new();
    let mut subtasks = Vec::with_capacity(payload.subtasks.len());
    for sub in payload.subtasks {
        if sub.id == 0 {
            return Err("subtask id must be a positive integer".to_string());
        }
        if !seen_ids.insert(sub.id) {
            return Err(format!("duplicate subtask id: {}", sub.id));
        }
        if sub.description.trim().is_empty() {
            return Err(format!("subtask {} has an empty description", sub.id));
        }

        let mut tools: Vec<ToolId> = Vec::new();
        for name in &sub.tools_needed {
            let id = ToolId::parse(name)
                .map_err(|e| format!("subtask {}: {}", sub.id, e))?;
            if !tools.contains(&id) {
                tools.push(id);
            }
        }
        if tools.is_empty() {
            return Err(format!("subtask {} has no tools", sub.id));
        }

        subtasks.push(Subtask {
            id: sub.id,
            description: sub.description.trim().to_string(),
            tools_needed: tools,
            priority: sub.priority,
        });
    }

    Ok(Plan {
        query_analysis: payload.query_analysis,
        complexity: payload.complexity,
        subtasks,
        expected_sections: payload.expected_sections,
        estimated_sources: payload.estimated_sources,
    })
}
