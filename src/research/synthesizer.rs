//! 综合阶段：把 findings 写成结构化研究报告
//!
//! 一次 LLM 调用；第二次调用只用于三种情况之一：首次调用失败的重试、节数不足（<5）的
//! 重询、或 schema 修复重询；总调用数不超过两次。SynthesisFailed 只在两次调用都
//! 无法产出可用 payload 时返回，由状态机降级为基于 findings 的回退报告。

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::{extract, LlmClient, Message};
use crate::research::report::{self, MIN_SECTIONS};
use crate::research::state::{Finding, Plan, ReportSection};

const SYNTHESIZER_SYSTEM_PROMPT: &str = r#"You are a research report writer. Create a comprehensive, well-structured report from the findings.

Requirements:
- 5 to 8 sections with descriptive headings, each 2-3 paragraphs of content
- Include inline citations like [1], [2] referring to the numbered sources
- Make the content detailed and educational

Respond with ONLY a JSON object matching this schema:
{schema}"#;

/// 综合输出的线格式；references 与时间戳由报告装配补齐
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReportPayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub executive_summary: String,
    pub sections: Vec<ReportSection>,
}

/// 综合器
pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    call_delay: Duration,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, call_delay: Duration) -> Self {
        let schema = schemars::schema_for!(ReportPayload);
        let schema_text =
            serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());
        Self {
            llm,
            system_prompt: SYNTHESIZER_SYSTEM_PROMPT.replace("{schema}", &schema_text),
            call_delay,
        }
    }

    /// 生成报告 payload；Err 仅在两次调用都失败时返回
    pub async fn synthesize(
        &self,
        query: &str,
        plan: &Plan,
        findings: &[Finding],
    ) -> Result<ReportPayload, AgentError> {
        let mut messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(render_synthesis_request(query, plan, findings)),
        ];

        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }

        let raw = match self.llm.complete(&messages).await {
            Ok(raw) => raw,
            Err(first) => {
                // 首次调用失败：消耗第二次调用做重试
                tracing::warn!(error = %first, "synthesis call failed, retrying once");
                if !self.call_delay.is_zero() {
                    tokio::time::sleep(self.call_delay).await;
                }
                let raw = self.llm.complete(&messages).await.map_err(|second| {
                    AgentError::SynthesisFailed(format!(
                        "synthesis call failed twice: {}; then {}",
                        first, second
                    ))
                })?;
                return parse_report(&raw).map_err(|e| {
                    AgentError::SynthesisFailed(format!("synthesis output invalid: {}", e))
                });
            }
        };

        match parse_report(&raw) {
            Ok(payload) if payload.sections.len() >= MIN_SECTIONS => Ok(payload),
            Ok(short) => {
                // 节数不足：重询一次要求 5-8 节；再不行交给装配补齐
                tracing::info!(
                    sections = short.sections.len(),
                    "synthesis returned too few sections, reprompting"
                );
                match self
                    .reprompt(
                        &mut messages,
                        raw,
                        "The report needs 5 to 8 sections. Expand it and respond again with \
                         ONLY the JSON object.",
                    )
                    .await
                {
                    Ok(full) if full.sections.len() >= MIN_SECTIONS => Ok(full),
                    _ => Ok(short),
                }
            }
            Err(first_error) => {
                tracing::warn!(error = %first_error, "synthesis output rejected, reprompting");
                self.reprompt(
                    &mut messages,
                    raw,
                    &format!(
                        "Your previous output could not be used: {}. Respond again with ONLY \
                         the JSON object matching the schema.",
                        first_error
                    ),
                )
                .await
                .map_err(|e| {
                    AgentError::SynthesisFailed(format!(
                        "synthesis output invalid after repair: {}",
                        e
                    ))
                })
            }
        }
    }

    async fn reprompt(
        &self,
        messages: &mut Vec<Message>,
        previous: String,
        instruction: &str,
    ) -> Result<ReportPayload, String> {
        messages.push(Message::assistant(previous));
        messages.push(Message::user(instruction.to_string()));
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        let raw = self
            .llm
            .complete(messages)
            .await
            .map_err(|e| e.to_string())?;
        parse_report(&raw)
    }
}

/// 解码并丢弃空内容章节；零章节视为无效输出
fn parse_report(raw: &str) -> Result<ReportPayload, String> {
    let mut payload: ReportPayload = extract::decode(raw)?;
    payload
        .sections
        .retain(|s| !s.content.trim().is_empty());
    if payload.sections.is_empty() {
        return Err("report has no sections with content".to_string());
    }
    Ok(payload)
}

fn render_synthesis_request(query: &str, plan: &Plan, findings: &[Finding]) -> String {
    let mut text = format!("Topic: {}\n\nResearch findings:\n", query);
    for f in findings {
        text.push_str(&format!("\n{}\n", f.summary));
    }

    let references = report::dedup_references(findings);
    if references.is_empty() {
        text.push_str("\nAvailable sources: general knowledge only\n");
    } else {
        text.push_str("\nAvailable sources:\n");
        for (i, source) in references.iter().enumerate() {
            text.push_str(&format!("[{}] {} - {}\n", i + 1, source.title, source.url));
        }
    }

    if !plan.expected_sections.is_empty() {
        text.push_str(&format!(
            "\nSuggested section themes: {}\n",
            plan.expected_sections.join(", ")
        ));
    }
    text
}
