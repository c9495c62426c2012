//! 执行阶段：按计划调用知识源并综合出 Finding
//!
//! 每个子任务：tools_needed 内的工具并发调用（信号量限并发，屏障式 join，不抢先返回），
//! 成功结果与失败一并交给一次 LLM 调用综合成摘要。单个工具失败从不中断子任务；
//! 只有综合调用两次都失败才记入 errors 并跳过该 Finding（不伪造）。
//! 重试轮只重做 missing_aspects 命中的子任务，其余 Finding 原样带入本轮返回值，
//! 状态机整体替换 findings，避免跨轮累积出陈旧重复。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use serde::Deserialize;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::{extract, LlmClient, LlmError, Message};
use crate::research::events::{send_event, ResearchEvent};
use crate::research::state::{Finding, Plan, Source, Subtask};
use crate::tools::{ToolError, ToolGateway, ToolRecord};

const SYNTHESIS_SYSTEM_PROMPT: &str = r#"Summarize the research data for the given task into 2-3 detailed paragraphs.
Be specific and informative. Include facts, definitions, and key insights.
Respond with ONLY a JSON object: {"findings": "detailed summary...", "key_points": ["point 1", "point 2"]}"#;

/// 证据文本中每条记录的片段上限
const EVIDENCE_SNIPPET_CHARS: usize = 500;

/// 一轮执行的产出：完整的 findings 序列 + 本轮记入 errors 的条目
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub findings: Vec<Finding>,
    pub errors: Vec<String>,
}

/// 子任务综合输出的线格式
#[derive(Debug, Deserialize)]
struct FindingPayload {
    findings: String,
    #[serde(default)]
    key_points: Vec<String>,
}

/// 执行器：工具网关 + 综合 LLM
pub struct Executor {
    llm: Arc<dyn LlmClient>,
    gateway: Arc<ToolGateway>,
    /// 子任务内工具调用的并发上限
    tool_permits: Arc<Semaphore>,
    /// LLM 调用前的限速延迟
    call_delay: Duration,
}

impl Executor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        gateway: Arc<ToolGateway>,
        max_concurrent_tools: usize,
        call_delay: Duration,
    ) -> Self {
        Self {
            llm,
            gateway,
            tool_permits: Arc::new(Semaphore::new(max_concurrent_tools.max(1))),
            call_delay,
        }
    }

    /// 执行一轮研究
    ///
    /// 首轮（previous 为空）执行全部子任务；重试轮只重做 missing_aspects 命中的子任务，
    /// 映射不出目标时回退为全量重做。返回 Err 仅见于取消与「没有任何 Finding」的致命情况。
    pub async fn execute(
        &self,
        plan: &Plan,
        previous: &[Finding],
        missing_aspects: &[String],
        cancel: &CancellationToken,
        event_tx: Option<&mpsc::UnboundedSender<ResearchEvent>>,
    ) -> Result<ExecutionOutcome, AgentError> {
        let all_ids: HashSet<u32> = plan.subtask_ids().into_iter().collect();
        let targets = if previous.is_empty() || missing_aspects.is_empty() {
            all_ids.clone()
        } else {
            let mapped = select_targets(plan, missing_aspects);
            if mapped.is_empty() {
                tracing::info!("missing aspects did not map to subtasks, re-executing all");
                all_ids.clone()
            } else {
                mapped
            }
        };

        let mut findings = Vec::with_capacity(plan.subtasks.len());
        let mut errors = Vec::new();

        for subtask in &plan.subtasks {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            if !targets.contains(&subtask.id) {
                // 未命中的子任务带上一轮结果前移，保持返回值是完整序列
                if let Some(prev) = previous.iter().find(|f| f.subtask_id == subtask.id) {
                    findings.push(prev.clone());
                }
                continue;
            }

            send_event(
                &event_tx,
                ResearchEvent::SubtaskStarted {
                    id: subtask.id,
                    description: subtask.description.clone(),
                },
            );

            let (records, tool_errors) = self.dispatch_tools(subtask, cancel, event_tx).await?;

            // 综合前限速
            if !self.call_delay.is_zero() {
                tokio::time::sleep(self.call_delay).await;
            }

            match self.synthesize_summary(subtask, &records, &tool_errors).await {
                Ok(summary) => {
                    let sources: Vec<Source> =
                        records.iter().filter_map(Source::from_record).collect();
                    send_event(
                        &event_tx,
                        ResearchEvent::SubtaskComplete {
                            id: subtask.id,
                            sources: sources.len(),
                        },
                    );
                    findings.push(Finding {
                        subtask_id: subtask.id,
                        summary,
                        sources,
                        tool_errors,
                    });
                }
                Err(e) => {
                    // 两次综合调用都失败：记录并跳过该子任务的 Finding
                    let text = format!("subtask {} synthesis failed: {}", subtask.id, e);
                    tracing::error!(subtask = subtask.id, error = %e, "finding skipped");
                    send_event(&event_tx, ResearchEvent::Error { text: text.clone() });
                    errors.push(text);
                }
            }
        }

        if findings.is_empty() {
            return Err(AgentError::ExecutionFailed(
                "no subtask produced a finding".to_string(),
            ));
        }
        Ok(ExecutionOutcome { findings, errors })
    }

    /// 并发调用子任务的全部工具；屏障式 join，观察到取消时放弃在途调用
    async fn dispatch_tools(
        &self,
        subtask: &Subtask,
        cancel: &CancellationToken,
        event_tx: Option<&mpsc::UnboundedSender<ResearchEvent>>,
    ) -> Result<(Vec<ToolRecord>, Vec<ToolError>), AgentError> {
        let futures = subtask.tools_needed.iter().map(|&tool| {
            send_event(
                &event_tx,
                ResearchEvent::ToolCall {
                    tool,
                    query: subtask.description.clone(),
                },
            );
            let gateway = Arc::clone(&self.gateway);
            let permits = Arc::clone(&self.tool_permits);
            let query = subtask.description.clone();
            async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .expect("tool semaphore closed");
                gateway.invoke(tool, &query).await
            }
        });

        let results = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            results = future::join_all(futures) => results,
        };

        let mut records = Vec::new();
        let mut tool_errors = Vec::new();
        for result in results {
            match result {
                Ok(mut r) => records.append(&mut r),
                Err(e) => {
                    send_event(
                        &event_tx,
                        ResearchEvent::ToolFailure {
                            tool: e.tool,
                            reason: e.cause.clone(),
                        },
                    );
                    tool_errors.push(e);
                }
            }
        }
        Ok((records, tool_errors))
    }

    /// 一次综合调用（失败后再试一次）；payload 解析失败时退化为原始文本摘要
    async fn synthesize_summary(
        &self,
        subtask: &Subtask,
        records: &[ToolRecord],
        tool_errors: &[ToolError],
    ) -> Result<String, LlmError> {
        let evidence = build_evidence(&subtask.description, records, tool_errors);
        let messages = vec![
            Message::system(SYNTHESIS_SYSTEM_PROMPT),
            Message::user(format!(
                "Task: {}\n\nResearch data:\n{}",
                subtask.description, evidence
            )),
        ];

        let raw = match self.llm.complete(&messages).await {
            Ok(raw) => raw,
            Err(first) => {
                tracing::warn!(subtask = subtask.id, error = %first, "synthesis call failed, retrying once");
                if !self.call_delay.is_zero() {
                    tokio::time::sleep(self.call_delay).await;
                }
                self.llm.complete(&messages).await?
            }
        };

        Ok(match extract::decode::<FindingPayload>(&raw) {
            Ok(payload) if payload.findings.trim().len() >= 20 => {
                let mut summary = payload.findings.trim().to_string();
                if !payload.key_points.is_empty() {
                    summary.push_str("\n\nKey points:\n");
                    for point in &payload.key_points {
                        summary.push_str(&format!("- {}\n", point));
                    }
                }
                summary
            }
            // 摘要是自由文本，解析不动就按原文收下
            _ => raw.trim().to_string(),
        })
    }
}

/// 工具证据 + 失败记录拼成综合调用的输入文本
fn build_evidence(description: &str, records: &[ToolRecord], tool_errors: &[ToolError]) -> String {
    let mut text = String::new();
    for record in records {
        let snippet: String = record.snippet.chars().take(EVIDENCE_SNIPPET_CHARS).collect();
        if snippet.is_empty() {
            continue;
        }
        text.push_str(&format!("[{}]: {}\n", record.title, snippet));
    }
    if text.is_empty() {
        text = format!(
            "Topic: {}. No tool evidence was gathered. Provide a best-effort summary from \
             general knowledge and note the lack of sources.",
            description
        );
    }
    if !tool_errors.is_empty() {
        text.push_str("\nFailed tools (no evidence from these):\n");
        for e in tool_errors {
            text.push_str(&format!("- {}\n", e));
        }
    }
    text
}

/// missing_aspects 到子任务 id 的尽力匹配：数字片段对 id，描述与提述互相包含对文本
fn select_targets(plan: &Plan, missing_aspects: &[String]) -> HashSet<u32> {
    let ids: HashSet<u32> = plan.subtask_ids().into_iter().collect();
    let mut targets = HashSet::new();
    for aspect in missing_aspects {
        let aspect_lower = aspect.to_lowercase();
        for n in digit_runs(aspect) {
            if ids.contains(&n) {
                targets.insert(n);
            }
        }
        for sub in &plan.subtasks {
            let desc = sub.description.to_lowercase();
            if aspect_lower.contains(&desc) || desc.contains(aspect_lower.trim()) {
                targets.insert(sub.id);
            }
        }
    }
    targets
}

fn digit_runs(s: &str) -> Vec<u32> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            if let Ok(n) = current.parse() {
                out.push(n);
            }
            current.clear();
        }
    }
    if let Ok(n) = current.parse() {
        out.push(n);
    }
    out
}
